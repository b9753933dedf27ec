//! Terminal output: status lines, a spinner and duration formatting.
//!
//! Everything goes to stderr so stdout stays free for piped output.

mod format;
mod messages;
mod spinner;

use std::sync::atomic::{AtomicBool, Ordering};

pub use format::format_duration;
pub use messages::{error, info, success, warning};
pub use spinner::Spinner;

static COLOR: AtomicBool = AtomicBool::new(true);

/// Whether the environment asks for colors. `NO_COLOR` beats `FORCE_COLOR`.
pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::user_attended_stderr()
}

/// Decide once, early in `main`, whether status output is colored.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && should_use_color();
    COLOR.store(enabled, Ordering::Relaxed);
    console::set_colors_enabled_stderr(enabled);
}

pub(crate) fn colors_enabled() -> bool {
    COLOR.load(Ordering::Relaxed)
}
