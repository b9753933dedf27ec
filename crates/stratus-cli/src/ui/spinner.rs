use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;

use super::colors_enabled;

/// Spinner around the bundling step. Drawn only when a person is watching
/// stderr; in CI and pipes it stays hidden.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let target = if console::user_attended_stderr() {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Stop and leave a failure line behind.
    pub fn fail(&self, message: &str) {
        let line = if colors_enabled() {
            format!("{} {}", "✗".red().bold(), message.red())
        } else {
            format!("✗ {message}")
        };
        self.bar.abandon_with_message(line);
    }

    /// Remove the spinner line.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}
