//! One-line status messages on stderr.

use owo_colors::{OwoColorize, Style};

use super::colors_enabled;

#[derive(Clone, Copy)]
enum Tone {
    Success,
    Info,
    Warning,
    Error,
}

impl Tone {
    fn symbol(self) -> &'static str {
        match self {
            Tone::Success => "✓",
            Tone::Info => "ℹ",
            Tone::Warning => "⚠",
            Tone::Error => "✗",
        }
    }

    fn style(self) -> Style {
        match self {
            Tone::Success => Style::new().green().bold(),
            Tone::Info => Style::new().blue().bold(),
            Tone::Warning => Style::new().yellow().bold(),
            Tone::Error => Style::new().red().bold(),
        }
    }

    /// Warnings and errors tint the whole line, not just the symbol.
    fn tints_text(self) -> bool {
        matches!(self, Tone::Warning | Tone::Error)
    }
}

fn line(tone: Tone, message: &str, color: bool) -> String {
    let symbol = tone.symbol();
    if !color {
        return format!("{symbol} {message}");
    }
    let style = tone.style();
    if tone.tints_text() {
        format!("{} {}", symbol.style(style), message.style(style))
    } else {
        format!("{} {message}", symbol.style(style))
    }
}

pub fn success(message: &str) {
    eprintln!("{}", line(Tone::Success, message, colors_enabled()));
}

pub fn info(message: &str) {
    eprintln!("{}", line(Tone::Info, message, colors_enabled()));
}

pub fn warning(message: &str) {
    eprintln!("{}", line(Tone::Warning, message, colors_enabled()));
}

pub fn error(message: &str) {
    eprintln!("{}", line(Tone::Error, message, colors_enabled()));
}
