//! Error types for option loading and preset resolution.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    // Preset resolution errors
    #[error("unknown preset \"{name}\"")]
    UnknownPreset { name: String },

    #[error("preset \"{preset}\" extends itself: {}", chain.join(" -> "))]
    PresetCycle { preset: String, chain: Vec<String> },

    #[error("entry is missing! Is \"{preset}\" preset correct?")]
    MissingEntry { preset: String },

    // Config parsing/loading errors
    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to load config file {}: {message}", path.display())]
    ConfigFile { path: PathBuf, message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.to_string(),
        }
    }
}

impl miette::Diagnostic for ConfigError {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            ConfigError::UnknownPreset { .. } => "stratus::config::unknown_preset",
            ConfigError::PresetCycle { .. } => "stratus::config::preset_cycle",
            ConfigError::MissingEntry { .. } => "stratus::config::missing_entry",
            ConfigError::InvalidValue { .. } => "stratus::config::invalid_value",
            ConfigError::ConfigFile { .. } => "stratus::config::config_file",
            ConfigError::Io(_) => "stratus::config::io",
        }))
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            ConfigError::UnknownPreset { name } => Some(Box::new(format!(
                "'{}' is not a known preset. Use a preset name such as node-server, vercel or cloudflare.",
                name
            ))),
            ConfigError::PresetCycle { .. } => Some(Box::new(
                "Remove the `extends` entry that points back into its own chain.",
            )),
            ConfigError::MissingEntry { .. } => Some(Box::new(
                "Set `entry` in your config or pick a preset that provides one.",
            )),
            ConfigError::ConfigFile { .. } => {
                Some(Box::new("Check the config file syntax and field types."))
            }
            _ => None,
        }
    }
}
