//! Command-line interface for stratus.
//!
//! - [`cli`] - clap definitions
//! - [`commands`] - `build`, `dev` and `prerender`
//! - [`error`] - [`CliError`] and its conversion to miette reports
//! - [`logger`] - tracing subscriber setup
//! - [`ui`] - status lines, spinner and formatting

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod ui;

pub use error::{CliError, Result};
