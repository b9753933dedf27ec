//! CLI error type and its conversion to miette reports.
//!
//! Library errors already implement [`miette::Diagnostic`], so they are
//! wrapped as-is and keep their codes and help text.

use miette::Report;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] stratus_config::ConfigError),

    #[error(transparent)]
    Build(#[from] stratus_bundler::Error),

    #[error(transparent)]
    Server(#[from] stratus_server::ServerError),

    #[error(transparent)]
    Prerender(#[from] stratus_prerender::PrerenderError),

    /// Invalid command-line arguments or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert a [`CliError`] into a report for `main`.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => Report::new(e),
        CliError::Build(e) => Report::new(e),
        CliError::Server(e) => Report::new(e),
        CliError::Prerender(e) => Report::new(e),
        other => miette::miette!("{}", other),
    }
}
