//! Error types for the worker, supervisor and dev server.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server entry {} does not exist", path.display())]
    MissingEntry { path: PathBuf },

    #[error("[worker init] failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[worker] exited{}", code.map(|c| format!(" with code: {c}")).unwrap_or_default())]
    WorkerExited { code: Option<i32> },

    #[error("[worker init] no address reported within {timeout:?}")]
    HandoffTimeout { timeout: Duration },

    #[error("unix socket address {} is not supported by the local fetch client", path.display())]
    UnsupportedAddress { path: PathBuf },

    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Build(#[from] stratus_bundler::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl miette::Diagnostic for ServerError {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            ServerError::MissingEntry { .. } => "stratus::server::missing_entry",
            ServerError::Spawn { .. } => "stratus::server::spawn",
            ServerError::WorkerExited { .. } => "stratus::server::worker_exited",
            ServerError::HandoffTimeout { .. } => "stratus::server::handoff_timeout",
            ServerError::UnsupportedAddress { .. } => "stratus::server::unsupported_address",
            ServerError::Fetch { .. } => "stratus::server::fetch",
            ServerError::InvalidUrl { .. } => "stratus::server::invalid_url",
            ServerError::Bind { .. } => "stratus::server::bind",
            ServerError::Build(_) => "stratus::server::build",
            ServerError::Io(_) => "stratus::server::io",
        }))
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            ServerError::MissingEntry { .. } => Some(Box::new(
                "Run a build first; the worker starts from the built server entry.",
            )),
            ServerError::Spawn { program, .. } => Some(Box::new(format!(
                "Make sure `{program}` is installed and on PATH."
            ))),
            ServerError::HandoffTimeout { .. } => Some(Box::new(
                "The server entry must print {\"address\": {...}} on stdout once it listens.",
            )),
            ServerError::Bind { .. } => Some(Box::new("Pick another port with --port.")),
            ServerError::Build(err) => miette::Diagnostic::help(err),
            _ => None,
        }
    }
}
