
//! # stratus-bundler
//!
//! Preset-driven server bundling on top of Rolldown.
//!
//! A build scans the project for route handlers, assembles an ordered chain
//! of [`Stage`]s that contribute virtual modules and resolution rules, runs
//! Rolldown once through a single adapter plugin, and writes a deployable
//! output tree with its own traced `node_modules`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratus_bundler::{build, prepare, copy_public_assets};
//! use stratus_config::{Environment, load_options};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let env = Environment::from_process()?;
//! let options = Arc::new(load_options(serde_json::json!({}), &env)?);
//!
//! prepare(&options).await?;
//! copy_public_assets(&options).await?;
//! let result = build(options).await?;
//! println!("wrote {}", result.manifest_path.display());
//! # Ok(()) }
//! ```

pub mod assets;
pub mod build;
pub mod context;
pub mod diagnostics;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod scan;
pub mod stages;
pub mod storage;
pub mod trace;
pub mod types;
pub mod vfs;
pub mod watch;

pub use build::{BuildResult, build, copy_public_assets, prepare};
pub use context::BuildContext;
pub use output::manifest::BuildManifest;
pub use pipeline::{Pipeline, RenderedChunk, ResolveOutcome, Stage, StageOutput};
pub use resolver::ModuleResolver;
pub use scan::{scan_handlers, scan_middleware, scan_routes};
pub use trace::{DependencyTracer, ExternalDecision};
pub use vfs::{RegistryBuilder, VirtualContent, VirtualRegistry};
pub use watch::{BuildEvent, WatchSession, watch};

// Plugin types the pipeline adapter is built from
pub use rolldown_plugin::{
    HookLoadArgs, HookLoadOutput, HookLoadReturn, HookResolveIdArgs, HookResolveIdOutput,
    HookResolveIdReturn, HookTransformArgs, HookTransformOutput, HookTransformReturn, HookUsage,
    Plugin, PluginContext, SharedTransformPluginContext,
};

/// Error types for stratus-bundler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from the Rolldown bundler.
    #[error("Rolldown bundler error: {}", format_bundler_error(.0))]
    Bundler(Vec<diagnostics::ExtractedDiagnostic>),

    #[error(transparent)]
    Config(#[from] stratus_config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with context message.
    #[error("{message}")]
    IoError {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Output path would escape its base directory.
    #[error("Invalid output path: {0}")]
    InvalidOutputPath(String),

    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// A namespaced virtual id reached `load` without being registered.
    #[error("virtual module \"{id}\" was loaded but never registered")]
    UnregisteredVirtual { id: String },

    #[error("Cannot resolve \"{specifier}\" from \"{importer}\" and externals are not allowed!")]
    ExternalsDisabled { specifier: String, importer: String },

    #[error("failed to trace {}: {message}", path.display())]
    Trace {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("storage mount \"{mount}\": {message}")]
    Storage { mount: String, message: String },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias for stratus-bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a bundler error from a Rolldown error batch.
    pub fn from_rolldown_batch(error: &dyn std::fmt::Debug) -> Self {
        Error::Bundler(diagnostics::extract_from_rolldown_error(error))
    }

    pub(crate) fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::IoError {
            message: message.into(),
            source,
        }
    }
}

fn format_bundler_error(diagnostics: &[diagnostics::ExtractedDiagnostic]) -> String {
    match diagnostics {
        [] => "Unknown bundler error".to_string(),
        [diag] => format!("{}: {}", diag.kind, diag.message),
        many => format!(
            "{} errors: {}",
            many.len(),
            many.iter()
                .map(|d| format!("{}: {}", d.kind, d.message))
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::Bundler(_) => "stratus::bundler::rolldown",
            Error::Config(_) => "stratus::bundler::config",
            Error::InvalidConfig(_) => "stratus::bundler::invalid_config",
            Error::Io(_) | Error::IoError { .. } => "stratus::bundler::io",
            Error::InvalidOutputPath(_) => "stratus::bundler::invalid_output_path",
            Error::WriteFailure(_) => "stratus::bundler::write_failure",
            Error::UnregisteredVirtual { .. } => "stratus::bundler::unregistered_virtual",
            Error::ExternalsDisabled { .. } => "stratus::bundler::externals_disabled",
            Error::Trace { .. } => "stratus::bundler::trace",
            Error::Storage { .. } => "stratus::bundler::storage",
            Error::Watch(_) => "stratus::bundler::watch",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::Config(err) => miette::Diagnostic::help(err),
            Error::InvalidOutputPath(path) => Some(Box::new(format!(
                "The output path '{path}' is invalid. Generated files must stay inside the output directory."
            ))),
            Error::WriteFailure(msg) => Some(Box::new(format!(
                "Failed to write file. Check disk space and permissions.\nError: {msg}"
            ))),
            Error::UnregisteredVirtual { .. } => Some(Box::new(
                "This is a bug in stratus: a virtual module was loaded without being resolved first.",
            )),
            Error::ExternalsDisabled { .. } => Some(Box::new(
                "The selected preset inlines every dependency. Install the package or add an alias for it.",
            )),
            Error::Trace { .. } => Some(Box::new(
                "A traced runtime dependency could not be copied into the output node_modules.",
            )),
            Error::Bundler(diagnostics) => match diagnostics.as_slice() {
                [diag] => diag
                    .help
                    .as_ref()
                    .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>),
                _ => Some(Box::new(
                    "Multiple bundler errors occurred. See details below.".to_string(),
                )),
            },
            _ => None,
        }
    }
}
