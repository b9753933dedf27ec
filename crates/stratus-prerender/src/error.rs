use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PrerenderError>;

#[derive(Debug, Error)]
pub enum PrerenderError {
    #[error(transparent)]
    Config(#[from] stratus_config::ConfigError),

    #[error(transparent)]
    Build(#[from] stratus_bundler::Error),

    #[error(transparent)]
    Server(#[from] stratus_server::ServerError),

    #[error("route \"{route}\" cannot be written inside the public directory")]
    InvalidRoute { route: String },

    #[error("failed to write prerendered {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prerendering stopped after {passes} passes with {} routes left (first: {})", leftover.len(), leftover.first().map(String::as_str).unwrap_or("-"))]
    PassLimit { passes: usize, leftover: Vec<String> },
}

impl miette::Diagnostic for PrerenderError {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            PrerenderError::Config(_) => "stratus::prerender::config",
            PrerenderError::Build(_) => "stratus::prerender::build",
            PrerenderError::Server(_) => "stratus::prerender::server",
            PrerenderError::InvalidRoute { .. } => "stratus::prerender::invalid_route",
            PrerenderError::Write { .. } => "stratus::prerender::write",
            PrerenderError::PassLimit { .. } => "stratus::prerender::pass_limit",
        }))
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            PrerenderError::Config(err) => miette::Diagnostic::help(err),
            PrerenderError::Build(err) => miette::Diagnostic::help(err),
            PrerenderError::Server(err) => miette::Diagnostic::help(err),
            PrerenderError::InvalidRoute { .. } => {
                Some(Box::new("Prerender routes must not contain `..` segments."))
            }
            PrerenderError::PassLimit { .. } => Some(Box::new(
                "Raise prerender.maxPasses, or unset prerender.failOnPassLimit to keep the partial result.",
            )),
            PrerenderError::Write { .. } => None,
        }
    }
}
