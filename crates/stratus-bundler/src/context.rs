//! Per-build state handed to every stage.

use std::path::Path;
use std::sync::Arc;

use stratus_config::{Handler, Options, ServerAssetDir};

use crate::resolver::ModuleResolver;

/// Immutable inputs of one build.
///
/// `Options` stay untouched; anything discovered while preparing the build
/// (scanned handlers, the storage snapshot) lives here instead.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub options: Arc<Options>,
    /// Scanned handlers followed by configured ones.
    pub handlers: Vec<Handler>,
    extra_server_assets: Vec<ServerAssetDir>,
    pub resolver: ModuleResolver,
}

impl BuildContext {
    pub fn new(options: Arc<Options>, scanned: Vec<Handler>) -> Self {
        let mut handlers = scanned;
        handlers.extend(options.handlers.iter().cloned());
        let resolver = ModuleResolver::new(&options);
        Self {
            options,
            handlers,
            extra_server_assets: Vec::new(),
            resolver,
        }
    }

    pub fn with_server_asset(mut self, asset: ServerAssetDir) -> Self {
        self.extra_server_assets.push(asset);
        self
    }

    /// Configured server asset groups plus build-time additions.
    pub fn server_assets(&self) -> impl Iterator<Item = &ServerAssetDir> {
        self.options
            .server_assets
            .iter()
            .chain(self.extra_server_assets.iter())
    }

    pub fn is_dev(&self) -> bool {
        self.options.dev
    }

    /// Dev and prerender builds read assets and storage from disk.
    pub fn reads_from_disk(&self) -> bool {
        self.options.dev || self.options.is_prerender()
    }

    pub fn server_dir(&self) -> &Path {
        &self.options.output.server_dir
    }
}
