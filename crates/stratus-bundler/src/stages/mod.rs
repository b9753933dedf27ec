//! The default stage chain.
//!
//! Order matters: later stages see the ids earlier stages produced, and the
//! resolution chain asks stages in this order.

mod alias;
mod auto_import;
mod dynamic_require;
mod externals;
mod handlers;
mod import_meta;
mod inject;
mod public_assets;
mod raw;
mod replace;
mod scope;
mod server_assets;
mod storage;
mod timing;
mod transpile;
mod virtual_modules;
mod wasm;

use std::sync::Arc;

pub use alias::{AliasStage, resolve_aliases};
pub use auto_import::AutoImportStage;
pub use dynamic_require::DynamicRequireStage;
pub use externals::{ExternalsStage, NoExternalsStage};
pub use handlers::{HandlersStage, handlers_module};
pub use import_meta::ImportMetaStage;
pub use inject::InjectStage;
pub use public_assets::PublicAssetsStage;
pub use raw::{RAW_PREFIX, RawStage};
pub use replace::{NO_REPLACE_MARKER, ReplaceStage, Replacer};
pub use server_assets::ServerAssetsStage;
pub use storage::StorageStage;
pub use timing::TimingStage;
pub use transpile::TranspileStage;
pub use virtual_modules::VirtualModulesStage;
pub use wasm::WasmStage;

use crate::context::BuildContext;
use crate::pipeline::Stage;

/// Ids of the generated runtime modules.
pub mod ids {
    pub const SERVER_HANDLERS: &str = "#internal/stratus/virtual/server-handlers";
    pub const SERVER_ASSETS: &str = "#internal/stratus/virtual/server-assets";
    pub const PUBLIC_ASSETS: &str = "#internal/stratus/virtual/public-assets";
    pub const PUBLIC_ASSETS_DATA: &str = "#internal/stratus/virtual/public-assets-data";
    pub const PUBLIC_ASSETS_NODE: &str = "#internal/stratus/virtual/public-assets-node";
    pub const STORAGE: &str = "#internal/stratus/virtual/storage";
    pub const POLYFILL: &str = "#internal/stratus/virtual/polyfill";
    pub const PLUGINS: &str = "#internal/stratus/virtual/plugins";
    pub const ERROR_HANDLER: &str = "#internal/stratus/virtual/error-handler";
    pub const STATIC_HANDLER: &str = "#internal/stratus/static";
}

/// The stage chain for `ctx`, in bundling order.
pub fn default_stages(ctx: &BuildContext) -> Vec<Arc<dyn Stage>> {
    let options = &ctx.options;
    let mut stages: Vec<Arc<dyn Stage>> = Vec::new();

    if options.timing {
        stages.push(Arc::new(TimingStage));
    }
    if let Some(auto_import) = &options.auto_import {
        stages.push(Arc::new(AutoImportStage::new(auto_import)));
    }
    stages.push(Arc::new(RawStage::new(&options.raw.extensions)));
    if options.wasm {
        stages.push(Arc::new(WasmStage));
    }
    stages.push(Arc::new(ImportMetaStage));
    stages.push(Arc::new(ReplaceStage::new(ctx)));
    stages.push(Arc::new(TranspileStage::new(&options.transpile)));
    stages.push(Arc::new(DynamicRequireStage::new(ctx)));
    stages.push(Arc::new(ServerAssetsStage));
    stages.push(Arc::new(PublicAssetsStage));
    stages.push(Arc::new(StorageStage));
    stages.push(Arc::new(HandlersStage));
    stages.push(Arc::new(VirtualModulesStage));
    stages.push(Arc::new(AliasStage::new(ctx)));
    if options.no_externals {
        stages.push(Arc::new(NoExternalsStage));
    } else {
        stages.push(Arc::new(ExternalsStage::new(ctx)));
    }
    if !options.inject.is_empty() {
        stages.push(Arc::new(InjectStage::new(&options.inject)));
    }

    stages
}

/// Identifier-safe import binding for a module id.
pub fn serialize_import_name(id: &str) -> String {
    let body: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    format!("_{body}")
}

/// `value` as a JavaScript string literal. Paths and routes go through this
/// before they are spliced into generated modules.
pub fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Short, stable hex digest used in generated binding names.
pub fn short_hash(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..8].to_string()
}

/// Whether `id` names a source file the code-rewriting stages should touch.
pub(crate) fn is_source_module(id: &str) -> bool {
    !id.starts_with('\0') && !id.contains("/node_modules/")
}
