//! The normalized option tree consumed by every build component.
//!
//! `Options` is produced once per invocation by [`crate::load_options`]. All
//! directory fields are absolute by the time a value of this type exists.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Normalized build options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub preset: String,
    #[serde(default)]
    pub dev: bool,

    pub root_dir: PathBuf,
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub entry: PathBuf,
    pub output: OutputDirs,
    #[serde(default)]
    pub scan_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub node_modules_dirs: Vec<PathBuf>,
    #[serde(rename = "baseURL")]
    pub base_url: String,

    #[serde(default = "default_true")]
    pub node: bool,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_entry_file_name")]
    pub entry_file_name: String,
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub source_map: bool,
    #[serde(default)]
    pub timing: bool,
    #[serde(default)]
    pub wasm: bool,
    #[serde(default)]
    pub analyze: bool,
    #[serde(default)]
    pub inline_dynamic_imports: bool,
    #[serde(default)]
    pub serve_static: bool,

    #[serde(default)]
    pub no_externals: bool,
    #[serde(default)]
    pub externals: ExternalsOptions,

    #[serde(default)]
    pub storage: IndexMap<String, StorageMount>,
    #[serde(default)]
    pub dev_storage: IndexMap<String, StorageMount>,
    #[serde(default)]
    pub bundled_storage: Vec<String>,
    #[serde(default)]
    pub public_assets: Vec<PublicAssetDir>,
    #[serde(default)]
    pub server_assets: Vec<ServerAssetDir>,

    #[serde(default)]
    pub handlers: Vec<Handler>,
    /// Catch-all handler mounted after every scanned and declared handler.
    #[serde(default)]
    pub renderer: Option<PathBuf>,
    #[serde(default)]
    pub routes: IndexMap<String, Value>,
    pub error_handler: String,
    #[serde(default)]
    pub prerender: PrerenderOptions,

    #[serde(default)]
    pub alias: IndexMap<String, String>,
    #[serde(default)]
    pub replace: IndexMap<String, String>,
    #[serde(default, rename = "virtual")]
    pub virtual_modules: IndexMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub polyfill: Vec<String>,
    #[serde(default)]
    pub inject: IndexMap<String, String>,
    #[serde(default)]
    pub auto_import: Option<AutoImportOptions>,
    #[serde(default)]
    pub raw: RawOptions,
    #[serde(default)]
    pub transpile: TranspileOptions,

    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub typescript: TypeScriptOptions,
    #[serde(default)]
    pub runtime_config: Value,
    #[serde(default)]
    pub dev_server: DevServerOptions,
}

fn default_true() -> bool {
    true
}

fn default_entry_file_name() -> String {
    "index.mjs".to_string()
}

impl Options {
    /// Whether these options describe the internal prerender build.
    pub fn is_prerender(&self) -> bool {
        self.preset == "prerender"
    }

    /// Value injected for `process.env.NODE_ENV`.
    pub fn node_env(&self) -> &'static str {
        if self.dev {
            "development"
        } else if self.is_prerender() {
            "prerender"
        } else {
            "production"
        }
    }

    /// Storage mounts visible to this build.
    ///
    /// Dev and prerender builds see `devStorage` layered over `storage`;
    /// production builds only see `storage`.
    pub fn storage_mounts(&self) -> IndexMap<String, StorageMount> {
        let mut mounts = self.storage.clone();
        if self.dev || self.is_prerender() {
            for (key, mount) in &self.dev_storage {
                mounts.insert(key.clone(), mount.clone());
            }
        }
        mounts
    }

    /// Handler module paths that are plain filesystem paths.
    pub fn handler_paths(&self) -> impl Iterator<Item = &Path> {
        self.handlers
            .iter()
            .map(|h| Path::new(h.handler.as_str()))
            .filter(|p| p.is_absolute())
    }
}

/// Output directory layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDirs {
    pub dir: PathBuf,
    pub server_dir: PathBuf,
    pub public_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Esm,
    Cjs,
    Iife,
}

/// Dependency tracer policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalsOptions {
    /// Prefixes that are always inlined.
    pub inline: Vec<String>,
    /// Prefixes that are always external and never traced.
    pub external: Vec<String>,
    /// Copy traced dependencies into the output `node_modules`.
    pub trace: bool,
    /// Extra module ids traced regardless of imports.
    pub trace_include: Vec<String>,
    pub export_conditions: Vec<String>,
}

impl Default for ExternalsOptions {
    fn default() -> Self {
        Self {
            inline: Vec::new(),
            external: Vec::new(),
            trace: true,
            trace_include: Vec::new(),
            export_conditions: ["default", "module", "node", "import"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// A storage mount: a driver name plus driver-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMount {
    pub driver: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

impl StorageMount {
    pub fn fs(base: impl AsRef<Path>) -> Self {
        let mut options = serde_json::Map::new();
        options.insert(
            "base".to_string(),
            Value::String(base.as_ref().to_string_lossy().into_owned()),
        );
        Self {
            driver: "fs".to_string(),
            options,
        }
    }

    /// The `base` option, used by filesystem drivers.
    pub fn base(&self) -> Option<&str> {
        self.options.get("base").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAssetDir {
    pub dir: PathBuf,
    #[serde(rename = "baseURL", default = "default_base")]
    pub base_url: String,
    #[serde(default)]
    pub fallthrough: bool,
    #[serde(default)]
    pub max_age: u64,
}

fn default_base() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAssetDir {
    pub base_name: String,
    pub dir: PathBuf,
}

/// A route or middleware handler.
///
/// `handler` is either an absolute module path (scanned handlers) or a
/// module specifier resolvable by the bundler (configured handlers).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handler {
    #[serde(default)]
    pub route: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub middleware: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Connect,
        HttpMethod::Delete,
        HttpMethod::Get,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Patch,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Connect => "connect",
            HttpMethod::Delete => "delete",
            HttpMethod::Get => "get",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
            HttpMethod::Patch => "patch",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Trace => "trace",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| ConfigError::invalid("method", format!("unknown HTTP method '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrerenderOptions {
    pub routes: Vec<String>,
    pub crawl_links: bool,
    /// Upper bound on crawl passes over the frontier.
    pub max_passes: usize,
    /// Routes longer than this are never generated.
    pub max_route_length: usize,
    /// Treat reaching `max_passes` with a non-empty frontier as an error.
    pub fail_on_pass_limit: bool,
}

impl Default for PrerenderOptions {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            crawl_links: false,
            max_passes: 100,
            max_route_length: 250,
            fail_on_pass_limit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoImportOptions {
    pub presets: Vec<ImportPreset>,
}

/// Names importable without an explicit import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPreset {
    pub from: String,
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOptions {
    /// Extensions loaded as raw text in addition to the built-in list.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranspileOptions {
    pub loaders: IndexMap<String, Loader>,
    /// Path fragments excluded from transpilation.
    pub exclude: Vec<String>,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        let mut loaders = IndexMap::new();
        loaders.insert(".ts".to_string(), Loader::Ts);
        loaders.insert(".js".to_string(), Loader::Js);
        Self {
            loaders,
            exclude: vec!["node_modules".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Commands {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeScriptOptions {
    pub generate_ts_config: bool,
    pub internal_paths: bool,
}

impl Default for TypeScriptOptions {
    fn default() -> Self {
        Self {
            generate_ts_config: true,
            internal_paths: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServerOptions {
    pub watch: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handler_method_round_trips_lowercase() {
        let handler: Handler = serde_json::from_value(json!({
            "route": "/api/x",
            "handler": "/src/api/x.get.ts",
            "method": "get",
            "lazy": true
        }))
        .unwrap();
        assert_eq!(handler.method, Some(HttpMethod::Get));
        assert!(!handler.middleware);
        assert_eq!(serde_json::to_value(&handler).unwrap()["method"], "get");
    }

    #[test]
    fn storage_mount_keeps_driver_options() {
        let mount: StorageMount =
            serde_json::from_value(json!({"driver": "redis", "url": "redis://x"})).unwrap();
        assert_eq!(mount.driver, "redis");
        assert_eq!(mount.options["url"], "redis://x");
        assert_eq!(StorageMount::fs("/data").base(), Some("/data"));
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("POST".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("fetch".parse::<HttpMethod>().is_err());
    }
}
