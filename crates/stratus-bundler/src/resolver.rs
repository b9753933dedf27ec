//! Module resolution shared by the externals stage and the tracer.
//!
//! Configured like the resolver handed to Rolldown, so a decision made here
//! matches what the bundler would have resolved on its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratus_config::Options;

/// Extensions tried for extensionless specifiers.
pub const RESOLVE_EXTENSIONS: [&str; 5] = [".ts", ".mjs", ".js", ".json", ".node"];

/// Node.js builtin modules. `node:` prefixed specifiers are builtins too.
pub const NODE_BUILTINS: &[&str] = &[
    "assert", "assert/strict", "async_hooks", "buffer", "child_process", "cluster", "console",
    "constants", "crypto", "dgram", "diagnostics_channel", "dns", "dns/promises", "domain",
    "events", "fs", "fs/promises", "http", "http2", "https", "inspector", "module", "net", "os",
    "path", "path/posix", "path/win32", "perf_hooks", "process", "punycode", "querystring",
    "readline", "readline/promises", "repl", "stream", "stream/consumers", "stream/promises",
    "stream/web", "string_decoder", "sys", "timers", "timers/promises", "tls", "trace_events",
    "tty", "url", "util", "util/types", "v8", "vm", "wasi", "worker_threads", "zlib",
];

pub fn is_node_builtin(specifier: &str) -> bool {
    specifier.starts_with("node:") || NODE_BUILTINS.contains(&specifier)
}

/// Cheaply cloneable oxc resolver plus the extra module directories.
#[derive(Clone)]
pub struct ModuleResolver {
    resolver: Arc<oxc_resolver::Resolver>,
    root_dir: PathBuf,
    module_dirs: Vec<PathBuf>,
}

impl std::fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("root_dir", &self.root_dir)
            .field("module_dirs", &self.module_dirs)
            .finish()
    }
}

impl ModuleResolver {
    pub fn new(options: &Options) -> Self {
        Self::with_conditions(
            &options.root_dir,
            &options.node_modules_dirs,
            &options.externals.export_conditions,
        )
    }

    pub fn with_conditions(root_dir: &Path, module_dirs: &[PathBuf], conditions: &[String]) -> Self {
        let mut modules = vec!["node_modules".to_string()];
        modules.extend(
            module_dirs
                .iter()
                .map(|dir| dir.to_string_lossy().into_owned()),
        );

        let resolver = oxc_resolver::Resolver::new(oxc_resolver::ResolveOptions {
            condition_names: conditions.to_vec(),
            extensions: RESOLVE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            main_fields: vec!["main".into()],
            modules,
            symlinks: true,
            ..Default::default()
        });

        Self {
            resolver: Arc::new(resolver),
            root_dir: root_dir.to_path_buf(),
            module_dirs: module_dirs.to_vec(),
        }
    }

    /// Resolves `specifier` as seen from `importer`, or from the project
    /// root when there is no importer.
    pub fn resolve(&self, specifier: &str, importer: Option<&str>) -> Option<PathBuf> {
        let base = importer
            .map(Path::new)
            .filter(|p| p.is_absolute())
            .and_then(Path::parent)
            .unwrap_or(&self.root_dir);
        self.resolve_from(base, specifier)
    }

    pub fn resolve_from(&self, dir: &Path, specifier: &str) -> Option<PathBuf> {
        self.resolver
            .resolve(dir, specifier)
            .map(|res| res.path().to_path_buf())
            .ok()
    }

    /// Fallback lookup against the configured module directories.
    pub fn resolve_in_module_dirs(&self, specifier: &str) -> Option<PathBuf> {
        self.module_dirs
            .iter()
            .filter_map(|dir| dir.parent())
            .find_map(|dir| self.resolve_from(dir, specifier))
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn builtins() {
        assert!(is_node_builtin("fs"));
        assert!(is_node_builtin("node:worker_threads"));
        assert!(is_node_builtin("fs/promises"));
        assert!(!is_node_builtin("lodash"));
    }

    #[test]
    fn resolves_package_main_and_module_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        let shared = dir.path().join("shared/node_modules");
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/package.json"), r#"{"main":"lib.js"}"#).unwrap();
        fs::write(root.join("node_modules/pkg/lib.js"), "module.exports = 1").unwrap();
        fs::create_dir_all(shared.join("other")).unwrap();
        fs::write(shared.join("other/index.js"), "").unwrap();

        let resolver = ModuleResolver::with_conditions(
            &root,
            std::slice::from_ref(&shared),
            &["node".to_string(), "default".to_string()],
        );
        let resolved = resolver.resolve("pkg", None).unwrap();
        assert!(resolved.ends_with("node_modules/pkg/lib.js"));

        assert!(resolver.resolve_in_module_dirs("other").unwrap().ends_with("other/index.js"));
    }
}
