//! `node_modules` path parsing and package manifest helpers.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

static NODE_MODULE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+/node_modules/)([^@/]+|@[^/]+/[^/]+)(/?.*?)?$")
        .expect("node_modules path regex is valid")
});

static ESM_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:import\s*[\w*{'\x22]|export\s+(?:\*|\{|default|const|let|var|function|class|async))")
        .expect("esm syntax regex is valid")
});

/// A path inside some `node_modules` directory, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeModulePath {
    /// Everything up to and including `node_modules/`.
    pub base_dir: String,
    /// Package name, scoped names included.
    pub name: String,
    /// Remainder after the package name, starting with `/` when present.
    pub subpath: String,
}

impl NodeModulePath {
    pub fn parse(path: &str) -> Option<Self> {
        let normalized = path.replace('\\', "/");
        let caps = NODE_MODULE_PATH.captures(&normalized)?;
        Some(Self {
            base_dir: caps.get(1)?.as_str().to_string(),
            name: caps.get(2)?.as_str().to_string(),
            subpath: caps.get(3).map(|m| m.as_str()).unwrap_or_default().to_string(),
        })
    }

    /// The installed package directory.
    pub fn package_dir(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.base_dir, self.name))
    }
}

/// The fields of `package.json` the tracer reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
}

impl PackageJson {
    pub fn read(package_dir: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(package_dir.join("package.json"))?;
        serde_json::from_str(&raw).map_err(std::io::Error::other)
    }

    pub fn is_module(&self) -> bool {
        self.module_type.as_deref() == Some("module")
    }

    /// Parsed version; unparsable or missing versions sort lowest.
    pub fn semver(&self) -> semver::Version {
        self.version
            .as_deref()
            .and_then(|v| semver::Version::parse(v.trim_start_matches('v')).ok())
            .unwrap_or_else(|| semver::Version::new(0, 0, 0))
    }
}

/// The nearest `package.json` at or above `file`'s directory.
pub fn nearest_package(file: &Path) -> Option<PackageJson> {
    file.ancestors()
        .skip(1)
        .find(|dir| dir.join("package.json").is_file())
        .and_then(|dir| PackageJson::read(dir).ok())
}

/// Whether Node can import `path` on its own once it is left external.
///
/// `.mjs` and `.cjs` always qualify. A `.js` file qualifies unless it uses
/// ESM syntax inside a package that is not `"type": "module"`, which Node
/// would reject. Native addons, JSON and extensionless files never qualify.
pub fn is_valid_node_import(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mjs" | "cjs") => true,
        Some("js") => {
            let Ok(code) = std::fs::read_to_string(path) else {
                return false;
            };
            if !ESM_SYNTAX.is_match(&code) {
                return true;
            }
            nearest_package(path).is_some_and(|pkg| pkg.is_module())
        }
        _ => false,
    }
}
