//! Config file discovery and layered loading with figment.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml, Yaml},
};
use serde_json::Value;

use crate::detect::Environment;
use crate::error::{ConfigError, Result};
use crate::load::load_options;
use crate::options::Options;

/// Config file names probed in each directory, in order.
pub const CONFIG_FILES: [&str; 4] = [
    "stratus.config.toml",
    "stratus.config.json",
    "stratus.config.yaml",
    "stratus.config.yml",
];

/// Variables with the `STRATUS_` prefix that are not option keys.
const RESERVED_ENV: [&str; 3] = ["preset", "app_base_url", "dev_worker"];

/// Finds the nearest config file, walking up from `start`.
pub fn discover_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Reads the user config tree.
///
/// Priority: overrides > `STRATUS_*` environment variables > config file.
/// Nested keys are addressed with `__`, e.g. `STRATUS_OUTPUT__DIR`.
pub fn read_user_config(root: &Path, explicit: Option<&Path>, overrides: Value) -> Result<Value> {
    let mut figment = Figment::new();

    let config_file = explicit
        .map(Path::to_path_buf)
        .or_else(|| discover_config_file(root));

    if let Some(path) = &config_file {
        if !path.is_file() {
            return Err(ConfigError::ConfigFile {
                path: path.clone(),
                message: "file not found".to_string(),
            });
        }
        tracing::debug!(path = %path.display(), "loading config file");
        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Json::file(path)),
        };
    }

    figment = figment.merge(
        Env::prefixed("STRATUS_")
            .ignore(&RESERVED_ENV)
            .split("__"),
    );

    if overrides.as_object().is_some_and(|o| !o.is_empty()) {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract::<Value>().map_err(|e| ConfigError::ConfigFile {
        path: config_file.unwrap_or_else(|| root.to_path_buf()),
        message: e.to_string(),
    })
}

/// Discovers, reads and resolves options for the project at `root`.
pub fn load_from_root(
    root: &Path,
    explicit: Option<&Path>,
    mut overrides: Value,
    env: &Environment,
) -> Result<Options> {
    if let Value::Object(map) = &mut overrides {
        map.entry("rootDir")
            .or_insert_with(|| Value::String(root.to_string_lossy().into_owned()));
    }
    let user = read_user_config(root, explicit, overrides)?;
    load_options(user, env)
}
