//! Option loading: preset selection, layered merge and normalization.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde_json::{Value, json};

use crate::detect::{Environment, detect_from_env, detect_from_project};
use crate::error::{ConfigError, Result};
use crate::merge::{fill_defaults, merge_values};
use crate::options::Options;
use crate::preset::{PresetId, PresetRegistry, canonical_name};
use crate::template::{absolute, expand, resolve_path};

/// Alias under which the runtime directory is addressed.
pub const RUNTIME_ALIAS: &str = "#internal/stratus";

/// Loads options with the built-in preset registry.
pub fn load_options(user_config: Value, env: &Environment) -> Result<Options> {
    load_options_with(&PresetRegistry::builtin(), user_config, env)
}

/// Loads options against a custom preset registry.
///
/// Layers are merged as defaults, then the preset chain parent-first, then
/// the user config. The merged tree is normalized so every directory is
/// absolute before it is deserialized.
pub fn load_options_with(
    registry: &PresetRegistry,
    user_config: Value,
    env: &Environment,
) -> Result<Options> {
    let user = match user_config {
        Value::Null => json!({}),
        value @ Value::Object(_) => value,
        other => {
            return Err(ConfigError::invalid(
                "config",
                format!("expected an object, found {other}"),
            ));
        }
    };

    let preset = select_preset(registry, &user, env);
    let resolved = registry.resolve(&preset)?;
    tracing::debug!(preset = %resolved.name, chain = ?resolved.chain, "resolved preset");

    let mut merged = defaults(env);
    for layer in &resolved.layers {
        merge_values(&mut merged, layer);
    }
    merge_values(&mut merged, &user);
    merged["preset"] = Value::String(resolved.name.clone());

    normalize(&mut merged, env)?;

    serde_json::from_value(merged).map_err(|e| ConfigError::invalid("options", e))
}

/// Picks the preset name.
///
/// Precedence: explicit `preset`, `STRATUS_PRESET`, provider environment,
/// project files, then `node-server`. Dev builds always use `dev`.
fn select_preset(registry: &PresetRegistry, user: &Value, env: &Environment) -> String {
    if user.get("dev").and_then(Value::as_bool).unwrap_or(false) {
        return PresetId::Dev.name().to_string();
    }
    if let Some(name) = user.get("preset").and_then(Value::as_str) {
        return canonical_name(name);
    }
    if let Some(name) = env.var("STRATUS_PRESET") {
        return canonical_name(name);
    }
    if let Some(id) = detect_from_env(env) {
        return id.name().to_string();
    }
    let root = user
        .get("rootDir")
        .and_then(Value::as_str)
        .map(|r| absolute(&env.cwd, Path::new(r)))
        .unwrap_or_else(|| env.cwd.clone());
    if let Some(id) = detect_from_project(&root).filter(|id| registry.contains(id.name())) {
        return id.name().to_string();
    }
    PresetId::NodeServer.name().to_string()
}

fn defaults(env: &Environment) -> Value {
    json!({
        "dev": false,
        "rootDir": ".",
        "buildDir": ".stratus",
        "runtimeDir": "{{ rootDir }}/node_modules/stratus/runtime",
        "output": {
            "dir": "{{ rootDir }}/.output",
            "serverDir": "{{ output.dir }}/server",
            "publicDir": "{{ output.dir }}/public"
        },
        "scanDirs": [],
        "nodeModulesDirs": [],
        "baseURL": env.var("STRATUS_APP_BASE_URL").unwrap_or("/"),
        "storage": {},
        "devStorage": {},
        "bundledStorage": [],
        "publicAssets": [],
        "serverAssets": [],
        "handlers": [],
        "routes": {},
        "errorHandler": "#internal/stratus/error",
        "prerender": { "crawlLinks": false, "routes": [] },
        "alias": {},
        "replace": {},
        "virtual": {},
        "plugins": [],
        "polyfill": [],
        "inject": {},
        "autoImport": { "presets": default_imports() },
        "node": true,
        "sourceMap": true,
        "typescript": { "generateTsConfig": true, "internalPaths": false },
        "runtimeConfig": { "app": {}, "stratus": {} },
        "commands": {},
        "devServer": { "watch": [] }
    })
}

fn default_imports() -> Value {
    json!([
        {
            "from": RUNTIME_ALIAS,
            "imports": [
                "defineCachedFunction",
                "defineCachedEventHandler",
                "cachedFunction",
                "cachedEventHandler",
                "useRuntimeConfig",
                "useStorage",
                "useStratusApp",
                "defineStratusPlugin"
            ]
        },
        {
            "from": "h3",
            "imports": [
                "defineEventHandler",
                "defineLazyEventHandler",
                "eventHandler",
                "lazyEventHandler",
                "appendHeader",
                "assertMethod",
                "createError",
                "handleCacheHeaders",
                "isMethod",
                "sendRedirect",
                "useCookies",
                "setCookie",
                "deleteCookie",
                "useBody",
                "useMethod",
                "useQuery",
                "useRawBody"
            ]
        }
    ])
}

fn string_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn normalize(v: &mut Value, env: &Environment) -> Result<()> {
    let preset = string_at(v, "preset").unwrap_or_default().to_string();

    let root_dir = absolute(&env.cwd, Path::new(string_at(v, "rootDir").unwrap_or(".")));
    v["rootDir"] = path_value(&root_dir);

    let src_dir = match string_at(v, "srcDir") {
        Some(src) => absolute(&root_dir, Path::new(src)),
        None => root_dir.clone(),
    };
    v["srcDir"] = path_value(&src_dir);

    let build_dir = absolute(&root_dir, Path::new(string_at(v, "buildDir").unwrap_or(".stratus")));
    v["buildDir"] = path_value(&build_dir);

    let runtime_raw = expand(string_at(v, "runtimeDir").unwrap_or_default(), v);
    let runtime_dir = absolute(&root_dir, Path::new(&runtime_raw));
    v["runtimeDir"] = path_value(&runtime_dir);

    let mut alias: IndexMap<String, String> = match v.get("alias") {
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::invalid("alias", e))?,
        _ => IndexMap::new(),
    };
    alias
        .entry(RUNTIME_ALIAS.to_string())
        .or_insert_with(|| runtime_dir.to_string_lossy().into_owned());
    v["alias"] = serde_json::to_value(&alias).map_err(|e| ConfigError::invalid("alias", e))?;

    let Some(entry) = string_at(v, "entry").map(str::to_string) else {
        return Err(ConfigError::MissingEntry { preset });
    };
    let entry = resolve_path(&entry, v, &alias, &src_dir);
    v["entry"] = path_value(&entry);

    match string_at(v, "renderer").map(str::to_string) {
        Some(renderer) => {
            let renderer = resolve_path(&renderer, v, &alias, &src_dir);
            v["renderer"] = path_value(&renderer);
        }
        None => v["renderer"] = Value::Null,
    }

    // `serverDir` and `publicDir` may reference `output.dir`, so it goes first.
    for key in ["dir", "serverDir", "publicDir"] {
        let raw = v
            .pointer(&format!("/output/{key}"))
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::invalid(format!("output.{key}"), "expected a path"))?
            .to_string();
        let resolved = resolve_path(&raw, v, &alias, &src_dir);
        v["output"][key] = path_value(&resolved);
    }

    let mut module_dirs: IndexSet<PathBuf> = strings(v, "nodeModulesDirs")
        .into_iter()
        .map(|d| absolute(&root_dir, Path::new(&d)))
        .collect();
    module_dirs.insert(root_dir.join("node_modules"));
    v["nodeModulesDirs"] = Value::Array(module_dirs.iter().map(|p| path_value(p)).collect());

    let scan_dirs: Vec<PathBuf> = match strings(v, "scanDirs") {
        dirs if dirs.is_empty() => vec![src_dir.clone()],
        dirs => dirs
            .into_iter()
            .map(|d| absolute(&root_dir, Path::new(&d)))
            .collect(),
    };
    v["scanDirs"] = Value::Array(scan_dirs.iter().map(|p| path_value(p)).collect());

    let watch: Vec<Value> = v
        .pointer("/devServer/watch")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|p| path_value(&resolve_path(p, v, &alias, &src_dir)))
                .collect()
        })
        .unwrap_or_default();
    if !v.get("devServer").is_some_and(Value::is_object) {
        v["devServer"] = json!({});
    }
    v["devServer"]["watch"] = Value::Array(watch);

    let base_url = with_slashes(string_at(v, "baseURL").unwrap_or("/"));
    v["baseURL"] = Value::String(base_url.clone());

    let routes = v.get("routes").cloned().unwrap_or_else(|| json!({}));
    let runtime_config = &mut v["runtimeConfig"];
    if !runtime_config.is_object() {
        *runtime_config = json!({});
    }
    fill_defaults(
        runtime_config,
        &json!({ "app": { "baseURL": base_url }, "stratus": { "routes": routes } }),
    );

    normalize_public_assets(v, &src_dir, &scan_dirs)?;
    normalize_server_assets(v, &src_dir);
    normalize_dev_storage(v, &root_dir, &src_dir, &build_dir);

    if !v.get("externals").is_some_and(Value::is_object) {
        v["externals"] = json!({});
    }
    match v.get("autoImport") {
        Some(Value::Object(_)) => {}
        Some(Value::Bool(true)) => v["autoImport"] = json!({ "presets": default_imports() }),
        _ => v["autoImport"] = Value::Null,
    }

    Ok(())
}

fn strings(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `/`-prefixed and `/`-suffixed form of a base URL.
pub fn with_slashes(url: &str) -> String {
    let trimmed = url.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// `/`-prefixed form without a trailing slash, `/` for the root.
pub fn without_trailing_slash(url: &str) -> String {
    let trimmed = url.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_public_assets(v: &mut Value, src_dir: &Path, scan_dirs: &[PathBuf]) -> Result<()> {
    let mut assets: Vec<serde_json::Map<String, Value>> = match v.get("publicAssets") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .cloned()
                    .ok_or_else(|| ConfigError::invalid("publicAssets", "expected objects"))
            })
            .collect::<Result<_>>()?,
        _ => Vec::new(),
    };

    for asset in &mut assets {
        let dir = asset.get("dir").and_then(Value::as_str).unwrap_or("public");
        let dir = absolute(src_dir, Path::new(dir));
        asset.insert("dir".into(), path_value(&dir));
        let base = asset.get("baseURL").and_then(Value::as_str).unwrap_or("/");
        asset.insert("baseURL".into(), Value::String(without_trailing_slash(base)));
    }

    for scan_dir in scan_dirs {
        let public_dir = scan_dir.join("public");
        if !public_dir.is_dir() {
            continue;
        }
        let public_value = path_value(&public_dir);
        if assets.iter().any(|a| a.get("dir") == Some(&public_value)) {
            continue;
        }
        let mut asset = serde_json::Map::new();
        asset.insert("dir".into(), public_value);
        asset.insert("baseURL".into(), Value::String("/".into()));
        assets.push(asset);
    }

    for asset in &mut assets {
        let top_level = asset.get("baseURL").and_then(Value::as_str) == Some("/");
        asset.entry("fallthrough").or_insert(Value::Bool(top_level));
        asset
            .entry("maxAge")
            .or_insert(json!(if top_level { 0 } else { 60 }));
    }

    v["publicAssets"] = Value::Array(assets.into_iter().map(Value::Object).collect());
    Ok(())
}

fn normalize_server_assets(v: &mut Value, src_dir: &Path) {
    let mut assets: Vec<Value> = v
        .get("serverAssets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for asset in &mut assets {
        if let Some(dir) = asset.get("dir").and_then(Value::as_str) {
            let dir = absolute(src_dir, Path::new(dir));
            asset["dir"] = path_value(&dir);
        }
    }
    assets.push(json!({ "baseName": "server", "dir": path_value(&src_dir.join("assets")) }));
    v["serverAssets"] = Value::Array(assets);
}

fn normalize_dev_storage(v: &mut Value, root_dir: &Path, src_dir: &Path, build_dir: &Path) {
    if !v.get("devStorage").is_some_and(Value::is_object) {
        v["devStorage"] = json!({});
    }
    let mounts = [
        ("root", root_dir.to_path_buf()),
        ("src", src_dir.to_path_buf()),
        ("build", build_dir.to_path_buf()),
        ("cache", build_dir.join("cache")),
    ];
    if let Some(dev_storage) = v["devStorage"].as_object_mut() {
        for (name, base) in mounts {
            dev_storage
                .entry(name)
                .or_insert_with(|| json!({ "driver": "fs", "base": path_value(&base) }));
        }
    }
}
