use std::fs;
use std::path::Path;

use serde_json::json;
use stratus_config::{ConfigError, Environment, OutputFormat, Preset, PresetRegistry, load_options, load_options_with};
use tempfile::TempDir;

fn project() -> (TempDir, Environment) {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::new(dir.path());
    (dir, env)
}

#[test]
fn node_server_defaults() {
    let (dir, env) = project();
    let options = load_options(json!({}), &env).unwrap();

    assert_eq!(options.preset, "node-server");
    assert_eq!(options.root_dir, dir.path());
    assert_eq!(options.build_dir, dir.path().join(".stratus"));
    assert_eq!(options.output.dir, dir.path().join(".output"));
    assert_eq!(options.output.server_dir, dir.path().join(".output/server"));
    assert_eq!(options.output.public_dir, dir.path().join(".output/public"));
    assert_eq!(
        options.entry,
        dir.path()
            .join("node_modules/stratus/runtime/entries/node-server")
    );
    assert_eq!(options.scan_dirs, vec![dir.path().to_path_buf()]);
    assert_eq!(options.base_url, "/");
    assert!(options.serve_static);
    assert!(options.externals.trace);
    assert_eq!(
        options.commands.preview.as_deref(),
        Some("node ./server/index.mjs")
    );
}

#[test]
fn missing_entry_names_the_preset() {
    let (_dir, env) = project();
    let err = load_options(json!({ "preset": "base-worker" }), &env).unwrap_err();
    match err {
        ConfigError::MissingEntry { preset } => assert_eq!(preset, "base-worker"),
        other => panic!("expected missing entry, got {other:?}"),
    }
    let message = load_options(json!({ "preset": "baseWorker" }), &env)
        .unwrap_err()
        .to_string();
    assert_eq!(message, "entry is missing! Is \"base-worker\" preset correct?");
}

#[test]
fn dev_forces_dev_preset() {
    let (dir, env) = project();
    let options = load_options(json!({ "preset": "vercel", "dev": true }), &env).unwrap();
    assert_eq!(options.preset, "dev");
    assert_eq!(options.output.server_dir, dir.path().join(".stratus/dev"));
    assert!(!options.externals.trace);
    assert!(options.inline_dynamic_imports);
    assert_eq!(options.node_env(), "development");
}

#[test]
fn preset_templates_reference_output_dir() {
    let (dir, env) = project();
    let options = load_options(json!({ "preset": "vercel" }), &env).unwrap();
    let out = dir.path().join(".vercel_build_output");
    assert_eq!(options.output.dir, out);
    assert_eq!(options.output.server_dir, out.join("functions/node/server"));
    assert_eq!(options.output.public_dir, out.join("static"));
}

#[test]
fn user_config_wins_over_preset() {
    let (dir, env) = project();
    let options = load_options(
        json!({
            "preset": "cloudflare",
            "minify": false,
            "output": { "dir": "dist" }
        }),
        &env,
    )
    .unwrap();
    assert!(!options.minify);
    assert!(!options.node);
    assert!(options.no_externals);
    assert_eq!(options.format, OutputFormat::Iife);
    assert_eq!(options.output.dir, dir.path().join("dist"));
    assert_eq!(options.output.server_dir, dir.path().join("dist/server"));
}

#[test]
fn env_detection_selects_provider() {
    let (_dir, env) = project();
    let options = load_options(json!({}), &env.with_var("NETLIFY", "true")).unwrap();
    assert_eq!(options.preset, "netlify");
    assert_eq!(options.entry_file_name, "server.ts");
}

#[test]
fn project_files_select_provider() {
    let (dir, env) = project();
    fs::write(dir.path().join("vercel.json"), "{}").unwrap();
    let options = load_options(json!({}), &env).unwrap();
    assert_eq!(options.preset, "vercel");
}

#[test]
fn dev_storage_gets_fs_mounts() {
    let (dir, env) = project();
    let options = load_options(
        json!({ "devStorage": { "cache": { "driver": "memory" } } }),
        &env,
    )
    .unwrap();

    let root = &options.dev_storage["root"];
    assert_eq!(root.driver, "fs");
    assert_eq!(root.base().map(Path::new), Some(dir.path()));
    assert_eq!(
        options.dev_storage["build"].base().map(Path::new),
        Some(dir.path().join(".stratus").as_path())
    );
    assert_eq!(options.dev_storage["cache"].driver, "memory");
}

#[test]
fn public_dir_is_added_automatically() {
    let (dir, env) = project();
    fs::create_dir_all(dir.path().join("public")).unwrap();

    let options = load_options(
        json!({ "publicAssets": [{ "dir": "static", "baseURL": "assets/" }] }),
        &env,
    )
    .unwrap();

    assert_eq!(options.public_assets.len(), 2);
    let custom = &options.public_assets[0];
    assert_eq!(custom.dir, dir.path().join("static"));
    assert_eq!(custom.base_url, "/assets");
    assert!(!custom.fallthrough);
    assert_eq!(custom.max_age, 60);

    let public = &options.public_assets[1];
    assert_eq!(public.dir, dir.path().join("public"));
    assert_eq!(public.base_url, "/");
    assert!(public.fallthrough);
    assert_eq!(public.max_age, 0);
}

#[test]
fn server_assets_always_include_server_group() {
    let (dir, env) = project();
    let options = load_options(json!({ "srcDir": "src" }), &env).unwrap();
    let last = options.server_assets.last().unwrap();
    assert_eq!(last.base_name, "server");
    assert_eq!(last.dir, dir.path().join("src/assets"));
    assert_eq!(options.scan_dirs, vec![dir.path().join("src")]);
}

#[test]
fn base_url_and_runtime_config() {
    let (_dir, env) = project();
    let options = load_options(
        json!({ "baseURL": "app", "routes": { "/api/**": { "cors": true } } }),
        &env.with_var("STRATUS_APP_BASE_URL", "/ignored/"),
    )
    .unwrap();
    assert_eq!(options.base_url, "/app/");
    assert_eq!(options.runtime_config["app"]["baseURL"], "/app/");
    assert_eq!(
        options.runtime_config["stratus"]["routes"]["/api/**"]["cors"],
        true
    );
}

#[test]
fn runtime_alias_is_registered() {
    let (dir, env) = project();
    let options = load_options(json!({ "runtimeDir": "runtime" }), &env).unwrap();
    assert_eq!(options.runtime_dir, dir.path().join("runtime"));
    assert_eq!(
        Path::new(&options.alias["#internal/stratus"]),
        dir.path().join("runtime")
    );
    assert_eq!(options.entry, dir.path().join("runtime/entries/node-server"));
}

#[test]
fn node_modules_dirs_are_deduplicated() {
    let (dir, env) = project();
    let options = load_options(
        json!({ "nodeModulesDirs": ["node_modules", "../shared/node_modules"] }),
        &env,
    )
    .unwrap();
    assert_eq!(options.node_modules_dirs.len(), 2);
    assert_eq!(options.node_modules_dirs[0], dir.path().join("node_modules"));
}

#[test]
fn auto_import_can_be_disabled() {
    let (_dir, env) = project();
    let enabled = load_options(json!({}), &env).unwrap();
    assert!(enabled.auto_import.is_some());

    let disabled = load_options(json!({ "autoImport": false }), &env).unwrap();
    assert!(disabled.auto_import.is_none());
}

#[test]
fn custom_preset_registry() {
    let (dir, env) = project();
    let mut registry = PresetRegistry::builtin();
    registry.register(
        "my-host",
        Preset::new(json!({ "output": { "dir": "{{ rootDir }}/.my-host" } })).extends("node-server"),
    );
    let options = load_options_with(&registry, json!({ "preset": "myHost" }), &env).unwrap();
    assert_eq!(options.preset, "my-host");
    assert_eq!(options.output.dir, dir.path().join(".my-host"));
}

#[test]
fn non_object_config_is_rejected() {
    let (_dir, env) = project();
    assert!(matches!(
        load_options(json!([1, 2]), &env),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn dev_server_watch_paths_are_absolute() {
    let (dir, env) = project();
    let options = load_options(
        json!({ "devServer": { "watch": ["server", "{{ rootDir }}/shared", "/abs/dir"] } }),
        &env,
    )
    .unwrap();
    assert_eq!(
        options.dev_server.watch,
        vec![
            dir.path().join("server"),
            dir.path().join("shared"),
            Path::new("/abs/dir").to_path_buf(),
        ]
    );
}

#[test]
fn renderer_resolves_like_entry() {
    let (dir, env) = project();
    let options = load_options(json!({ "renderer": "./renderer.ts" }), &env).unwrap();
    assert_eq!(options.renderer, Some(dir.path().join("renderer.ts")));

    let options = load_options(json!({ "renderer": "#internal/stratus/renderer" }), &env).unwrap();
    assert_eq!(
        options.renderer,
        Some(dir.path().join("node_modules/stratus/runtime/renderer"))
    );

    assert_eq!(load_options(json!({ "renderer": "" }), &env).unwrap().renderer, None);
}
