//! One-shot builds and the helpers the CLI runs around them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use stratus_config::{Handler, Options};
use walkdir::WalkDir;

use crate::assets::relative_path;
use crate::context::BuildContext;
use crate::output::{BuildManifest, FileTree, write_output};
use crate::pipeline::Pipeline;
use crate::scan::scan_handlers;
use crate::storage::snapshot_storage;
use crate::types::write_types;
use crate::vfs::VirtualRegistry;
use crate::{Error, Result};

static RELATIVE_COMMAND_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\./(\S*)").expect("valid command path regex"));

/// Outcome of a one-shot build.
#[derive(Debug)]
pub struct BuildResult {
    pub manifest: BuildManifest,
    pub manifest_path: PathBuf,
    pub handlers: Vec<Handler>,
    /// Files written into the server directory, traced dependencies excluded.
    pub files: usize,
    pub registry: VirtualRegistry,
    pub duration: Duration,
}

/// Empties the output, public and server directories.
pub async fn prepare(options: &Options) -> Result<()> {
    for dir in [
        &options.output.dir,
        &options.output.public_dir,
        &options.output.server_dir,
    ] {
        empty_dir(dir).await?;
    }
    Ok(())
}

async fn empty_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| Error::io(format!("Failed to clean {}", dir.display()), e))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))
}

/// Copies every existing public asset directory into `output.publicDir`,
/// below its base URL.
pub async fn copy_public_assets(options: &Options) -> Result<usize> {
    let mut copied = 0;
    for asset in &options.public_assets {
        if !tokio::fs::metadata(&asset.dir).await.is_ok_and(|m| m.is_dir()) {
            continue;
        }
        let target = options
            .output
            .public_dir
            .join(asset.base_url.trim_matches('/'));
        copied += copy_dir(&asset.dir, &target).await?;
    }
    tracing::info!(
        dir = %display_path(&options.output.public_dir),
        files = copied,
        "Generated public"
    );
    Ok(copied)
}

async fn copy_dir(from: &Path, to: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(|e| {
            Error::io(
                format!("Failed to read {}", from.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk error")),
            )
        })?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&dest)
                .await
                .map_err(|e| Error::io(format!("Failed to create {}", dest.display()), e))?;
        } else {
            tokio::fs::copy(entry.path(), &dest).await.map_err(|e| {
                Error::io(
                    format!("Failed to copy {} to {}", entry.path().display(), dest.display()),
                    e,
                )
            })?;
            count += 1;
        }
    }
    Ok(count)
}

/// Scans handlers and takes the storage snapshot for a new build.
pub async fn build_context(options: Arc<Options>) -> Result<BuildContext> {
    let scan_dirs = options.scan_dirs.clone();
    let scanned = tokio::task::spawn_blocking(move || scan_handlers(&scan_dirs))
        .await
        .map_err(|e| Error::io("handler scan panicked", std::io::Error::other(e)))??;
    tracing::debug!(handlers = scanned.len(), "handlers scanned");

    let snapshot = snapshot_storage(&options).await?;
    let mut ctx = BuildContext::new(options, scanned);
    if let Some(asset) = snapshot {
        ctx = ctx.with_server_asset(asset);
    }
    Ok(ctx)
}

/// Bundles `ctx` once, stages traced dependencies and writes the server
/// directory. Returns the frozen registry and the number of files written.
pub async fn compile(ctx: Arc<BuildContext>) -> Result<(VirtualRegistry, usize)> {
    let pipeline = Arc::new(Pipeline::for_build(Arc::clone(&ctx))?);
    tracing::debug!(stages = ?pipeline.stage_names(), "pipeline assembled");

    let artifacts = pipeline.bundle().await?;
    pipeline.build_end().await?;

    let files = artifacts.into_files();
    let server_dir = ctx.server_dir().to_path_buf();
    let count = files.len();
    tokio::task::spawn_blocking(move || write_output(&server_dir, &files))
        .await
        .map_err(|e| Error::io("output writer panicked", std::io::Error::other(e)))??;

    Ok((pipeline.registry().clone(), count))
}

/// Runs a complete production build.
pub async fn build(options: Arc<Options>) -> Result<BuildResult> {
    let started = Instant::now();

    let ctx = Arc::new(build_context(Arc::clone(&options)).await?);
    write_types(&ctx).await?;

    tracing::info!(preset = %options.preset, "Building server...");
    let (registry, files) = compile(Arc::clone(&ctx)).await.inspect_err(|e| {
        tracing::error!(error = %e, "build failed");
    })?;

    let manifest = BuildManifest::from_options(&options);
    let manifest_path = manifest.write(&options.output.dir)?;
    tracing::info!(preset = %options.preset, "Server built");

    if tracing::enabled!(tracing::Level::INFO) {
        let tree = FileTree::collect(&options.output.server_dir)?;
        let base = std::env::current_dir().unwrap_or_default();
        tracing::info!("\n{}", tree.render(&base));
    }
    log_commands(&options, &manifest);

    Ok(BuildResult {
        manifest,
        manifest_path,
        handlers: ctx.handlers.clone(),
        files,
        registry,
        duration: started.elapsed(),
    })
}

fn log_commands(options: &Options, manifest: &BuildManifest) {
    let output = display_path(&options.output.dir);
    if let Some(preview) = &manifest.commands.preview {
        tracing::info!(
            "You can preview this build using `{}`",
            rewrite_relative_paths(preview, &output)
        );
    }
    if let Some(deploy) = &manifest.commands.deploy {
        tracing::info!(
            "You can deploy this build using `{}`",
            rewrite_relative_paths(deploy, &output)
        );
    }
}

/// Points `./x` arguments of a command at the output directory.
pub fn rewrite_relative_paths(command: &str, output: &str) -> String {
    RELATIVE_COMMAND_PATH
        .replace_all(command, |caps: &regex::Captures<'_>| {
            format!(" {output}/{}", &caps[1])
        })
        .into_owned()
}

/// `path` relative to the working directory, when possible.
fn display_path(path: &Path) -> String {
    match std::env::current_dir() {
        Ok(cwd) if path.is_absolute() => relative_path(&cwd, path),
        _ => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use stratus_config::{Environment, load_options};

    #[test]
    fn commands_point_at_output() {
        assert_eq!(
            rewrite_relative_paths("node ./server/index.mjs", ".output"),
            "node .output/server/index.mjs"
        );
        assert_eq!(
            rewrite_relative_paths("cd ./cdk && npm run deploy", "dist"),
            "cd dist/cdk && npm run deploy"
        );
        assert_eq!(rewrite_relative_paths("wrangler publish", "x"), "wrangler publish");
    }

    #[tokio::test]
    async fn prepare_empties_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_options(json!({}), &Environment::new(dir.path())).unwrap();
        fs::create_dir_all(options.output.server_dir.join("old")).unwrap();
        fs::write(options.output.dir.join("stale.json"), "{}").unwrap();

        prepare(&options).await.unwrap();
        assert!(options.output.server_dir.is_dir());
        assert!(options.output.public_dir.is_dir());
        assert!(!options.output.dir.join("stale.json").exists());
        assert!(!options.output.server_dir.join("old").exists());
    }

    #[tokio::test]
    async fn public_assets_land_under_base_url() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public/img")).unwrap();
        fs::write(dir.path().join("public/robots.txt"), "User-agent: *").unwrap();
        fs::write(dir.path().join("public/img/a.png"), [0u8, 1]).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/intro.html"), "<p>").unwrap();

        let options = load_options(
            json!({ "publicAssets": [{ "dir": "docs", "baseURL": "/docs" }] }),
            &Environment::new(dir.path()),
        )
        .unwrap();
        prepare(&options).await.unwrap();
        let copied = copy_public_assets(&options).await.unwrap();

        let public = &options.output.public_dir;
        assert_eq!(copied, 3);
        assert!(public.join("robots.txt").is_file());
        assert!(public.join("img/a.png").is_file());
        assert!(public.join("docs/intro.html").is_file());
    }
}
