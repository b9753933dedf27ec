//! # stratus-prerender
//!
//! Generates static files for a fixed or crawled set of routes.
//!
//! [`crawl`] only needs something that implements
//! [`LocalFetch`](stratus_server::LocalFetch), so it can be driven by a
//! synthetic server. [`prerender`] is the full flow: build the app with the
//! `prerender` preset, start the built server as a worker, crawl it, and
//! stop it again.

pub mod crawl;
pub mod error;
pub mod links;

use std::sync::Arc;

use serde_json::Value;
use stratus_bundler::BuildManifest;
use stratus_config::{Environment, Options, PresetId, load_options};
use stratus_server::{WorkerCommand, WorkerFetch};

pub use crawl::{CrawlConfig, PrerenderReport, RouteError, RouteReport, crawl};
pub use error::{PrerenderError, Result};
pub use links::{PRERENDER_HEADER, extract_links};

/// Options for the prerender build: the app's own user config with the
/// `prerender` preset forced.
pub fn prerender_options(app: &Options, user_config: &Value, env: &Environment) -> Result<Options> {
    let mut config = match user_config {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    config.insert("preset".into(), PresetId::Prerender.name().into());
    config.insert("dev".into(), Value::Bool(false));
    config.insert(
        "rootDir".into(),
        app.root_dir.to_string_lossy().into_owned().into(),
    );
    Ok(load_options(Value::Object(config), env)?)
}

/// Prerender the app described by `app` into its public directory.
///
/// Returns an empty report without building when no routes are configured
/// and link crawling is off.
pub async fn prerender(
    app: &Options,
    user_config: &Value,
    env: &Environment,
) -> Result<PrerenderReport> {
    let config = CrawlConfig::new(&app.prerender, &app.base_url);
    if !config.is_enabled() {
        return Ok(PrerenderReport::default());
    }

    let options = Arc::new(prerender_options(app, user_config, env)?);
    tracing::info!(preset = %options.preset, "building prerenderer");
    stratus_bundler::build(options.clone()).await?;

    let manifest = BuildManifest::read(&options.output.dir)?;
    let entry = manifest
        .server_dir(&options.output.dir)
        .join(&options.entry_file_name);
    let worker = WorkerCommand::node(&entry)?.spawn().await?;

    let fetch = match WorkerFetch::new(worker.address()) {
        Ok(fetch) => fetch,
        Err(err) => {
            worker.kill().await;
            return Err(err.into());
        }
    };
    tracing::info!("prerendering routes");
    let report = crawl(&fetch, &config, &app.output.public_dir).await;
    worker.kill().await;

    let report = report?;
    let failed = report.failed().count();
    if failed > 0 {
        tracing::warn!(failed, total = report.routes.len(), "some routes failed to prerender");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prerender_build_reuses_the_user_config() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(dir.path());
        let user = json!({ "preset": "node-server", "baseURL": "/docs/", "minify": true });
        let app = load_options(user.clone(), &env).unwrap();

        let options = prerender_options(&app, &user, &env).unwrap();
        assert_eq!(options.preset, "prerender");
        assert_eq!(options.base_url, app.base_url);
        assert!(options.minify);
        assert_eq!(options.output.public_dir, app.output.public_dir);
        assert!(options.output.server_dir.ends_with(".stratus/prerender"));
    }

    #[tokio::test]
    async fn nothing_to_prerender_skips_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(dir.path());
        let app = load_options(json!({}), &env).unwrap();

        let report = prerender(&app, &json!({}), &env).await.unwrap();
        assert_eq!(report, PrerenderReport::default());
    }
}
