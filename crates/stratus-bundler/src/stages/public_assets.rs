use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;

use super::ids;
use crate::assets::{AssetMeta, list_files, relative_path};
use crate::context::BuildContext;
use crate::pipeline::{Stage, StageOutput};
use crate::vfs::VirtualContent;
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct PublicAsset {
    #[serde(flatten)]
    meta: AssetMeta,
    path: String,
}

/// Static file manifest of the public output directory.
#[derive(Debug, Default)]
pub struct PublicAssetsStage;

/// `export default { "/<file>": { type, etag, mtime, path } }` for
/// everything under `public_dir`. `path` is relative to `server_dir`.
pub fn data_module(public_dir: &Path, server_dir: &Path) -> Result<String> {
    let mut assets: IndexMap<String, PublicAsset> = IndexMap::new();
    for (rel, path) in list_files(public_dir)? {
        assets.insert(
            format!("/{rel}"),
            PublicAsset {
                meta: AssetMeta::read(&path)?,
                path: relative_path(server_dir, &path),
            },
        );
    }
    let json = serde_json::to_string_pretty(&assets)
        .map_err(|e| Error::WriteFailure(format!("public asset manifest: {e}")))?;
    Ok(format!("export default {json};"))
}

const NODE_MODULE: &str = r#"
import { promises as fsp } from 'fs'
import { resolve } from 'pathe'
import { dirname } from 'pathe'
import { fileURLToPath } from 'url'
import assets from '#internal/stratus/virtual/public-assets-data'
export function readAsset (id) {
  const serverDir = dirname(fileURLToPath(import.meta.url))
  return fsp.readFile(resolve(serverDir, assets[id].path))
}"#;

fn main_module(serve_static: bool, bases: &[&str]) -> String {
    let read_asset = if serve_static {
        format!("export * from \"{}\"", ids::PUBLIC_ASSETS_NODE)
    } else {
        "export const readAsset = () => Promise.resolve(null)".to_string()
    };
    let bases = serde_json::to_string(bases).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
import assets from '{data}'
{read_asset}

export const publicAssetBases = {bases}

export function isPublicAssetURL(id = '') {{
  if (assets[id]) {{
    return
  }}
  for (const base of publicAssetBases) {{
    if (id.startsWith(base)) {{ return true }}
  }}
  return false
}}

export function getAsset (id) {{
  return assets[id]
}}
"#,
        data = ids::PUBLIC_ASSETS_DATA
    )
}

#[async_trait]
impl Stage for PublicAssetsStage {
    fn name(&self) -> &'static str {
        "public-assets"
    }

    fn contribute(&self, ctx: &BuildContext) -> Result<StageOutput> {
        let options = &ctx.options;
        let bases: Vec<&str> = options
            .public_assets
            .iter()
            .filter(|dir| !dir.fallthrough && dir.base_url != "/")
            .map(|dir| dir.base_url.as_str())
            .collect();

        // Public files are copied before bundling starts, so list them late.
        let public_dir = options.output.public_dir.clone();
        let server_dir = options.output.server_dir.clone();
        let data = VirtualContent::deferred(move || data_module(&public_dir, &server_dir));

        Ok(StageOutput::default()
            .module(ids::PUBLIC_ASSETS_DATA, data)
            .module(ids::PUBLIC_ASSETS_NODE, NODE_MODULE)
            .module(ids::PUBLIC_ASSETS, main_module(options.serve_static, &bases)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    #[test]
    fn data_points_back_from_server_dir() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("out/public");
        std::fs::create_dir_all(public.join("css")).unwrap();
        std::fs::write(public.join("css/app.css"), "body{}").unwrap();

        let code = data_module(&public, &dir.path().join("out/server")).unwrap();
        let json: Value = serde_json::from_str(
            code.trim_start_matches("export default ").trim_end_matches(';'),
        )
        .unwrap();
        let entry = &json["/css/app.css"];
        assert_eq!(entry["type"], "text/css; charset=utf-8");
        assert_eq!(entry["path"], "../public/css/app.css");
        assert!(entry["etag"].as_str().unwrap().starts_with("\"6-"));
    }

    #[test]
    fn non_fallthrough_bases_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("static")).unwrap();
        let options = load_options(
            json!({
                "serveStatic": true,
                "publicAssets": [
                    { "dir": "static", "baseURL": "/_static" },
                    { "dir": "static", "baseURL": "/docs", "fallthrough": true }
                ]
            }),
            &Environment::new(dir.path()),
        )
        .unwrap();
        let ctx = BuildContext::new(Arc::new(options), Vec::new());

        let output = PublicAssetsStage.contribute(&ctx).unwrap();
        let (_, main) = output
            .modules
            .iter()
            .find(|(id, _)| id == ids::PUBLIC_ASSETS)
            .unwrap();
        let code = main.render().unwrap();
        assert!(code.contains(r#"export const publicAssetBases = ["/_static"]"#));
        assert!(code.contains("export * from \"#internal/stratus/virtual/public-assets-node\""));
    }
}
