use async_trait::async_trait;
use stratus_config::ServerAssetDir;

use super::{ids, js_string};
use crate::assets::{AssetMeta, list_files};
use crate::context::BuildContext;
use crate::pipeline::{Stage, StageOutput};
use crate::storage::{NORMALIZE_KEY_JS, normalize_key};
use crate::vfs::VirtualContent;
use crate::{Error, Result};

/// Exposes server asset groups as a storage-like `assets` object.
///
/// Dev and prerender builds mount each group from disk; production builds
/// embed a metadata table and import contents lazily.
#[derive(Debug, Default)]
pub struct ServerAssetsStage;

fn dev_module(groups: &[ServerAssetDir]) -> Result<String> {
    let groups = serde_json::to_string(groups)
        .map_err(|e| Error::InvalidConfig(format!("serverAssets: {e}")))?;
    Ok(format!(
        r#"
import {{ createStorage }} from 'unstorage'
import fsDriver from 'unstorage/drivers/fs'

const serverAssets = {groups}

export const assets = createStorage()

for (const asset of serverAssets) {{
  assets.mount(asset.baseName, fsDriver({{ base: asset.dir }}))
}}"#
    ))
}

/// Production table over every file of every group.
pub fn prod_module(groups: &[ServerAssetDir]) -> Result<String> {
    let mut entries = Vec::new();
    for group in groups {
        for (rel, path) in list_files(&group.dir)? {
            let key = normalize_key(&format!("{}/{rel}", group.base_name));
            let meta = serde_json::to_string(&AssetMeta::read(&path)?)
                .map_err(|e| Error::WriteFailure(format!("{}: {e}", path.display())))?;
            let fs_path = path.to_string_lossy().replace('\\', "/");
            entries.push(format!(
                "  [{}]: {{\n    import: () => import({}).then(r => r.default || r),\n    meta: {meta}\n  }}",
                js_string(&key),
                js_string(&format!("raw:{fs_path}")),
            ));
        }
    }

    Ok(format!(
        r#"
const _assets = {{
{entries}
}}

{NORMALIZE_KEY_JS}

export const assets = {{
  getKeys() {{
    return Promise.resolve(Object.keys(_assets))
  }},
  hasItem (id) {{
    id = normalizeKey(id)
    return Promise.resolve(id in _assets)
  }},
  getItem (id) {{
    id = normalizeKey(id)
    return Promise.resolve(_assets[id] ? _assets[id].import() : null)
  }},
  getMeta (id) {{
    id = normalizeKey(id)
    return Promise.resolve(_assets[id] ? _assets[id].meta : {{}})
  }}
}}
"#,
        entries = entries.join(",\n")
    ))
}

#[async_trait]
impl Stage for ServerAssetsStage {
    fn name(&self) -> &'static str {
        "server-assets"
    }

    fn contribute(&self, ctx: &BuildContext) -> Result<StageOutput> {
        let groups: Vec<ServerAssetDir> = ctx.server_assets().cloned().collect();
        let content = if ctx.reads_from_disk() {
            VirtualContent::from(dev_module(&groups)?)
        } else {
            VirtualContent::deferred(move || prod_module(&groups))
        };
        Ok(StageOutput::default().module(ids::SERVER_ASSETS, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    #[test]
    fn production_table_lists_files_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        std::fs::create_dir_all(assets.join("emails")).unwrap();
        std::fs::write(assets.join("emails/welcome.html"), "<p>hi</p>").unwrap();

        let code = prod_module(&[ServerAssetDir {
            base_name: "server".into(),
            dir: assets.clone(),
        }])
        .unwrap();
        assert!(code.contains(r#"["server:emails:welcome.html"]"#));
        assert!(code.contains(&format!(
            r#"import("raw:{}")"#,
            assets.join("emails/welcome.html").to_string_lossy()
        )));
        assert!(code.contains(r#""type":"text/html; charset=utf-8""#));
        assert!(code.contains("function normalizeKey"));
    }

    #[test]
    fn dev_builds_mount_directories() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_options(json!({ "dev": true }), &Environment::new(dir.path())).unwrap();
        let ctx = BuildContext::new(Arc::new(options), Vec::new());

        let output = ServerAssetsStage.contribute(&ctx).unwrap();
        let (id, content) = &output.modules[0];
        assert_eq!(id, ids::SERVER_ASSETS);
        let code = content.render().unwrap();
        assert!(code.contains("assets.mount(asset.baseName, fsDriver({ base: asset.dir }))"));
        assert!(code.contains(r#""baseName":"server""#));
    }
}
