use async_trait::async_trait;
use indexmap::IndexSet;

use super::{ids, js_string, serialize_import_name};
use crate::context::BuildContext;
use crate::pipeline::{Stage, StageOutput};
use crate::storage::{BUNDLED_ASSETS_BASE, driver_module};
use crate::{Error, Result};

/// Generates the runtime `useStorage()` module.
#[derive(Debug, Default)]
pub struct StorageStage;

fn bundled_overlay(bases: &[String]) -> Result<String> {
    let bases = serde_json::to_string(bases)
        .map_err(|e| Error::InvalidConfig(format!("bundledStorage: {e}")))?;
    Ok(format!(
        r#"
import {{ prefixStorage }} from 'unstorage'
import overlay from 'unstorage/drivers/overlay'
import memory from 'unstorage/drivers/memory'

const bundledStorage = {bases}
for (const base of bundledStorage) {{
  storage.mount(base, overlay({{
    layers: [
      memory(),
      prefixStorage(storage, 'assets:{BUNDLED_ASSETS_BASE}:' + base)
    ]
  }}))
}}"#
    ))
}

pub fn storage_module(ctx: &BuildContext) -> Result<String> {
    let options = &ctx.options;
    let mounts = options.storage_mounts();

    let drivers: IndexSet<String> = mounts.values().map(|m| driver_module(&m.driver)).collect();
    let imports: Vec<String> = drivers
        .iter()
        .map(|d| format!("import {} from {}", serialize_import_name(d), js_string(d)))
        .collect();

    let mut mount_lines = Vec::with_capacity(mounts.len());
    for (path, mount) in &mounts {
        let opts = serde_json::to_string(mount)
            .map_err(|e| Error::Storage {
                mount: path.clone(),
                message: e.to_string(),
            })?;
        mount_lines.push(format!(
            "storage.mount({}, {}({opts}))",
            js_string(path),
            serialize_import_name(&driver_module(&mount.driver))
        ));
    }

    let overlay = if !ctx.reads_from_disk() && !options.bundled_storage.is_empty() {
        bundled_overlay(&options.bundled_storage)?
    } else {
        String::new()
    };

    Ok(format!(
        r#"
import {{ createStorage }} from 'unstorage'
import {{ assets }} from '{server_assets}'

{imports}

const storage = createStorage({{}})

export const useStorage = () => storage

storage.mount('/assets', assets)

{mounts}

{overlay}
"#,
        server_assets = ids::SERVER_ASSETS,
        imports = imports.join("\n"),
        mounts = mount_lines.join("\n"),
    ))
}

#[async_trait]
impl Stage for StorageStage {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn contribute(&self, ctx: &BuildContext) -> Result<StageOutput> {
        Ok(StageOutput::default().module(ids::STORAGE, storage_module(ctx)?))
    }
}
