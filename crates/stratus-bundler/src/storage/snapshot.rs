use std::path::Path;

use stratus_config::{Options, ServerAssetDir};

use super::Storage;
use crate::{Error, Result};

/// Server-asset group that carries the storage snapshot.
pub const BUNDLED_ASSETS_BASE: &str = "stratus:bundled";

/// Copies every key under the `bundledStorage` bases into
/// `buildDir/snapshot`, one file per key.
///
/// Returns the server-asset group that serves the snapshot, or `None` when
/// nothing is bundled (or this is the prerender build, which reads storage
/// live).
pub async fn snapshot_storage(options: &Options) -> Result<Option<ServerAssetDir>> {
    if options.bundled_storage.is_empty() || options.is_prerender() {
        return Ok(None);
    }

    let snapshot_dir = options.build_dir.join("snapshot");
    let mut mounts = options.storage.clone();
    for (base, mount) in &options.dev_storage {
        mounts.insert(base.clone(), mount.clone());
    }
    let storage = Storage::from_mounts(&mounts);

    let mut keys = Vec::new();
    for base in &options.bundled_storage {
        keys.extend(storage.get_keys(base).await?);
    }
    keys.sort();
    keys.dedup();

    for key in &keys {
        let Some(contents) = storage.get_item(key).await? else {
            continue;
        };
        write_entry(&snapshot_dir, key, &contents).await?;
    }
    storage.dispose().await?;

    tracing::debug!(
        keys = keys.len(),
        dir = %snapshot_dir.display(),
        "bundled storage snapshot written"
    );

    Ok(Some(ServerAssetDir {
        base_name: BUNDLED_ASSETS_BASE.to_string(),
        dir: snapshot_dir,
    }))
}

async fn write_entry(dir: &Path, key: &str, contents: &str) -> Result<()> {
    let path = dir.join(key.replace(':', "/"));
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;
    }
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| Error::io(format!("Failed to write snapshot entry {}", path.display()), e))
}
