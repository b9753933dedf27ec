//! Build-time key/value storage.
//!
//! Mirrors the runtime storage contract closely enough to snapshot
//! `bundledStorage` bases into the build: drivers are mounted under
//! colon-separated key prefixes and each key goes to the longest matching
//! mount. Only drivers that make sense inside the build process (`fs`,
//! `memory`) can be opened here; every other driver is still a valid
//! runtime mount and only shows up in the generated storage module.

mod snapshot;

pub use snapshot::{BUNDLED_ASSETS_BASE, snapshot_storage};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use stratus_config::StorageMount;
use walkdir::WalkDir;

use crate::{Error, Result};

/// Driver names with a bundled runtime implementation.
pub const BUILTIN_DRIVERS: [&str; 5] = ["fs", "http", "memory", "redis", "cloudflare-kv"];

/// Runtime module implementing `driver`. Unknown names pass through.
pub fn driver_module(driver: &str) -> String {
    if BUILTIN_DRIVERS.contains(&driver) {
        format!("unstorage/drivers/{driver}")
    } else {
        driver.to_string()
    }
}

/// Runtime counterpart of [`normalize_key`], embedded in generated modules.
pub const NORMALIZE_KEY_JS: &str = r#"function normalizeKey(key) {
  if (!key) {
    return "";
  }
  return key.split("?")[0].replace(/[/\\]/g, ":").replace(/:+/g, ":").replace(/^:|:$/g, "");
}"#;

/// Canonical storage key: no query, `:` separators, no empty segments.
pub fn normalize_key(key: &str) -> String {
    let key = key.split('?').next().unwrap_or_default();
    key.split(['/', '\\', ':'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

/// A mount base: normalized key plus a trailing `:`, or empty for the root.
pub fn normalize_base(base: &str) -> String {
    let key = normalize_key(base);
    if key.is_empty() { key } else { format!("{key}:") }
}

/// Flat key/value driver.
#[async_trait]
pub trait StorageDriver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn has_item(&self, key: &str) -> Result<bool>;

    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Keys under `base`, relative to the driver root.
    async fn get_keys(&self, base: &str) -> Result<Vec<String>>;

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Keys map to files below `base`, one path segment per key segment.
#[derive(Debug, Clone)]
pub struct FsDriver {
    base: PathBuf,
}

impl FsDriver {
    const IGNORED: [&'static str; 2] = ["node_modules", ".git"];

    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let key = normalize_key(key);
        let rel: PathBuf = key.split(':').collect();
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Storage {
                mount: self.base.display().to_string(),
                message: format!("key \"{key}\" escapes the storage directory"),
            });
        }
        Ok(self.base.join(rel))
    }
}

#[async_trait]
impl StorageDriver for FsDriver {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn has_item(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.path_for(key)?)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(format!("Failed to read {}", path.display()), e)),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))
    }

    async fn get_keys(&self, base: &str) -> Result<Vec<String>> {
        let root = self.base.clone();
        let base = normalize_base(base);
        let keys = tokio::task::spawn_blocking(move || list_keys(&root))
            .await
            .map_err(|e| Error::io("storage key listing panicked", std::io::Error::other(e)))??;
        Ok(keys.into_iter().filter(|k| k.starts_with(&base)).collect())
    }
}

fn list_keys(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !FsDriver::IGNORED.iter().any(|i| e.file_name() == *i));
    for entry in walker {
        let entry = entry.map_err(|e| Error::IoError {
            message: format!("Failed to list {}", root.display()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            keys.push(normalize_key(&rel.to_string_lossy()));
        }
    }
    keys.sort();
    Ok(keys)
}

/// Process-local map.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has_item(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(&normalize_key(key)))
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(&normalize_key(key)).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .insert(normalize_key(key), value.to_string());
        Ok(())
    }

    async fn get_keys(&self, base: &str) -> Result<Vec<String>> {
        let base = normalize_base(base);
        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(&base))
            .cloned()
            .collect())
    }

    async fn dispose(&self) -> Result<()> {
        self.data.write().clear();
        Ok(())
    }
}

/// Opens a build-time driver for `mount`, or `None` when the driver only
/// exists at runtime.
pub fn open_driver(mount: &StorageMount) -> Option<Arc<dyn StorageDriver>> {
    match mount.driver.as_str() {
        "fs" => mount
            .base()
            .map(|base| Arc::new(FsDriver::new(base)) as Arc<dyn StorageDriver>),
        "memory" => Some(Arc::new(MemoryDriver::new())),
        _ => None,
    }
}

/// Mount table over several drivers.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Sorted by base length, longest first.
    mounts: Vec<(String, Arc<dyn StorageDriver>)>,
    root: Arc<dyn StorageDriver>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    /// An empty table with an in-memory root mount.
    pub fn new() -> Self {
        Self {
            mounts: Vec::new(),
            root: Arc::new(MemoryDriver::new()),
        }
    }

    /// Mounts every driver that can be opened at build time.
    ///
    /// Runtime-only drivers are skipped with a warning.
    pub fn from_mounts(mounts: &IndexMap<String, StorageMount>) -> Self {
        let mut storage = Self::new();
        for (base, mount) in mounts {
            match open_driver(mount) {
                Some(driver) => storage.mount(base, driver),
                None => tracing::warn!(
                    mount = %base,
                    driver = %mount.driver,
                    "storage driver is not available at build time, skipping"
                ),
            }
        }
        storage
    }

    /// Mounts `driver` at `base`, replacing any driver already there.
    pub fn mount(&mut self, base: &str, driver: Arc<dyn StorageDriver>) {
        let base = normalize_base(base);
        if base.is_empty() {
            self.root = driver;
            return;
        }
        self.mounts.retain(|(b, _)| *b != base);
        self.mounts.push((base, driver));
        self.mounts.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Mount bases, longest first, ending with the root.
    pub fn mount_bases(&self) -> impl Iterator<Item = &str> {
        self.all_mounts().map(|(base, _)| base)
    }

    fn all_mounts(&self) -> impl Iterator<Item = (&str, &Arc<dyn StorageDriver>)> {
        self.mounts
            .iter()
            .map(|(base, driver)| (base.as_str(), driver))
            .chain(std::iter::once(("", &self.root)))
    }

    fn mount_for(&self, key: &str) -> (&Arc<dyn StorageDriver>, String) {
        let key = normalize_key(key);
        self.mounts
            .iter()
            .find(|(base, _)| key.starts_with(base.as_str()) || format!("{key}:") == *base)
            .map(|(base, driver)| (driver, key.get(base.len()..).unwrap_or_default().to_string()))
            .unwrap_or_else(|| (&self.root, key.clone()))
    }

    pub async fn has_item(&self, key: &str) -> Result<bool> {
        let (driver, rel) = self.mount_for(key);
        driver.has_item(&rel).await
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let (driver, rel) = self.mount_for(key);
        driver.get_item(&rel).await
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let (driver, rel) = self.mount_for(key);
        driver.set_item(&rel, value).await
    }

    /// Every key under `base`, across all mounts that overlap it.
    pub async fn get_keys(&self, base: &str) -> Result<Vec<String>> {
        let base = normalize_base(base);
        let mut keys = Vec::new();
        for (mount_base, driver) in self.all_mounts() {
            let relative_base = if base.starts_with(mount_base) {
                &base[mount_base.len()..]
            } else if mount_base.starts_with(&base) {
                ""
            } else {
                continue;
            };
            for key in driver.get_keys(relative_base).await? {
                let full = format!("{mount_base}{key}");
                // Keys under a deeper mount belong to that mount.
                let shadowed = self
                    .mount_bases()
                    .any(|other| other.len() > mount_base.len() && full.starts_with(other));
                if !shadowed && full.starts_with(&base) {
                    keys.push(full);
                }
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    pub async fn dispose(&self) -> Result<()> {
        for (_, driver) in self.all_mounts() {
            driver.dispose().await?;
        }
        Ok(())
    }
}
