//! Virtual module registry.
//!
//! Stages register synthetic modules into a [`RegistryBuilder`] while the
//! pipeline is assembled. The builder is frozen into an immutable
//! [`VirtualRegistry`] before bundling starts; from then on the only mutable
//! part is the side cache of rendered contents used by the dev VFS viewer.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use path_clean::PathClean;

use crate::{Error, Result};

/// Namespace prefix of internal ids handed to the bundler.
pub const VIRTUAL_PREFIX: &str = "\0virtual:";

type Producer = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Module content: literal text or a deferred producer.
#[derive(Clone)]
pub enum VirtualContent {
    Text(String),
    /// Evaluated on every load, so late-bound data (e.g. a file listing
    /// produced during the build) is picked up.
    Deferred(Producer),
}

impl VirtualContent {
    pub fn deferred<F>(producer: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        VirtualContent::Deferred(Arc::new(producer))
    }

    pub fn render(&self) -> Result<String> {
        match self {
            VirtualContent::Text(text) => Ok(text.clone()),
            VirtualContent::Deferred(producer) => producer(),
        }
    }
}

impl fmt::Debug for VirtualContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualContent::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            VirtualContent::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl From<String> for VirtualContent {
    fn from(value: String) -> Self {
        VirtualContent::Text(value)
    }
}

impl From<&str> for VirtualContent {
    fn from(value: &str) -> Self {
        VirtualContent::Text(value.to_string())
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    modules: IndexMap<String, VirtualContent>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. The first registration of an id wins.
    ///
    /// Returns `false` when `id` was already registered.
    pub fn register(&mut self, id: impl Into<String>, content: impl Into<VirtualContent>) -> bool {
        let id = id.into();
        if self.modules.contains_key(&id) {
            tracing::warn!(id = %id, "duplicate virtual module ignored");
            return false;
        }
        self.modules.insert(id, content.into());
        true
    }

    pub fn extend<I>(&mut self, modules: I)
    where
        I: IntoIterator<Item = (String, VirtualContent)>,
    {
        for (id, content) in modules {
            self.register(id, content);
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn freeze(self) -> VirtualRegistry {
        let paths = self
            .modules
            .keys()
            .filter(|id| Path::new(id.as_str()).is_absolute())
            .map(|id| (PathBuf::from(id).clean(), id.clone()))
            .collect();

        VirtualRegistry {
            inner: Arc::new(Inner {
                modules: self.modules,
                paths,
                cache: RwLock::new(IndexMap::new()),
            }),
        }
    }
}

struct Inner {
    modules: IndexMap<String, VirtualContent>,
    /// Absolute-path ids, so relative imports between virtual modules resolve.
    paths: HashMap<PathBuf, String>,
    cache: RwLock<IndexMap<String, String>>,
}

/// Frozen, cheaply cloneable registry.
#[derive(Clone)]
pub struct VirtualRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for VirtualRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualRegistry")
            .field("modules", &self.inner.modules.len())
            .field("cached", &self.inner.cache.read().len())
            .finish()
    }
}

impl Default for VirtualRegistry {
    fn default() -> Self {
        RegistryBuilder::default().freeze()
    }
}

impl VirtualRegistry {
    /// Maps a specifier to its namespaced internal id, or declines.
    pub fn resolve(&self, specifier: &str, importer: Option<&str>) -> Option<String> {
        if self.inner.modules.contains_key(specifier) {
            return Some(format!("{VIRTUAL_PREFIX}{specifier}"));
        }

        let importer = importer?;
        let importer = importer.strip_prefix(VIRTUAL_PREFIX).unwrap_or(importer);
        let base = Path::new(importer).parent()?;
        let candidate = base.join(specifier).clean();
        self.inner
            .paths
            .get(&candidate)
            .map(|id| format!("{VIRTUAL_PREFIX}{id}"))
    }

    /// Renders the module behind an internal id and records it in the side
    /// cache.
    ///
    /// Returns `Ok(None)` for ids outside the virtual namespace.
    ///
    /// # Errors
    ///
    /// `UnregisteredVirtual` when a namespaced id was never registered. The
    /// resolve step gates every load, so this indicates an internal bug.
    pub fn load(&self, internal_id: &str) -> Result<Option<String>> {
        let Some(id) = internal_id.strip_prefix(VIRTUAL_PREFIX) else {
            return Ok(None);
        };
        let content = self
            .inner
            .modules
            .get(id)
            .ok_or_else(|| Error::UnregisteredVirtual { id: id.to_string() })?;
        let rendered = content.render()?;
        self.inner
            .cache
            .write()
            .insert(id.to_string(), rendered.clone());
        Ok(Some(rendered))
    }

    /// Cached rendering, falling back to a fresh render.
    pub fn contents(&self, id: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cached(id) {
            return Ok(Some(cached));
        }
        self.inner
            .modules
            .get(id)
            .map(VirtualContent::render)
            .transpose()
    }

    pub fn cached(&self, id: &str) -> Option<String> {
        self.inner.cache.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.modules.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.inner.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.modules.is_empty()
    }
}
