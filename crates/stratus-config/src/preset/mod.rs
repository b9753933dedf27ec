//! Deployment presets and their inheritance graph.
//!
//! A preset is a configuration fragment that may extend other presets.
//! Resolution walks the `extends` graph parent-first and fails on cycles.

mod catalog;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ConfigError, Result};

/// Built-in presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetId {
    Node,
    NodeServer,
    NodeCli,
    Dev,
    Prerender,
    BaseWorker,
    Cloudflare,
    ServiceWorker,
    AwsLambda,
    Netlify,
    NetlifyBuilder,
    NetlifyEdge,
    Vercel,
    RenderCom,
    Heroku,
    DigitalOcean,
    Stormkit,
}

impl PresetId {
    pub const ALL: [PresetId; 17] = [
        PresetId::Node,
        PresetId::NodeServer,
        PresetId::NodeCli,
        PresetId::Dev,
        PresetId::Prerender,
        PresetId::BaseWorker,
        PresetId::Cloudflare,
        PresetId::ServiceWorker,
        PresetId::AwsLambda,
        PresetId::Netlify,
        PresetId::NetlifyBuilder,
        PresetId::NetlifyEdge,
        PresetId::Vercel,
        PresetId::RenderCom,
        PresetId::Heroku,
        PresetId::DigitalOcean,
        PresetId::Stormkit,
    ];

    /// Canonical kebab-case name.
    pub fn name(&self) -> &'static str {
        match self {
            PresetId::Node => "node",
            PresetId::NodeServer => "node-server",
            PresetId::NodeCli => "node-cli",
            PresetId::Dev => "dev",
            PresetId::Prerender => "prerender",
            PresetId::BaseWorker => "base-worker",
            PresetId::Cloudflare => "cloudflare",
            PresetId::ServiceWorker => "service-worker",
            PresetId::AwsLambda => "aws-lambda",
            PresetId::Netlify => "netlify",
            PresetId::NetlifyBuilder => "netlify-builder",
            PresetId::NetlifyEdge => "netlify-edge",
            PresetId::Vercel => "vercel",
            PresetId::RenderCom => "render-com",
            PresetId::Heroku => "heroku",
            PresetId::DigitalOcean => "digital-ocean",
            PresetId::Stormkit => "stormkit",
        }
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let key = canonical_name(s);
        PresetId::ALL
            .into_iter()
            .find(|id| id.name() == key)
            .ok_or(ConfigError::UnknownPreset {
                name: s.to_string(),
            })
    }
}

/// Normalizes `nodeServer`, `node_server` and `node-server` to `node-server`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('-') {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '_' {
            out.push('-');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Where a preset's configuration comes from.
#[derive(Debug, Clone)]
pub enum PresetSource {
    Static(Value),
    /// Produced on demand each time the preset is resolved.
    Deferred(fn() -> Value),
}

impl PresetSource {
    fn produce(&self) -> Value {
        match self {
            PresetSource::Static(value) => value.clone(),
            PresetSource::Deferred(f) => f(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preset {
    pub extends: Vec<String>,
    pub source: PresetSource,
}

impl Preset {
    pub fn new(config: Value) -> Self {
        Self {
            extends: Vec::new(),
            source: PresetSource::Static(config),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends.push(parent.into());
        self
    }
}

/// A preset resolved through its inheritance chain.
#[derive(Debug, Clone)]
pub struct ResolvedPreset {
    /// Canonical name of the requested preset.
    pub name: String,
    /// Names in application order, parents first.
    pub chain: Vec<String>,
    /// Configuration layers in the same order as `chain`.
    pub layers: Vec<Value>,
}

/// Name-keyed preset graph.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: IndexMap<String, Preset>,
}

impl PresetRegistry {
    /// Registry containing every built-in preset.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for id in PresetId::ALL {
            registry.register(id.name(), catalog::definition(id));
        }
        registry
    }

    /// Adds or replaces a preset.
    pub fn register(&mut self, name: &str, preset: Preset) {
        self.presets.insert(canonical_name(name), preset);
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(&canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Resolves `name` and all of its ancestors, parents first.
    ///
    /// # Errors
    ///
    /// `UnknownPreset` when any name in the chain is not registered, and
    /// `PresetCycle` when a preset transitively extends itself.
    pub fn resolve(&self, name: &str) -> Result<ResolvedPreset> {
        let mut stack = Vec::new();
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut layers = Vec::new();
        self.visit(name, &mut stack, &mut seen, &mut chain, &mut layers)?;
        Ok(ResolvedPreset {
            name: canonical_name(name),
            chain,
            layers,
        })
    }

    fn visit(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        seen: &mut HashSet<String>,
        chain: &mut Vec<String>,
        layers: &mut Vec<Value>,
    ) -> Result<()> {
        let key = canonical_name(name);

        if let Some(pos) = stack.iter().position(|n| *n == key) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(key.clone());
            return Err(ConfigError::PresetCycle { preset: key, chain: cycle });
        }

        // Diamond inheritance: a shared ancestor is applied once.
        if !seen.insert(key.clone()) {
            return Ok(());
        }

        let preset = self
            .presets
            .get(&key)
            .ok_or_else(|| ConfigError::UnknownPreset { name: name.to_string() })?;

        stack.push(key.clone());
        for parent in &preset.extends {
            self.visit(parent, stack, seen, chain, layers)?;
        }
        stack.pop();

        chain.push(key);
        layers.push(preset.source.produce());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_name_accepts_camel_case() {
        assert_eq!(canonical_name("nodeServer"), "node-server");
        assert_eq!(canonical_name("awsLambda"), "aws-lambda");
        assert_eq!(canonical_name("node-server"), "node-server");
        assert_eq!(canonical_name("render_com"), "render-com");
    }

    #[test]
    fn preset_id_parses_both_spellings() {
        assert_eq!("digitalOcean".parse::<PresetId>().unwrap(), PresetId::DigitalOcean);
        assert_eq!("node-cli".parse::<PresetId>().unwrap(), PresetId::NodeCli);
        assert!("nope".parse::<PresetId>().is_err());
    }

    #[test]
    fn builtin_chain_is_parent_first() {
        let resolved = PresetRegistry::builtin().resolve("render-com").unwrap();
        assert_eq!(resolved.chain, vec!["node", "node-server", "render-com"]);
        assert_eq!(resolved.layers.len(), 3);
    }

    #[test]
    fn every_builtin_resolves() {
        let registry = PresetRegistry::builtin();
        for id in PresetId::ALL {
            let resolved = registry.resolve(id.name()).unwrap();
            assert_eq!(resolved.chain.last().map(String::as_str), Some(id.name()));
        }
    }

    #[test]
    fn cycle_is_reported_with_chain() {
        let mut registry = PresetRegistry::default();
        registry.register("a", Preset::new(json!({})).extends("b"));
        registry.register("b", Preset::new(json!({})).extends("c"));
        registry.register("c", Preset::new(json!({})).extends("a"));

        match registry.resolve("a") {
            Err(ConfigError::PresetCycle { preset, chain }) => {
                assert_eq!(preset, "a");
                assert_eq!(chain, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_extension_is_a_cycle() {
        let mut registry = PresetRegistry::default();
        registry.register("loop", Preset::new(json!({})).extends("loop"));
        assert!(matches!(
            registry.resolve("loop"),
            Err(ConfigError::PresetCycle { .. })
        ));
    }

    #[test]
    fn shared_ancestor_applied_once() {
        let mut registry = PresetRegistry::default();
        registry.register("base", Preset::new(json!({"x": 1})));
        registry.register("left", Preset::new(json!({})).extends("base"));
        registry.register(
            "both",
            Preset::new(json!({})).extends("left").extends("base"),
        );
        let resolved = registry.resolve("both").unwrap();
        assert_eq!(resolved.chain, vec!["base", "left", "both"]);
    }

    #[test]
    fn unknown_parent_names_the_parent() {
        let mut registry = PresetRegistry::default();
        registry.register("child", Preset::new(json!({})).extends("ghost"));
        match registry.resolve("child") {
            Err(ConfigError::UnknownPreset { name }) => assert_eq!(name, "ghost"),
            other => panic!("expected unknown preset, got {other:?}"),
        }
    }
}
