//! Auto-detection of the deployment preset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::preset::PresetId;

/// Process environment snapshot used while loading options.
///
/// Loading never reads `std::env` directly so tests can describe an
/// environment without mutating the real one.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub cwd: PathBuf,
}

impl Environment {
    pub fn from_process() -> std::io::Result<Self> {
        Ok(Self {
            vars: std::env::vars().collect(),
            cwd: std::env::current_dir()?,
        })
    }

    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            cwd: cwd.into(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Detects a preset from provider environment variables.
///
/// Checks, in order:
/// - `NETLIFY` → netlify
/// - `VERCEL` / `NOW_BUILDER` → vercel
/// - `STORMKIT` → stormkit
pub fn detect_from_env(env: &Environment) -> Option<PresetId> {
    if env.var("NETLIFY").is_some() {
        return Some(PresetId::Netlify);
    }
    if env.var("VERCEL").is_some() || env.var("NOW_BUILDER").is_some() {
        return Some(PresetId::Vercel);
    }
    if env.var("STORMKIT").is_some() {
        return Some(PresetId::Stormkit);
    }
    None
}

/// Detects a preset from project files.
///
/// - `vercel.json` or `.vercel/` → vercel
/// - `wrangler.toml` → cloudflare
/// - `netlify.toml` → netlify
pub fn detect_from_project(project_root: &Path) -> Option<PresetId> {
    if project_root.join("vercel.json").exists() || project_root.join(".vercel").exists() {
        return Some(PresetId::Vercel);
    }
    if project_root.join("wrangler.toml").exists() {
        return Some(PresetId::Cloudflare);
    }
    if project_root.join("netlify.toml").exists() {
        return Some(PresetId::Netlify);
    }
    None
}
