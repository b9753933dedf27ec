//! Rewrites `import("./" + id)` chunk lookups into an explicit table.
//!
//! Prebuilt server bundles load their chunks by concatenating a chunk id
//! onto a relative path. That shape cannot be bundled, so it is redirected
//! to a generated helper that maps chunk ids to imports. The chunk list
//! comes from `server.manifest.json` when present, otherwise from a scan of
//! the directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use super::{js_string, serialize_import_name};
use crate::context::BuildContext;
use crate::pipeline::{Loaded, ResolveOutcome, Stage, Transformed};

pub const HELPER_ID: &str = "\0dynamic-require.mjs";

const IGNORE: [&str; 5] = [
    "client.manifest.mjs",
    "server.js",
    "server.cjs",
    "server.mjs",
    "server.manifest.mjs",
];

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\("\./" ?\+(.*)\)\.then"#).expect("dynamic import regex is valid")
});

static CHUNK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"exports\.id\s*=\s*["']?([\w\-./]+)["']?"#).expect("chunk id regex is valid")
});

static CHUNK_IDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"exports\.ids\s*=\s*\[\s*["']?([\w\-./]+)"#).expect("chunk ids regex is valid")
});

/// A prebuilt chunk reachable through the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicChunk {
    pub id: String,
    pub src: String,
    pub name: String,
}

#[derive(Deserialize)]
struct ServerManifest {
    files: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct DynamicRequireStage {
    dir: PathBuf,
    inline: bool,
}

impl DynamicRequireStage {
    pub fn new(ctx: &BuildContext) -> Self {
        let options = &ctx.options;
        Self {
            dir: options.build_dir.join("dist/server"),
            inline: !options.node || options.inline_dynamic_imports,
        }
    }

    pub fn rewrite(code: &str) -> Option<String> {
        if !DYNAMIC_IMPORT.is_match(code) {
            return None;
        }
        let replacement = format!(
            "import('{HELPER_ID}').then(r => r.default || r).then(dynamicRequire => dynamicRequire($1)).then"
        );
        Some(DYNAMIC_IMPORT.replace_all(code, replacement.as_str()).into_owned())
    }

    /// Chunk files below `dir`, relative and sorted.
    fn chunk_files(&self) -> Vec<String> {
        let manifest_path = self.dir.join("server.manifest.json");
        if let Ok(text) = std::fs::read_to_string(&manifest_path) {
            if let Ok(manifest) = serde_json::from_str::<ServerManifest>(&text) {
                return manifest
                    .files
                    .keys()
                    .filter(|file| !IGNORE.contains(&file.as_str()))
                    .cloned()
                    .collect();
            }
            tracing::warn!(path = %manifest_path.display(), "ignoring malformed server manifest");
        }

        let mut files: Vec<String> = WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(&self.dir).ok()?;
                let rel = rel.to_string_lossy().replace('\\', "/");
                let ext = Path::new(&rel).extension()?.to_str()?;
                (["cjs", "mjs", "js"].contains(&ext) && !IGNORE.contains(&rel.as_str()))
                    .then_some(rel)
            })
            .collect();
        files.sort();
        files
    }

    pub fn chunks(&self) -> Vec<DynamicChunk> {
        self.chunk_files()
            .into_iter()
            .filter_map(|rel| {
                let path = self.dir.join(&rel);
                let code = std::fs::read_to_string(&path).ok()?;
                let id = chunk_id(&code)?;
                Some(DynamicChunk {
                    id,
                    src: path.to_string_lossy().replace('\\', "/"),
                    name: serialize_import_name(&rel),
                })
            })
            .collect()
    }

    pub fn helper_module(&self) -> String {
        let chunks = self.chunks();
        if self.inline {
            inline_template(&chunks)
        } else {
            lazy_template(&chunks)
        }
    }
}

/// The id a webpack-style chunk declares through `exports.id` or `exports.ids`.
fn chunk_id(code: &str) -> Option<String> {
    CHUNK_ID
        .captures(code)
        .or_else(|| CHUNK_IDS.captures(code))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn inline_template(chunks: &[DynamicChunk]) -> String {
    let imports: Vec<String> = chunks
        .iter()
        .map(|c| format!("import * as {} from {}", c.name, js_string(&c.src)))
        .collect();
    let entries: Vec<String> = chunks
        .iter()
        .map(|c| format!(" [{}]: {}", js_string(&c.id), c.name))
        .collect();
    format!(
        "{}\nconst dynamicChunks = {{\n  {}\n}};\n\nexport default function dynamicRequire(id) {{\n  return Promise.resolve(dynamicChunks[id]);\n}};",
        imports.join("\n"),
        entries.join(",\n")
    )
}

fn lazy_template(chunks: &[DynamicChunk]) -> String {
    let entries: Vec<String> = chunks
        .iter()
        .map(|c| format!(" [{}]: () => import({})", js_string(&c.id), js_string(&c.src)))
        .collect();
    format!(
        "\nconst dynamicChunks = {{\n{}\n}};\n\nexport default function dynamicRequire(id) {{\n  return dynamicChunks[id]();\n}};",
        entries.join(",\n")
    )
}

#[async_trait]
impl Stage for DynamicRequireStage {
    fn name(&self) -> &'static str {
        "dynamic-require"
    }

    async fn resolve_id(
        &self,
        _ctx: &BuildContext,
        specifier: &str,
        _importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        Ok((specifier == HELPER_ID).then(|| ResolveOutcome::Module(HELPER_ID.to_string())))
    }

    async fn load(&self, _ctx: &BuildContext, id: &str) -> anyhow::Result<Option<Loaded>> {
        if id != HELPER_ID {
            return Ok(None);
        }
        let dir = self.dir.clone();
        let inline = self.inline;
        let code = tokio::task::spawn_blocking(move || DynamicRequireStage { dir, inline }.helper_module())
            .await
            .context("dynamic require scan panicked")?;
        Ok(Some(Loaded::js(code)))
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        _id: &str,
        code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        Ok(Self::rewrite(code).map(Transformed::from))
    }
}
