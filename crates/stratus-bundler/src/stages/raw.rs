use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use super::replace::NO_REPLACE_MARKER;
use crate::context::BuildContext;
use crate::pipeline::{Loaded, ResolveOutcome, Stage};

/// Module id prefix of raw assets.
pub const RAW_PREFIX: &str = "\0raw:";
const EXPLICIT_PREFIX: &str = "raw:";
const DEFAULT_EXTENSIONS: [&str; 7] = [".md", ".mdx", ".yml", ".txt", ".css", ".htm", ".html"];

/// Loads text assets as a default-exported string.
#[derive(Debug)]
pub struct RawStage {
    extensions: HashSet<String>,
}

impl RawStage {
    pub fn new(extra: &[String]) -> Self {
        let extensions = DEFAULT_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .chain(extra.iter().map(|e| {
                if e.starts_with('.') {
                    e.clone()
                } else {
                    format!(".{e}")
                }
            }))
            .collect();
        Self { extensions }
    }

    fn is_raw_extension(&self, specifier: &str) -> bool {
        Path::new(specifier)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&format!(".{ext}")))
    }
}

/// The generated module for raw `contents`.
pub fn raw_module(contents: &str) -> anyhow::Result<String> {
    let literal = serde_json::to_string(contents)?;
    Ok(format!("// {NO_REPLACE_MARKER} \n export default {literal}"))
}

fn locate(ctx: &BuildContext, specifier: &str, importer: Option<&str>) -> Option<PathBuf> {
    let path = Path::new(specifier);
    if path.is_absolute() {
        return Some(path.to_path_buf());
    }
    if specifier.starts_with("./") || specifier.starts_with("../") {
        let base = importer
            .map(|i| i.strip_prefix(crate::vfs::VIRTUAL_PREFIX).unwrap_or(i))
            .and_then(|i| Path::new(i).parent())
            .unwrap_or(&ctx.options.root_dir);
        return Some(path_clean::clean(base.join(path)));
    }
    ctx.resolver.resolve(specifier, importer)
}

#[async_trait]
impl Stage for RawStage {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn resolve_id(
        &self,
        ctx: &BuildContext,
        specifier: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        if specifier.starts_with('\0') {
            return Ok(None);
        }
        let (bare, explicit) = match specifier.strip_prefix(EXPLICIT_PREFIX) {
            Some(rest) => (rest, true),
            None => (specifier, false),
        };
        if !explicit && !self.is_raw_extension(bare) {
            return Ok(None);
        }
        // Aliased paths come back here once the alias stage rewrote them.
        if !explicit && ["~", "@", "#"].iter().any(|p| bare.starts_with(p)) {
            return Ok(None);
        }

        let path = locate(ctx, bare, importer).with_context(|| {
            format!(
                "Cannot resolve raw asset \"{bare}\" from \"{}\"",
                importer.unwrap_or("<entry>")
            )
        })?;
        Ok(Some(ResolveOutcome::Module(format!(
            "{RAW_PREFIX}{}",
            path.to_string_lossy()
        ))))
    }

    async fn load(&self, _ctx: &BuildContext, id: &str) -> anyhow::Result<Option<Loaded>> {
        let Some(path) = id.strip_prefix(RAW_PREFIX) else {
            return Ok(None);
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read raw asset {path}"))?;
        Ok(Some(Loaded::js(raw_module(&contents)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    fn ctx(root: &Path) -> BuildContext {
        let options = load_options(json!({}), &Environment::new(root)).unwrap();
        BuildContext::new(Arc::new(options), Vec::new())
    }

    #[tokio::test]
    async fn text_extensions_and_prefix_become_raw() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let stage = RawStage::new(&["sql".to_string()]);
        let importer = dir.path().join("routes/index.ts");
        let importer = importer.to_string_lossy();

        let md = stage.resolve_id(&ctx, "./docs/readme.md", Some(&importer)).await.unwrap();
        let expected = format!("{RAW_PREFIX}{}", dir.path().join("routes/docs/readme.md").display());
        assert_eq!(md, Some(ResolveOutcome::Module(expected)));

        let sql = stage.resolve_id(&ctx, "/q/users.sql", None).await.unwrap();
        assert_eq!(sql, Some(ResolveOutcome::Module(format!("{RAW_PREFIX}/q/users.sql"))));

        let prefixed = stage.resolve_id(&ctx, "raw:/data/blob.bin", None).await.unwrap();
        assert_eq!(prefixed, Some(ResolveOutcome::Module(format!("{RAW_PREFIX}/data/blob.bin"))));

        assert_eq!(stage.resolve_id(&ctx, "./x.ts", Some(&importer)).await.unwrap(), None);
        assert_eq!(stage.resolve_id(&ctx, "~/notes.md", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_marks_the_module() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "process.env.SECRET \"quoted\"").unwrap();

        let loaded = RawStage::new(&[])
            .load(&ctx(dir.path()), &format!("{RAW_PREFIX}{}", file.display()))
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.code.contains(NO_REPLACE_MARKER));
        assert!(loaded.code.ends_with(r#"export default "process.env.SECRET \"quoted\"""#));
    }
}
