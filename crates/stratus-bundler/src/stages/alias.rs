use async_trait::async_trait;
use indexmap::IndexMap;

use super::ids;
use crate::Result;
use crate::context::BuildContext;
use crate::pipeline::{ResolveOutcome, Stage, StageOutput};

/// Re-aliases targets that start with another alias, so chained aliases
/// point at final paths.
///
/// Only aliases starting with `~`, `@` or `#` take part. A bare `@` only
/// rewrites targets starting with `@/`.
pub fn resolve_aliases(mut aliases: IndexMap<String, String>) -> IndexMap<String, String> {
    let keys: Vec<String> = aliases.keys().cloned().collect();
    for key in &keys {
        for alias in &keys {
            if !alias.starts_with(['~', '@', '#']) {
                continue;
            }
            let Some(target) = aliases.get(key) else {
                continue;
            };
            if alias == "@" && !target.starts_with("@/") {
                continue;
            }
            if alias == key || !target.starts_with(alias.as_str()) {
                continue;
            }
            let Some(replacement) = aliases.get(alias) else {
                continue;
            };
            let rewritten = format!("{replacement}{}", &target[alias.len()..]);
            aliases.insert(key.clone(), rewritten);
        }
    }
    aliases
}

/// Rewrites aliased specifiers to their targets.
#[derive(Debug)]
pub struct AliasStage {
    entries: IndexMap<String, String>,
    /// Keys, longest first.
    lookup: Vec<String>,
}

impl AliasStage {
    pub fn new(ctx: &BuildContext) -> Self {
        let options = &ctx.options;
        let path = |p: &std::path::Path| p.to_string_lossy().replace('\\', "/");

        let mut aliases = IndexMap::new();
        aliases.insert("#build".to_string(), path(&options.build_dir));
        aliases.insert(ids::ERROR_HANDLER.to_string(), options.error_handler.clone());
        aliases.insert("~".to_string(), path(&options.src_dir));
        aliases.insert("@/".to_string(), path(&options.src_dir));
        aliases.insert("~~".to_string(), path(&options.root_dir));
        aliases.insert("@@/".to_string(), path(&options.root_dir));
        for (key, target) in &options.alias {
            aliases.insert(key.clone(), target.clone());
        }

        Self::from_entries(resolve_aliases(aliases))
    }

    pub fn from_entries(entries: IndexMap<String, String>) -> Self {
        let mut lookup: Vec<String> = entries.keys().cloned().collect();
        lookup.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { entries, lookup }
    }

    pub fn entries(&self) -> &IndexMap<String, String> {
        &self.entries
    }

    /// The rewritten specifier, if an alias applies.
    pub fn rewrite(&self, specifier: &str) -> Option<String> {
        self.lookup.iter().find_map(|key| {
            let target = self.entries.get(key)?;
            if specifier == key {
                return Some(target.clone());
            }
            let rest = specifier.strip_prefix(key.as_str())?;
            if key.ends_with('/') {
                let sep = if target.ends_with('/') { "" } else { "/" };
                return Some(format!("{target}{sep}{rest}"));
            }
            rest.starts_with('/').then(|| format!("{target}{rest}"))
        })
    }
}

#[async_trait]
impl Stage for AliasStage {
    fn name(&self) -> &'static str {
        "alias"
    }

    fn contribute(&self, _ctx: &BuildContext) -> Result<StageOutput> {
        Ok(StageOutput {
            aliases: self.entries.clone(),
            ..StageOutput::default()
        })
    }

    async fn resolve_id(
        &self,
        _ctx: &BuildContext,
        specifier: &str,
        _importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        Ok(self.rewrite(specifier).map(ResolveOutcome::Rewrite))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    #[test]
    fn chained_aliases_resolve_to_paths() {
        let aliases = IndexMap::from([
            ("~".to_string(), "/app".to_string()),
            ("#utils".to_string(), "~/utils".to_string()),
            ("#deep".to_string(), "#utils/deep".to_string()),
            ("lodash".to_string(), "lodash-es".to_string()),
        ]);
        let resolved = resolve_aliases(aliases);
        assert_eq!(resolved["#utils"], "/app/utils");
        assert_eq!(resolved["#deep"], "/app/utils/deep");
        assert_eq!(resolved["lodash"], "lodash-es");
    }

    #[test]
    fn prefixes_match_on_segment_boundaries() {
        let stage = AliasStage::from_entries(IndexMap::from([
            ("~".to_string(), "/app/src".to_string()),
            ("~~".to_string(), "/app".to_string()),
            ("@/".to_string(), "/app/src".to_string()),
            ("#build".to_string(), "/app/.stratus".to_string()),
        ]));
        assert_eq!(stage.rewrite("~/utils/db").as_deref(), Some("/app/src/utils/db"));
        assert_eq!(stage.rewrite("~~/package.json").as_deref(), Some("/app/package.json"));
        assert_eq!(stage.rewrite("@/lib").as_deref(), Some("/app/src/lib"));
        assert_eq!(stage.rewrite("#build").as_deref(), Some("/app/.stratus"));
        assert_eq!(stage.rewrite("#builder"), None);
        assert_eq!(stage.rewrite("lodash"), None);
    }

    #[test]
    fn runtime_and_error_handler_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_options(json!({}), &Environment::new(dir.path())).unwrap();
        let runtime = options.runtime_dir.to_string_lossy().replace('\\', "/");
        let stage = AliasStage::new(&BuildContext::new(Arc::new(options), Vec::new()));

        assert_eq!(
            stage.rewrite("#internal/stratus/app").unwrap(),
            format!("{runtime}/app")
        );
        assert_eq!(
            stage.rewrite(ids::ERROR_HANDLER).unwrap(),
            format!("{runtime}/error")
        );
    }
}
