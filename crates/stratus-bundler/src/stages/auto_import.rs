use async_trait::async_trait;
use indexmap::IndexMap;
use stratus_config::AutoImportOptions;

use super::{is_source_module, js_string, scope};
use crate::context::BuildContext;
use crate::pipeline::{Stage, Transformed};

/// Adds imports for preset names a module uses without importing.
#[derive(Debug)]
pub struct AutoImportStage {
    /// Name to source module, first preset wins.
    names: IndexMap<String, String>,
}

impl AutoImportStage {
    pub fn new(options: &AutoImportOptions) -> Self {
        let mut names = IndexMap::new();
        for preset in &options.presets {
            for name in &preset.imports {
                names.entry(name.clone()).or_insert_with(|| preset.from.clone());
            }
        }
        Self { names }
    }

    /// Import statements `code` needs, grouped by source.
    pub fn imports_for(&self, code: &str) -> Option<String> {
        if !self.names.keys().any(|name| code.contains(name.as_str())) {
            return None;
        }
        let free = scope::free_references(code);

        let mut by_source: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (name, from) in &self.names {
            if free.contains(name) {
                by_source.entry(from).or_default().push(name);
            }
        }
        if by_source.is_empty() {
            return None;
        }

        let lines: Vec<String> = by_source
            .into_iter()
            .map(|(from, names)| {
                format!("import {{ {} }} from {};", names.join(", "), js_string(from))
            })
            .collect();
        Some(lines.join("\n"))
    }
}

#[async_trait]
impl Stage for AutoImportStage {
    fn name(&self) -> &'static str {
        "auto-import"
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        id: &str,
        code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        if !is_source_module(id) {
            return Ok(None);
        }
        Ok(self
            .imports_for(code)
            .map(|imports| format!("{imports}\n{code}").into()))
    }
}
