use async_trait::async_trait;
use indexmap::IndexMap;

use super::{js_string, scope};
use crate::context::BuildContext;
use crate::pipeline::{Stage, Transformed};

/// Imports environment globals (e.g. `Buffer`, `process`) into modules
/// that reference them without a binding.
#[derive(Debug)]
pub struct InjectStage {
    globals: IndexMap<String, String>,
}

impl InjectStage {
    pub fn new(globals: &IndexMap<String, String>) -> Self {
        let globals = globals
            .iter()
            .filter(|(name, _)| {
                let valid = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
                if !valid {
                    tracing::warn!(name = %name, "inject entries must be plain identifiers, skipping");
                }
                valid
            })
            .map(|(name, module)| (name.clone(), module.clone()))
            .collect();
        Self { globals }
    }

    pub fn inject(&self, id: &str, code: &str) -> Option<String> {
        let candidates: Vec<(&String, &String)> = self
            .globals
            .iter()
            .filter(|(name, module)| code.contains(name.as_str()) && !id.contains(module.as_str()))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let free = scope::free_references(code);
        let imports: Vec<String> = candidates
            .into_iter()
            .filter(|(name, _)| free.contains(name.as_str()))
            .map(|(name, module)| format!("import {name} from {};", js_string(module)))
            .collect();
        if imports.is_empty() {
            return None;
        }
        Some(format!("{}\n{code}", imports.join("\n")))
    }
}

#[async_trait]
impl Stage for InjectStage {
    fn name(&self) -> &'static str {
        "inject"
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        id: &str,
        code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        if !super::is_source_module(id) {
            return Ok(None);
        }
        Ok(self.inject(id, code).map(Transformed::from))
    }
}
