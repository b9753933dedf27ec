use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use stratus_config::{Loader, TranspileOptions};

use crate::context::BuildContext;
use crate::pipeline::{ModuleKind, Stage, Transformed};

/// Tells Rolldown how to parse each source extension.
///
/// The language transform itself runs inside Rolldown; this stage only
/// decides which loader applies to which file.
#[derive(Debug)]
pub struct TranspileStage {
    loaders: IndexMap<String, Loader>,
    exclude: Vec<String>,
}

impl TranspileStage {
    pub fn new(options: &TranspileOptions) -> Self {
        Self {
            loaders: options.loaders.clone(),
            exclude: options.exclude.clone(),
        }
    }

    pub fn kind_for(&self, id: &str) -> Option<ModuleKind> {
        if id.starts_with('\0') || self.exclude.iter().any(|e| id.contains(e.as_str())) {
            return None;
        }
        let ext = Path::new(id).extension()?.to_str()?;
        let loader = self.loaders.get(&format!(".{ext}"))?;
        Some(match loader {
            Loader::Js => ModuleKind::Js,
            Loader::Jsx => ModuleKind::Jsx,
            Loader::Ts => ModuleKind::Ts,
            Loader::Tsx => ModuleKind::Tsx,
        })
    }
}

#[async_trait]
impl Stage for TranspileStage {
    fn name(&self) -> &'static str {
        "transpile"
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        id: &str,
        code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        Ok(self.kind_for(id).map(|kind| Transformed {
            code: code.to_string(),
            kind: Some(kind),
        }))
    }
}
