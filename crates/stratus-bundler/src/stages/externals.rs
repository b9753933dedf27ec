use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::BuildContext;
use crate::pipeline::{ResolveOutcome, Stage};
use crate::resolver::is_node_builtin;
use crate::trace::{DependencyTracer, ExternalDecision};
use crate::{Error, Result};

/// Leaves dependencies external and stages their files into the output.
#[derive(Debug)]
pub struct ExternalsStage {
    tracer: Arc<DependencyTracer>,
}

impl ExternalsStage {
    pub fn new(ctx: &BuildContext) -> Self {
        Self {
            tracer: Arc::new(DependencyTracer::for_build(ctx)),
        }
    }

    pub fn tracer(&self) -> &Arc<DependencyTracer> {
        &self.tracer
    }
}

#[async_trait]
impl Stage for ExternalsStage {
    fn name(&self) -> &'static str {
        "externals"
    }

    async fn resolve_id(
        &self,
        _ctx: &BuildContext,
        specifier: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        let decision = self.tracer.decide(specifier, importer);
        if let ExternalDecision::Traced { file, .. } = &decision {
            tracing::trace!(specifier, file = %file.display(), "external traced");
        }
        Ok(decision
            .external_id()
            .map(|id| ResolveOutcome::External(id.to_string())))
    }

    async fn build_end(&self, _ctx: &BuildContext) -> Result<()> {
        self.tracer.finish().await.map(|_| ())
    }
}

/// Fails the build on any dependency that cannot be bundled.
#[derive(Debug, Default)]
pub struct NoExternalsStage;

fn is_bare(specifier: &str) -> bool {
    !(specifier.is_empty()
        || specifier.starts_with('\0')
        || specifier.starts_with('.')
        || specifier.starts_with('#')
        || Path::new(specifier).is_absolute())
}

#[async_trait]
impl Stage for NoExternalsStage {
    fn name(&self) -> &'static str {
        "no-externals"
    }

    async fn resolve_id(
        &self,
        ctx: &BuildContext,
        specifier: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        if !is_bare(specifier) || (ctx.options.node && is_node_builtin(specifier)) {
            return Ok(None);
        }
        match ctx.resolver.resolve(specifier, importer) {
            Some(_) => Ok(None),
            None => Err(Error::ExternalsDisabled {
                specifier: specifier.to_string(),
                importer: importer.unwrap_or("<entry>").to_string(),
            }
            .into()),
        }
    }
}
