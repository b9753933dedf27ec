//! Rolldown adapter that forwards hooks to the pipeline stages.

use std::borrow::Cow;
use std::sync::Arc;

use rolldown_common::{ModuleType, ResolvedExternal};
use rolldown_plugin::{
    HookLoadArgs, HookLoadOutput, HookLoadReturn, HookResolveIdArgs, HookResolveIdOutput,
    HookResolveIdReturn, HookTransformArgs, HookTransformOutput, HookTransformReturn, HookUsage,
    Plugin, PluginContext, SharedTransformPluginContext,
};

use super::{ModuleKind, Pipeline, ResolveOutcome};

/// The only plugin registered with Rolldown.
#[derive(Debug)]
pub struct PipelinePlugin {
    pipeline: Arc<Pipeline>,
}

impl PipelinePlugin {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

fn module_type(kind: ModuleKind) -> ModuleType {
    match kind {
        ModuleKind::Js => ModuleType::Js,
        ModuleKind::Jsx => ModuleType::Jsx,
        ModuleKind::Ts => ModuleType::Ts,
        ModuleKind::Tsx => ModuleType::Tsx,
        ModuleKind::Json => ModuleType::Json,
    }
}

impl Plugin for PipelinePlugin {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("stratus:pipeline")
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId | HookUsage::Load | HookUsage::Transform
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        args: &HookResolveIdArgs,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let specifier = args.specifier.to_string();
        let importer = args.importer.map(|s| s.to_string());
        let pipeline = Arc::clone(&self.pipeline);

        async move {
            let outcome = pipeline
                .resolve_id(&specifier, importer.as_deref())
                .await?;

            Ok(match outcome {
                Some(ResolveOutcome::Module(id)) => Some(HookResolveIdOutput {
                    id: id.into(),
                    ..Default::default()
                }),
                Some(ResolveOutcome::External(id)) => Some(HookResolveIdOutput {
                    id: id.into(),
                    external: Some(ResolvedExternal::Bool(true)),
                    ..Default::default()
                }),
                // The pipeline resolves rewrites itself; this arm is unreachable in practice.
                Some(ResolveOutcome::Rewrite(_)) | None => None,
            })
        }
    }

    fn load(
        &self,
        _ctx: &PluginContext,
        args: &HookLoadArgs<'_>,
    ) -> impl std::future::Future<Output = HookLoadReturn> + Send {
        let id = args.id.to_string();
        let pipeline = Arc::clone(&self.pipeline);

        async move {
            Ok(pipeline.load(&id).await?.map(|loaded| HookLoadOutput {
                code: loaded.code.into(),
                module_type: loaded.kind.map(module_type),
                ..Default::default()
            }))
        }
    }

    fn transform(
        &self,
        _ctx: SharedTransformPluginContext,
        args: &HookTransformArgs<'_>,
    ) -> impl std::future::Future<Output = HookTransformReturn> + Send {
        let id = args.id.to_string();
        let code = args.code.to_string();
        let pipeline = Arc::clone(&self.pipeline);

        async move {
            Ok(pipeline
                .transform(&id, &code)
                .await?
                .map(|out| HookTransformOutput {
                    code: Some(out.code),
                    map: None,
                    side_effects: None,
                    module_type: out.kind.map(module_type),
                }))
        }
    }
}
