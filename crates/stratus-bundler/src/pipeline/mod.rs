//! The build pipeline: an ordered list of stages driven through Rolldown.
//!
//! Stages never mutate shared state while the pipeline is assembled. Each
//! one returns a [`StageOutput`] delta from [`Stage::contribute`]; the
//! pipeline merges the deltas into a [`RegistryBuilder`] and freezes it
//! before Rolldown starts. During bundling a single adapter plugin
//! ([`plugin::PipelinePlugin`]) forwards Rolldown hooks to the stages in
//! order.

pub mod chunks;
pub mod plugin;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use rolldown::{
    BundlerBuilder, BundlerOptions, InputItem, OutputFormat, Platform, RawMinifyOptions,
    ResolveOptions, SourceMapType,
};
use rolldown_common::Output;
use rolldown_plugin::__inner::SharedPluginable;
use serde::Serialize;

use crate::context::BuildContext;
use crate::resolver::RESOLVE_EXTENSIONS;
use crate::vfs::{RegistryBuilder, VirtualContent, VirtualRegistry};
use crate::{Error, Result};

/// Upper bound on alias rewrites followed for one specifier.
const MAX_REWRITE_HOPS: usize = 8;

/// Delta a stage contributes while the pipeline is assembled.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub modules: Vec<(String, VirtualContent)>,
    pub aliases: IndexMap<String, String>,
}

impl StageOutput {
    pub fn module(mut self, id: impl Into<String>, content: impl Into<VirtualContent>) -> Self {
        self.modules.push((id.into(), content.into()));
        self
    }
}

/// Answer of a stage's `resolve_id` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Bundle the module under this id.
    Module(String),
    /// Leave the import in the output under this id.
    External(String),
    /// Restart resolution with a different specifier.
    Rewrite(String),
}

/// Module kinds a stage can assign when loading or transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub code: String,
    pub kind: Option<ModuleKind>,
}

impl Loaded {
    pub fn js(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            kind: Some(ModuleKind::Js),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub code: String,
    pub kind: Option<ModuleKind>,
}

impl From<String> for Transformed {
    fn from(code: String) -> Self {
        Self { code, kind: None }
    }
}

/// A generated chunk after bundling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedChunk {
    pub file_name: String,
    #[serde(skip)]
    pub code: String,
    pub is_entry: bool,
    /// Constituent module ids in bundle order.
    pub module_ids: Vec<String>,
    pub imports: Vec<String>,
}

impl RenderedChunk {
    /// File name without directories or extension.
    pub fn name(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }
}

/// A non-chunk file produced by the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

/// Result of bundling: chunks plus every other emitted file.
#[derive(Debug, Default)]
pub struct BundleArtifacts {
    pub chunks: Vec<RenderedChunk>,
    pub files: Vec<OutputFile>,
}

impl BundleArtifacts {
    /// Every file to write, chunks first.
    pub fn into_files(self) -> Vec<OutputFile> {
        let mut files: Vec<OutputFile> = self
            .chunks
            .into_iter()
            .map(|chunk| OutputFile {
                file_name: chunk.file_name,
                contents: chunk.code.into_bytes(),
            })
            .collect();
        files.extend(self.files);
        files
    }
}

/// One step of the build.
///
/// Every hook declines by default.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn contribute(&self, _ctx: &BuildContext) -> Result<StageOutput> {
        Ok(StageOutput::default())
    }

    async fn resolve_id(
        &self,
        _ctx: &BuildContext,
        _specifier: &str,
        _importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        Ok(None)
    }

    async fn load(&self, _ctx: &BuildContext, _id: &str) -> anyhow::Result<Option<Loaded>> {
        Ok(None)
    }

    async fn transform(
        &self,
        _ctx: &BuildContext,
        _id: &str,
        _code: &str,
    ) -> anyhow::Result<Option<Transformed>> {
        Ok(None)
    }

    /// Rewrites a finished chunk. Receives the code as left by earlier stages.
    fn render_chunk(
        &self,
        _ctx: &BuildContext,
        _chunk: &RenderedChunk,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// Extra files written next to the chunks.
    fn emit_files(&self, _ctx: &BuildContext) -> Result<Vec<OutputFile>> {
        Ok(Vec::new())
    }

    async fn build_end(&self, _ctx: &BuildContext) -> Result<()> {
        Ok(())
    }
}

/// A frozen, ordered stage chain for one build.
pub struct Pipeline {
    ctx: Arc<BuildContext>,
    stages: Vec<Arc<dyn Stage>>,
    registry: VirtualRegistry,
    aliases: IndexMap<String, String>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("registry", &self.registry)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl Pipeline {
    /// Collects every stage's contribution and freezes the registry.
    pub fn new(ctx: Arc<BuildContext>, stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        let mut aliases = IndexMap::new();

        for stage in &stages {
            let output = stage.contribute(&ctx)?;
            tracing::trace!(
                stage = stage.name(),
                modules = output.modules.len(),
                aliases = output.aliases.len(),
                "stage contributed"
            );
            builder.extend(output.modules);
            for (key, target) in output.aliases {
                aliases.entry(key).or_insert(target);
            }
        }

        Ok(Self {
            ctx,
            stages,
            registry: builder.freeze(),
            aliases,
        })
    }

    /// The default stage chain for `ctx`.
    pub fn for_build(ctx: Arc<BuildContext>) -> Result<Self> {
        let stages = crate::stages::default_stages(&ctx);
        Self::new(ctx, stages)
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &VirtualRegistry {
        &self.registry
    }

    pub fn aliases(&self) -> &IndexMap<String, String> {
        &self.aliases
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the resolution chain.
    ///
    /// Virtual modules are checked first, then each stage in order. The
    /// first `Module` or `External` answer wins; a `Rewrite` restarts the
    /// chain with the new specifier.
    pub async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveOutcome>> {
        let mut current = specifier.to_string();
        let mut rewritten = false;

        'hops: for _ in 0..=MAX_REWRITE_HOPS {
            if let Some(id) = self.registry.resolve(&current, importer) {
                return Ok(Some(ResolveOutcome::Module(id)));
            }

            for stage in &self.stages {
                match stage.resolve_id(&self.ctx, &current, importer).await? {
                    None => continue,
                    Some(ResolveOutcome::Rewrite(next)) => {
                        if next == current {
                            continue;
                        }
                        tracing::trace!(stage = stage.name(), from = %current, to = %next, "rewrite");
                        current = next;
                        rewritten = true;
                        continue 'hops;
                    }
                    Some(outcome) => return Ok(Some(outcome)),
                }
            }
            break;
        }

        if !rewritten {
            return Ok(None);
        }

        match self.ctx.resolver.resolve(&current, importer) {
            Some(path) => Ok(Some(ResolveOutcome::Module(
                path.to_string_lossy().into_owned(),
            ))),
            None => anyhow::bail!(
                "Cannot resolve \"{current}\" (aliased from \"{specifier}\") from \"{}\"",
                importer.unwrap_or("<entry>")
            ),
        }
    }

    /// Virtual modules first, then the first stage that loads `id`.
    pub async fn load(&self, id: &str) -> anyhow::Result<Option<Loaded>> {
        if let Some(code) = self.registry.load(id)? {
            return Ok(Some(Loaded::js(code)));
        }
        for stage in &self.stages {
            if let Some(loaded) = stage.load(&self.ctx, id).await? {
                return Ok(Some(loaded));
            }
        }
        Ok(None)
    }

    /// Threads `code` through every stage's transform hook.
    ///
    /// Returns `None` when no stage changed anything.
    pub async fn transform(&self, id: &str, code: &str) -> anyhow::Result<Option<Transformed>> {
        let mut current: Option<Transformed> = None;
        for stage in &self.stages {
            let input = current.as_ref().map_or(code, |t| t.code.as_str());
            if let Some(next) = stage.transform(&self.ctx, id, input).await? {
                let kind = next.kind.or(current.as_ref().and_then(|t| t.kind));
                current = Some(Transformed {
                    code: next.code,
                    kind,
                });
            }
        }
        Ok(current)
    }

    pub fn render_chunk(&self, chunk: &mut RenderedChunk) -> Result<()> {
        for stage in &self.stages {
            if let Some(code) = stage.render_chunk(&self.ctx, chunk)? {
                chunk.code = code;
            }
        }
        Ok(())
    }

    pub async fn build_end(&self) -> Result<()> {
        for stage in &self.stages {
            stage.build_end(&self.ctx).await?;
        }
        Ok(())
    }

    /// Rolldown options for this build.
    pub fn bundler_options(&self) -> BundlerOptions {
        let options = &self.ctx.options;

        let entry_name = Path::new(&options.entry_file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());

        let mut modules = vec!["node_modules".to_string()];
        modules.extend(
            options
                .node_modules_dirs
                .iter()
                .map(|dir| dir.to_string_lossy().into_owned()),
        );

        let alias = self
            .aliases
            .iter()
            .map(|(key, target)| (key.clone(), vec![Some(target.clone())]))
            .collect::<Vec<_>>();

        BundlerOptions {
            input: Some(vec![InputItem {
                name: entry_name,
                import: options.entry.to_string_lossy().into_owned(),
            }]),
            cwd: Some(options.root_dir.clone()),
            format: Some(match options.format {
                stratus_config::OutputFormat::Esm => OutputFormat::Esm,
                stratus_config::OutputFormat::Cjs => OutputFormat::Cjs,
                stratus_config::OutputFormat::Iife => OutputFormat::Iife,
            }),
            sourcemap: options.source_map.then_some(SourceMapType::File),
            platform: Some(if options.node {
                Platform::Node
            } else {
                Platform::Neutral
            }),
            minify: options.minify.then(|| RawMinifyOptions::from(true)),
            inline_dynamic_imports: Some(options.inline_dynamic_imports),
            resolve: Some(ResolveOptions {
                alias: (!alias.is_empty()).then_some(alias),
                main_fields: Some(vec!["main".to_string()]),
                condition_names: Some(options.externals.export_conditions.clone()),
                extensions: Some(RESOLVE_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
                modules: Some(modules),
                symlinks: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Bundles once and returns the renamed, rendered output.
    pub async fn bundle(self: &Arc<Self>) -> Result<BundleArtifacts> {
        let plugin: SharedPluginable = Arc::new(plugin::PipelinePlugin::new(Arc::clone(self)));

        let mut bundler = BundlerBuilder::default()
            .with_options(self.bundler_options())
            .with_plugins(vec![plugin])
            .build()
            .map_err(|e| Error::from_rolldown_batch(&e))?;

        let output = bundler
            .generate()
            .await
            .map_err(|e| Error::from_rolldown_batch(&e))?;

        let mut artifacts = BundleArtifacts::default();
        for item in output.assets {
            match item {
                Output::Chunk(chunk) => artifacts.chunks.push(RenderedChunk {
                    file_name: chunk.filename.to_string(),
                    code: chunk.code.to_string(),
                    is_entry: chunk.is_entry,
                    module_ids: chunk.modules.keys.iter().map(|id| id.to_string()).collect(),
                    imports: chunk.imports.iter().map(|s| s.to_string()).collect(),
                }),
                Output::Asset(asset) => artifacts.files.push(OutputFile {
                    file_name: asset.filename.to_string(),
                    contents: asset.source.as_bytes().to_vec(),
                }),
            }
        }

        chunks::assign_chunk_names(&self.ctx, &mut artifacts);

        for chunk in &mut artifacts.chunks {
            self.render_chunk(chunk)?;
        }
        for stage in &self.stages {
            artifacts.files.extend(stage.emit_files(&self.ctx)?);
        }

        if self.ctx.options.analyze {
            write_stats(&self.ctx, &artifacts)?;
        }

        tracing::debug!(
            chunks = artifacts.chunks.len(),
            files = artifacts.files.len(),
            "bundle generated"
        );
        Ok(artifacts)
    }
}

#[derive(Serialize)]
struct ChunkStats<'a> {
    file_name: &'a str,
    size: usize,
    modules: &'a [String],
}

fn write_stats(ctx: &BuildContext, artifacts: &BundleArtifacts) -> Result<()> {
    let stats: Vec<ChunkStats<'_>> = artifacts
        .chunks
        .iter()
        .map(|chunk| ChunkStats {
            file_name: &chunk.file_name,
            size: chunk.code.len(),
            modules: &chunk.module_ids,
        })
        .collect();
    let path = ctx.options.build_dir.join("stats.json");
    std::fs::create_dir_all(&ctx.options.build_dir)
        .map_err(|e| Error::io(format!("Failed to create {}", ctx.options.build_dir.display()), e))?;
    let json = serde_json::to_string_pretty(&stats)
        .map_err(|e| Error::WriteFailure(format!("stats.json: {e}")))?;
    std::fs::write(&path, json)
        .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;
    tracing::info!(path = %path.display(), "bundle stats written");
    Ok(())
}
