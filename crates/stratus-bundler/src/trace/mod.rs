//! Dependency tracer.
//!
//! Decides, for every bare import the bundler meets, whether it is inlined,
//! left external, or left external and staged into the output's own
//! `node_modules`. Staging happens once at the end of the build: the files
//! recorded during resolution are traced transitively, deduplicated per
//! package and copied next to the server bundle.

pub mod copy;
pub mod file_trace;
pub mod package;

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use stratus_config::Options;

use self::package::{NodeModulePath, is_valid_node_import};
use crate::context::BuildContext;
use crate::resolver::{ModuleResolver, is_node_builtin};
use crate::Result;

/// Prefixes that are always bundled, in addition to the configured ones.
const ALWAYS_INLINE: [&str; 6] = ["#", "~", "@/", "~~", "@@/", "virtual:"];

/// What to do with one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalDecision {
    /// Bundle it.
    Inline,
    /// Leave `id` in the output and trust the runtime to provide it.
    External { id: String },
    /// Leave `id` in the output and stage `file` into `node_modules`.
    Traced { id: String, file: PathBuf },
}

impl ExternalDecision {
    /// The id to leave in the output, unless the import is inlined.
    pub fn external_id(&self) -> Option<&str> {
        match self {
            ExternalDecision::Inline => None,
            ExternalDecision::External { id } | ExternalDecision::Traced { id, .. } => Some(id),
        }
    }
}

/// Summary of the staging phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceReport {
    /// Staged package names.
    pub packages: Vec<String>,
    /// Number of files copied.
    pub files: usize,
}

/// Tracer policy, derived from the options.
#[derive(Debug, Clone)]
pub struct TracerOptions {
    pub inline: Vec<String>,
    pub external: Vec<String>,
    pub trace: bool,
    pub trace_include: Vec<String>,
    pub out_dir: PathBuf,
}

impl TracerOptions {
    pub fn from_options(options: &Options, handlers: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut inline: Vec<String> = ALWAYS_INLINE.iter().map(|s| s.to_string()).collect();
        inline.push(path_prefix(&options.runtime_dir));
        inline.push(path_prefix(&options.src_dir));
        inline.extend(handlers.into_iter().map(|h| h.to_string_lossy().replace('\\', "/")));
        inline.extend(options.externals.inline.iter().cloned());

        let mut external = Vec::new();
        if options.dev {
            external.push(path_prefix(&options.build_dir));
        }
        external.extend(options.externals.external.iter().cloned());

        Self {
            inline,
            external,
            trace: options.externals.trace,
            trace_include: options.externals.trace_include.clone(),
            out_dir: options.output.server_dir.clone(),
        }
    }
}

fn path_prefix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Externals policy plus the set of files that must be staged.
#[derive(Debug)]
pub struct DependencyTracer {
    options: TracerOptions,
    resolver: ModuleResolver,
    tracked: Mutex<IndexSet<PathBuf>>,
    resolve_cache: Mutex<FxHashMap<String, Option<PathBuf>>>,
}

impl DependencyTracer {
    pub fn new(options: TracerOptions, resolver: ModuleResolver) -> Self {
        Self {
            options,
            resolver,
            tracked: Mutex::new(IndexSet::new()),
            resolve_cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn for_build(ctx: &BuildContext) -> Self {
        let handlers = ctx
            .handlers
            .iter()
            .map(|h| PathBuf::from(&h.handler))
            .filter(|p| p.is_absolute());
        Self::new(
            TracerOptions::from_options(&ctx.options, handlers),
            ctx.resolver.clone(),
        )
    }

    /// Files recorded for staging so far.
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.tracked.lock().iter().cloned().collect()
    }

    /// Resolution against the configured module directories, memoized.
    fn resolve_module(&self, specifier: &str) -> Option<PathBuf> {
        if let Some(cached) = self.resolve_cache.lock().get(specifier) {
            return cached.clone();
        }
        let resolved = self
            .resolver
            .resolve(specifier, None)
            .or_else(|| self.resolver.resolve_in_module_dirs(specifier));
        self.resolve_cache
            .lock()
            .insert(specifier.to_string(), resolved.clone());
        resolved
    }

    fn track(&self, file: PathBuf) {
        self.tracked.lock().insert(file);
    }

    /// Classifies one import.
    pub fn decide(&self, specifier: &str, importer: Option<&str>) -> ExternalDecision {
        if specifier.is_empty()
            || specifier.starts_with('\0')
            || specifier.contains('?')
            || specifier.starts_with('#')
            || specifier.starts_with('.')
        {
            return ExternalDecision::Inline;
        }

        let id = specifier.replace('\\', "/");
        let bare = id.rsplit("node_modules/").next().unwrap_or(&id);
        let matches = |prefix: &String| id.starts_with(prefix.as_str()) || bare.starts_with(prefix.as_str());

        if self.options.inline.iter().any(matches) {
            return ExternalDecision::Inline;
        }
        if self.options.external.iter().any(matches) || is_node_builtin(&id) {
            return ExternalDecision::External { id };
        }

        let Some(resolved) = self
            .resolver
            .resolve(specifier, importer)
            .or_else(|| self.resolve_module(specifier))
        else {
            return ExternalDecision::Inline;
        };
        if !is_valid_node_import(&resolved) {
            return ExternalDecision::Inline;
        }

        let resolved_id = resolved.to_string_lossy().replace('\\', "/");
        if !self.options.trace {
            return ExternalDecision::External { id: resolved_id };
        }

        let Some(parsed) = NodeModulePath::parse(&resolved_id) else {
            return ExternalDecision::Inline;
        };

        if parsed.name != specifier {
            if !Path::new(specifier).is_absolute() {
                // Subpath import such as `pkg/utils`: keep the specifier.
                let file = self.resolve_module(specifier).unwrap_or(resolved);
                self.track(file.clone());
                return ExternalDecision::Traced { id, file };
            }

            let entry = self.resolve_module(&parsed.name);
            if entry.as_deref() != Some(Path::new(specifier)) {
                let guessed = format!("{}{}", parsed.name, strip_extension(&parsed.subpath));
                return match self.resolve_module(&guessed) {
                    Some(file) if file == Path::new(specifier) => {
                        self.track(file.clone());
                        ExternalDecision::Traced { id: guessed, file }
                    }
                    _ => ExternalDecision::Inline,
                };
            }
        }

        self.track(resolved.clone());
        ExternalDecision::Traced {
            id: parsed.name,
            file: resolved,
        }
    }

    /// Traces every recorded file and stages the result into the output.
    pub async fn finish(&self) -> Result<TraceReport> {
        if !self.options.trace {
            return Ok(TraceReport::default());
        }

        for name in &self.options.trace_include {
            match self.resolve_module(name) {
                Some(file) => self.track(file),
                None => tracing::warn!(package = %name, "traceInclude entry could not be resolved"),
            }
        }

        let entries = self.tracked();
        let resolver = self.resolver.clone();
        let traced = tokio::task::spawn_blocking(move || file_trace::trace_files(&entries, &resolver))
            .await
            .map_err(|e| crate::Error::io("dependency trace panicked", std::io::Error::other(e)))?;
        let traced: Vec<PathBuf> = traced.into_iter().collect();

        let packages = copy::select_packages(&traced);
        let plan = copy::plan_copies(&traced, &packages, &self.options.out_dir);
        let files = copy::copy_files(plan).await?;
        copy::write_root_manifest(&self.options.out_dir, packages.keys()).await?;

        let report = TraceReport {
            packages: packages.keys().cloned().collect(),
            files,
        };
        tracing::info!(
            packages = report.packages.len(),
            files = report.files,
            "traced dependencies staged"
        );
        Ok(report)
    }
}

fn strip_extension(subpath: &str) -> &str {
    match subpath.rfind('.') {
        Some(dot)
            if !subpath[dot..].contains('/')
                && subpath[dot + 1..].chars().all(|c| c.is_ascii_lowercase())
                && dot + 1 < subpath.len() =>
        {
            &subpath[..dot]
        }
        _ => subpath,
    }
}
