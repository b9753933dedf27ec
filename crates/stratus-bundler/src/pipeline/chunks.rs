//! Output naming for generated chunks.
//!
//! A chunk is filed under a bucket picked from its *last* constituent
//! module, which is the module that owns the chunk in practice. Renaming
//! happens after generation, so cross-chunk imports and source map
//! references are rewritten to follow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

use super::{BundleArtifacts, RenderedChunk};
use crate::context::BuildContext;
use crate::scan::section_dirs;

/// Path prefixes that decide a chunk's bucket.
#[derive(Debug, Clone)]
pub struct ChunkBuckets {
    build_server_dir: PathBuf,
    runtime_app_dir: PathBuf,
    build_dir: PathBuf,
    runtime_dir: PathBuf,
    handler_paths: Vec<PathBuf>,
}

impl ChunkBuckets {
    pub fn new(ctx: &BuildContext) -> Self {
        let options = &ctx.options;
        let mut handler_paths: Vec<PathBuf> = ctx
            .handlers
            .iter()
            .map(|h| PathBuf::from(&h.handler))
            .filter(|p| p.is_absolute())
            .collect();
        handler_paths.extend(section_dirs(&options.scan_dirs));

        Self {
            build_server_dir: options.build_dir.join("dist/server"),
            runtime_app_dir: options.runtime_dir.join("app"),
            build_dir: options.build_dir.clone(),
            runtime_dir: options.runtime_dir.clone(),
            handler_paths,
        }
    }

    /// Bucket folder for a chunk whose last module is `module_id`.
    ///
    /// First match wins: `app/<rel>`, `app`, `build`, `stratus`, `handlers`,
    /// `raw`, `rollup`, then no bucket.
    pub fn bucket(&self, module_id: &str) -> String {
        let path = Path::new(module_id);

        if path.starts_with(&self.build_server_dir) {
            let rel = path
                .parent()
                .and_then(|dir| dir.strip_prefix(&self.build_server_dir).ok())
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            return if rel.is_empty() {
                "app".to_string()
            } else {
                format!("app/{rel}")
            };
        }
        if path.starts_with(&self.runtime_app_dir) {
            return "app".to_string();
        }
        if path.starts_with(&self.build_dir) {
            return "build".to_string();
        }
        if path.starts_with(&self.runtime_dir) {
            return "stratus".to_string();
        }
        if self.handler_paths.iter().any(|h| path.starts_with(h)) {
            return "handlers".to_string();
        }
        if module_id.contains("assets") || module_id.starts_with("\0raw:") {
            return "raw".to_string();
        }
        if module_id.starts_with('\0') {
            return "rollup".to_string();
        }
        String::new()
    }

    /// Output file name for a non-entry chunk.
    pub fn file_name(&self, chunk: &RenderedChunk) -> String {
        let bucket = chunk
            .module_ids
            .last()
            .map(|id| self.bucket(id))
            .unwrap_or_default();
        let stem = chunk.name();
        if bucket.is_empty() {
            format!("chunks/{stem}.mjs")
        } else {
            format!("chunks/{bucket}/{stem}.mjs")
        }
    }
}

/// Renames every chunk and rewrites references between output files.
pub fn assign_chunk_names(ctx: &BuildContext, artifacts: &mut BundleArtifacts) {
    let buckets = ChunkBuckets::new(ctx);
    let mut renames: HashMap<String, String> = HashMap::new();

    for chunk in &artifacts.chunks {
        let new_name = if chunk.is_entry {
            ctx.options.entry_file_name.clone()
        } else {
            buckets.file_name(chunk)
        };
        if new_name != chunk.file_name {
            renames.insert(chunk.file_name.clone(), new_name);
        }
    }
    if renames.is_empty() {
        return;
    }

    for chunk in &mut artifacts.chunks {
        let old_name = chunk.file_name.clone();
        let new_name = renames.get(&old_name).cloned().unwrap_or(old_name.clone());

        chunk.code = rewrite_references(&chunk.code, &old_name, &new_name, &renames);
        chunk.imports = chunk
            .imports
            .iter()
            .map(|import| renames.get(import).cloned().unwrap_or_else(|| import.clone()))
            .collect();
        chunk.file_name = new_name;
    }

    for file in &mut artifacts.files {
        let Some(chunk_name) = file.file_name.strip_suffix(".map") else {
            continue;
        };
        if let Some(renamed) = renames.get(chunk_name) {
            file.file_name = format!("{renamed}.map");
        }
    }
}

fn rewrite_references(
    code: &str,
    old_name: &str,
    new_name: &str,
    renames: &HashMap<String, String>,
) -> String {
    let old_dir = parent_dir(old_name);
    let new_dir = parent_dir(new_name);
    let mut code = code.to_string();

    for (from, to) in renames {
        let old_spec = relative_specifier(&old_dir, from);
        let new_spec = relative_specifier(&new_dir, to);
        for quote in ['"', '\''] {
            code = code.replace(
                &format!("{quote}{old_spec}{quote}"),
                &format!("{quote}{new_spec}{quote}"),
            );
        }
    }

    let old_map = format!("sourceMappingURL={}.map", file_name_of(old_name));
    if code.contains(&old_map) {
        code = code.replace(
            &old_map,
            &format!("sourceMappingURL={}.map", file_name_of(new_name)),
        );
    }
    code
}

fn parent_dir(file_name: &str) -> PathBuf {
    Path::new(file_name)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn file_name_of(file_name: &str) -> &str {
    file_name.rsplit('/').next().unwrap_or(file_name)
}

/// `./x.mjs`-style specifier for `target` as imported from `from_dir`.
fn relative_specifier(from_dir: &Path, target: &str) -> String {
    let from_clean = from_dir.clean();
    let to_clean = Path::new(target).clean();
    let from: Vec<_> = from_clean.components().collect();
    let to: Vec<_> = to_clean.components().collect();
    let to_dir_len = to.len().saturating_sub(1);

    let common = from
        .iter()
        .zip(to.iter().take(to_dir_len))
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutputFile;
    use serde_json::json;
    use std::sync::Arc;
    use stratus_config::{Environment, load_options};

    fn ctx(root: &Path) -> BuildContext {
        let options = load_options(
            json!({ "runtimeDir": "runtime", "buildDir": ".stratus" }),
            &Environment::new(root),
        )
        .unwrap();
        BuildContext::new(Arc::new(options), Vec::new())
    }

    fn chunk(file_name: &str, modules: &[&str], code: &str) -> RenderedChunk {
        RenderedChunk {
            file_name: file_name.to_string(),
            code: code.to_string(),
            is_entry: false,
            module_ids: modules.iter().map(|m| m.to_string()).collect(),
            imports: Vec::new(),
        }
    }

    #[test]
    fn last_module_decides_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ctx = ctx(root);
        let buckets = ChunkBuckets::new(&ctx);

        let runtime = root.join("runtime/utils.mjs");
        let handler = root.join("api/users.get.ts");
        let c = chunk(
            "users-abc123.js",
            &[runtime.to_str().unwrap(), handler.to_str().unwrap()],
            "",
        );
        assert_eq!(buckets.file_name(&c), "chunks/handlers/users-abc123.mjs");
    }

    #[test]
    fn bucket_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let buckets = ChunkBuckets::new(&ctx(root));
        let p = |rel: &str| root.join(rel).to_string_lossy().into_owned();

        assert_eq!(buckets.bucket(&p(".stratus/dist/server/pages/a.mjs")), "app/pages");
        assert_eq!(buckets.bucket(&p("runtime/app/render.mjs")), "app");
        assert_eq!(buckets.bucket(&p(".stratus/types/x.mjs")), "build");
        assert_eq!(buckets.bucket(&p("runtime/entries/node.mjs")), "stratus");
        assert_eq!(buckets.bucket("\0raw:/x/readme.md"), "raw");
        assert_eq!(buckets.bucket("\0virtual:#internal/stratus/virtual/storage"), "rollup");
        assert_eq!(buckets.bucket(&p("node_modules/h3/index.mjs")), "");
    }

    #[test]
    fn renames_rewrite_imports_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ctx = ctx(root);
        let handler = root.join("routes/index.ts").to_string_lossy().into_owned();

        let mut entry = chunk("main.js", &[], "import { a } from './index-x1.js';\n");
        entry.is_entry = true;
        entry.imports = vec!["index-x1.js".to_string()];
        let route = chunk(
            "index-x1.js",
            &[&handler],
            "export const a = 1;\n//# sourceMappingURL=index-x1.js.map",
        );

        let mut artifacts = BundleArtifacts {
            chunks: vec![entry, route],
            files: vec![OutputFile {
                file_name: "index-x1.js.map".to_string(),
                contents: b"{}".to_vec(),
            }],
        };
        assign_chunk_names(&ctx, &mut artifacts);

        assert_eq!(artifacts.chunks[0].file_name, "index.mjs");
        assert_eq!(
            artifacts.chunks[0].code,
            "import { a } from './chunks/handlers/index-x1.mjs';\n"
        );
        assert_eq!(artifacts.chunks[0].imports, vec!["chunks/handlers/index-x1.mjs"]);
        assert_eq!(artifacts.chunks[1].file_name, "chunks/handlers/index-x1.mjs");
        assert!(artifacts.chunks[1].code.ends_with("sourceMappingURL=index-x1.mjs.map"));
        assert_eq!(artifacts.files[0].file_name, "chunks/handlers/index-x1.mjs.map");
    }

    #[test]
    fn relative_specifiers() {
        assert_eq!(relative_specifier(Path::new(""), "chunks/a.mjs"), "./chunks/a.mjs");
        assert_eq!(relative_specifier(Path::new("chunks/x"), "chunks/y/b.mjs"), "../y/b.mjs");
        assert_eq!(relative_specifier(Path::new("chunks/x"), "chunks/x/c.mjs"), "./c.mjs");
        assert_eq!(relative_specifier(Path::new("chunks/x"), "index.mjs"), "../../index.mjs");
    }
}
