//! Lexical reachability trace over installed packages.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;

use crate::resolver::{ModuleResolver, is_node_builtin};

static STATIC_SPECIFIERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:require|import)\s*\(\s*["']([^"'\n]+)["']\s*\)|\b(?:import|export)\s+(?:[\w*{}\s,$]+\s+from\s+)?["']([^"'\n]+)["']"#,
    )
    .expect("specifier regex is valid")
});

static DYNAMIC_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["']([^"'\n]*/)["']\s*\+"#).expect("dynamic require regex is valid")
});

const TRACED_EXTENSIONS: [&str; 3] = ["js", "mjs", "cjs"];
const DYNAMIC_EXTENSIONS: [&str; 5] = ["js", "mjs", "cjs", "json", "node"];

/// Specifiers referenced by `code`, in source order.
pub fn extract_specifiers(code: &str) -> Vec<String> {
    STATIC_SPECIFIERS
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Directory prefixes of `require("./dir/" + name)` style lookups.
pub fn extract_dynamic_dirs(code: &str) -> Vec<String> {
    DYNAMIC_REQUIRE
        .captures_iter(code)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Breadth-first walk from `entries` through every lexically visible import.
///
/// Only files inside a `node_modules` directory are kept. Builtins and
/// specifiers that fail to resolve are skipped.
pub fn trace_files(entries: &[PathBuf], resolver: &ModuleResolver) -> IndexSet<PathBuf> {
    let mut seen: IndexSet<PathBuf> = IndexSet::new();
    let mut queue: VecDeque<PathBuf> = entries.iter().cloned().collect();

    while let Some(file) = queue.pop_front() {
        if !seen.insert(file.clone()) {
            continue;
        }
        if !has_extension(&file, &TRACED_EXTENSIONS) {
            continue;
        }
        let Ok(code) = std::fs::read_to_string(&file) else {
            tracing::debug!(path = %file.display(), "trace: unreadable file skipped");
            continue;
        };
        let importer = file.to_string_lossy();

        for specifier in extract_specifiers(&code) {
            if is_node_builtin(&specifier) {
                continue;
            }
            match resolver.resolve(&specifier, Some(importer.as_ref())) {
                Some(resolved) if !seen.contains(&resolved) => queue.push_back(resolved),
                Some(_) => {}
                None => {
                    tracing::trace!(specifier = %specifier, importer = %importer, "trace: unresolved")
                }
            }
        }

        let Some(dir) = file.parent() else {
            continue;
        };
        for prefix in extract_dynamic_dirs(&code) {
            queue.extend(dynamic_candidates(&dir.join(&prefix)));
        }
    }

    seen.into_iter()
        .filter(|path| is_in_node_modules(path))
        .collect()
}

fn dynamic_candidates(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, &DYNAMIC_EXTENSIONS))
        .collect();
    files.sort();
    files
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

fn is_in_node_modules(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "node_modules")
}
