//! Handler scanner: discovers middleware and route files under the scan
//! directories and turns their paths into route patterns.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use stratus_config::{Handler, HttpMethod};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Extensions picked up by the scanner.
pub const SCAN_EXTENSIONS: [&str; 4] = ["ts", "mjs", "js", "cjs"];

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-zA-Z]+$").expect("valid extension regex"));
static CATCH_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\.\.\.\]").expect("valid catch-all regex"));
static NAMED_CATCH_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\.\.\.(\w+)\]").expect("valid named catch-all regex"));
static PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\w+)\]").expect("valid param regex"));
static METHOD_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(connect|delete|get|head|options|patch|post|put|trace)$")
        .expect("valid method regex")
});

/// Fixed subdirectories of every scan directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Middleware,
    Api,
    Routes,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Middleware, Section::Api, Section::Routes];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Section::Middleware => "middleware",
            Section::Api => "api",
            Section::Routes => "routes",
        }
    }

    /// Route prefix for files in this section.
    pub fn base(&self) -> &'static str {
        match self {
            Section::Middleware | Section::Routes => "/",
            Section::Api => "/api",
        }
    }
}

/// A file found under a section directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub dir: PathBuf,
    /// Path relative to `dir`, `/`-separated.
    pub path: String,
    pub full_path: PathBuf,
}

/// Scans every section of every scan directory.
///
/// Middleware comes first, then API routes, then generic routes. Within a
/// section, directories keep their configured order and files are sorted by
/// descending path so specific routes precede catch-alls.
pub fn scan_handlers(scan_dirs: &[PathBuf]) -> Result<Vec<Handler>> {
    let mut handlers = scan_middleware(scan_dirs)?;
    handlers.extend(scan_routes(scan_dirs, Section::Api)?);
    handlers.extend(scan_routes(scan_dirs, Section::Routes)?);
    Ok(handlers)
}

pub fn scan_middleware(scan_dirs: &[PathBuf]) -> Result<Vec<Handler>> {
    Ok(scan_section(scan_dirs, Section::Middleware)?
        .into_iter()
        .map(|file| Handler {
            route: String::new(),
            handler: file.full_path.to_string_lossy().into_owned(),
            method: None,
            lazy: false,
            middleware: true,
        })
        .collect())
}

pub fn scan_routes(scan_dirs: &[PathBuf], section: Section) -> Result<Vec<Handler>> {
    Ok(scan_section(scan_dirs, section)?
        .into_iter()
        .map(|file| {
            let (route, method) = route_from_path(&file.path, section.base());
            Handler {
                route,
                handler: file.full_path.to_string_lossy().into_owned(),
                method,
                lazy: true,
                middleware: false,
            }
        })
        .collect())
}

/// Directories watched for handler additions and removals.
pub fn section_dirs(scan_dirs: &[PathBuf]) -> Vec<PathBuf> {
    scan_dirs
        .iter()
        .flat_map(|dir| Section::ALL.iter().map(move |s| dir.join(s.dir_name())))
        .collect()
}

fn scan_section(scan_dirs: &[PathBuf], section: Section) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    for dir in scan_dirs {
        files.extend(scan_dir(&dir.join(section.dir_name()))?);
    }
    Ok(files)
}

/// Lists scannable files under `dir`, dotfiles included.
///
/// A missing directory yields an empty list.
pub fn scan_dir(dir: &Path) -> Result<Vec<ScannedFile>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| Error::IoError {
            message: format!("Failed to scan {}", dir.display()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let full_path = entry.path();
        let scannable = full_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SCAN_EXTENSIONS.contains(&ext));
        if !scannable {
            continue;
        }
        let Ok(relative) = full_path.strip_prefix(dir) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(ScannedFile {
            dir: dir.to_path_buf(),
            path,
            full_path: full_path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| match b.path.cmp(&a.path) {
        Ordering::Equal => b.full_path.cmp(&a.full_path),
        other => other,
    });
    Ok(files)
}

/// Converts a section-relative file path into a route pattern.
///
/// ```
/// use stratus_bundler::scan::route_from_path;
/// use stratus_config::HttpMethod;
///
/// assert_eq!(
///     route_from_path("users/[id].get.ts", "/api"),
///     ("/api/users/:id".to_string(), Some(HttpMethod::Get))
/// );
/// assert_eq!(route_from_path("[...slug].ts", "/").0, "/**:slug");
/// ```
pub fn route_from_path(path: &str, base: &str) -> (String, Option<HttpMethod>) {
    let route = EXTENSION.replace(path, "");
    let route = CATCH_ALL.replace_all(&route, "**");
    let route = NAMED_CATCH_ALL.replace_all(&route, "**:$1");
    let route = PARAM.replace_all(&route, ":$1");

    let mut route = with_base(&route, base);

    let mut method = None;
    if let Some(caps) = METHOD_SUFFIX.captures(&route) {
        method = caps[1].parse::<HttpMethod>().ok();
        let start = caps.get(0).map_or(route.len(), |m| m.start());
        route.truncate(start);
    }

    if let Some(stripped) = route.strip_suffix("/index") {
        route = stripped.to_string();
    } else if route == "index" {
        route.clear();
    }

    if route.is_empty() {
        route.push('/');
    }
    (route, method)
}

fn with_base(route: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    let route = route.trim_matches('/');
    let joined = if route.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{route}")
    };
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{joined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn api_route_with_method() {
        assert_eq!(
            route_from_path("users/[id].get.ts", "/api"),
            ("/api/users/:id".to_string(), Some(HttpMethod::Get))
        );
    }

    #[test]
    fn catch_alls() {
        assert_eq!(route_from_path("[...].ts", "/").0, "/**");
        assert_eq!(route_from_path("[...slug].ts", "/").0, "/**:slug");
        assert_eq!(route_from_path("docs/[...path].mjs", "/api").0, "/api/docs/**:path");
    }

    #[test]
    fn index_collapses_to_section_base() {
        assert_eq!(route_from_path("index.ts", "/api").0, "/api");
        assert_eq!(route_from_path("index.ts", "/").0, "/");
        assert_eq!(route_from_path("users/index.post.ts", "/api"),
            ("/api/users".to_string(), Some(HttpMethod::Post)));
    }

    #[test]
    fn method_token_only_matches_at_the_end() {
        let (route, method) = route_from_path("users.getter.ts", "/api");
        assert_eq!(route, "/api/users.getter");
        assert_eq!(method, None);
    }

    #[test]
    fn scan_orders_sections_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in [
            "middleware/auth.ts",
            "api/users/[id].get.ts",
            "api/users/index.ts",
            "api/[...].ts",
            "routes/index.ts",
            "routes/about.mjs",
            "routes/notes.md",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "export default () => 'ok'").unwrap();
        }

        let handlers = scan_handlers(&[root.to_path_buf()]).unwrap();
        let routes: Vec<_> = handlers.iter().map(|h| h.route.as_str()).collect();
        assert_eq!(routes, vec!["", "/api/users/:id", "/api/users", "/api/**", "/", "/about"]);

        assert!(handlers[0].middleware);
        assert!(!handlers[0].lazy);
        assert!(handlers[1..].iter().all(|h| h.lazy && !h.middleware));
        assert_eq!(handlers[1].method, Some(HttpMethod::Get));
    }

    #[test]
    fn missing_sections_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_handlers(&[dir.path().to_path_buf()]).unwrap().is_empty());
    }
}
