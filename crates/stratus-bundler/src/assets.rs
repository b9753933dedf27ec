//! Metadata shared by the public and server asset tables.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{Error, Result};

/// Per-file metadata embedded in generated asset tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMeta {
    #[serde(rename = "type")]
    pub content_type: String,
    pub etag: String,
    pub mtime: String,
}

impl AssetMeta {
    /// Reads `path` and computes its metadata.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read(path)
            .map_err(|e| Error::io(format!("Failed to read asset {}", path.display()), e))?;
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(format!("Failed to stat asset {}", path.display()), e))?;

        Ok(Self {
            content_type: content_type(path),
            etag: etag(&contents),
            mtime: format_mtime(modified),
        })
    }
}

/// Content type for `path`. Text types carry a utf-8 charset.
pub fn content_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let base = match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "yml" | "yaml" => "text/yaml",
        "txt" => "text/plain",
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/vnd.microsoft.icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => "text/plain",
    };

    if base.starts_with("text") {
        format!("{base}; charset=utf-8")
    } else {
        base.to_string()
    }
}

/// Strong etag: content length in hex plus a truncated content hash.
pub fn etag(contents: &[u8]) -> String {
    if contents.is_empty() {
        return "\"0-0\"".to_string();
    }
    let hash = STANDARD.encode(blake3::hash(contents).as_bytes());
    format!("\"{:x}-{}\"", contents.len(), &hash[..27])
}

fn format_mtime(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Files under `dir` whose name has an extension, relative to `dir` with
/// forward slashes, sorted. Dotfiles are skipped and a missing directory
/// yields nothing.
pub fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| Error::IoError {
            message: format!("Failed to scan {}", dir.display()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().contains('.') {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        files.push((rel, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// `to` relative to `from_dir`, with forward slashes. Both must be absolute.
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    use path_clean::PathClean;

    let from_clean = from_dir.clean();
    let to_clean = to.clean();
    let from: Vec<_> = from_clean.components().collect();
    let to: Vec<_> = to_clean.components().collect();
    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

    let parts: Vec<String> = std::iter::repeat_n("..".to_string(), from.len() - common)
        .chain(
            to[common..]
                .iter()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        )
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn text_types_get_charset() {
        assert_eq!(content_type(Path::new("a/readme.md")), "text/markdown; charset=utf-8");
        assert_eq!(content_type(Path::new("x.PNG")), "image/png");
        assert_eq!(content_type(Path::new("unknown.bin")), "text/plain; charset=utf-8");
    }

    #[test]
    fn etag_depends_on_content() {
        let a = etag(b"hello");
        assert!(a.starts_with("\"5-"));
        assert_eq!(a.len(), "\"5-".len() + 27 + 1);
        assert_ne!(a, etag(b"hellO"));
        assert_eq!(etag(b""), "\"0-0\"");
    }

    #[test]
    fn lists_only_dotted_non_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("img/logo.png"), b"png").unwrap();
        fs::write(dir.path().join("robots.txt"), b"").unwrap();
        fs::write(dir.path().join("LICENSE"), b"").unwrap();
        fs::write(dir.path().join(".cache/x.json"), b"{}").unwrap();

        let files: Vec<String> = list_files(dir.path()).unwrap().into_iter().map(|f| f.0).collect();
        assert_eq!(files, vec!["img/logo.png", "robots.txt"]);
        assert!(list_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn relative_paths_walk_up() {
        assert_eq!(
            relative_path(Path::new("/out/server"), Path::new("/out/public/a.css")),
            "../public/a.css"
        );
        assert_eq!(relative_path(Path::new("/out"), Path::new("/out/server")), "server");
        assert_eq!(relative_path(Path::new("/out"), Path::new("/out")), "");
    }
}
