//! Size summary of the server directory, printed after a build.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// Files of a directory with their sizes. `node_modules` files are only
/// counted towards the total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    pub entries: Vec<TreeEntry>,
    pub node_modules_size: u64,
}

impl FileTree {
    /// Collects every file under `dir`, skipping source maps.
    pub fn collect(dir: &Path) -> Result<Self> {
        let mut tree = FileTree::default();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                Error::io(
                    format!("Failed to walk {}", dir.display()),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk error")),
                )
            })?;
            if !entry.file_type().is_file()
                || entry.path().extension().is_some_and(|ext| ext == "map")
            {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| {
                    Error::io(
                        format!("Failed to stat {}", entry.path().display()),
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("metadata error")),
                    )
                })?
                .len();
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            if rel.components().any(|c| c.as_os_str() == "node_modules") {
                tree.node_modules_size += size;
            } else {
                tree.entries.push(TreeEntry {
                    path: entry.path().to_path_buf(),
                    size,
                });
            }
        }
        tree.entries.sort_by(|a, b| b.path.cmp(&a.path));
        Ok(tree)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum::<u64>() + self.node_modules_size
    }

    /// Tree lines with paths shown relative to `base`.
    pub fn render(&self, base: &Path) -> String {
        let mut out = String::new();
        let last = self.entries.len().saturating_sub(1);
        for (i, entry) in self.entries.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            let shown = entry.path.strip_prefix(base).unwrap_or(&entry.path);
            let _ = writeln!(
                out,
                "  {branch} {} ({})",
                shown.display(),
                format_size(entry.size)
            );
        }
        let _ = write!(out, "Σ Total size: {}", format_size(self.total_size()));
        out
    }
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
