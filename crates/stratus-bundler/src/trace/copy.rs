//! Staging traced files into the output `node_modules`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::package::{NodeModulePath, PackageJson};
use crate::{Error, Result};

const MAX_CONCURRENT_COPIES: usize = 32;

/// One installed package chosen for the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPackage {
    pub dir: PathBuf,
    pub version: semver::Version,
}

/// Picks one installed directory per package name.
///
/// When several copies of a package are traced, the highest version wins.
/// Differing major versions are reported but never fail the build.
pub fn select_packages(files: &[PathBuf]) -> IndexMap<String, SelectedPackage> {
    let mut selected: IndexMap<String, SelectedPackage> = IndexMap::new();

    for file in files {
        let Some(parsed) = NodeModulePath::parse(&file.to_string_lossy()) else {
            continue;
        };
        let dir = parsed.package_dir();
        if selected.get(&parsed.name).is_some_and(|s| s.dir == dir) {
            continue;
        }
        let version = PackageJson::read(&dir).unwrap_or_default().semver();

        match selected.get(&parsed.name) {
            None => {
                selected.insert(parsed.name, SelectedPackage { dir, version });
            }
            Some(existing) if existing.version >= version => {}
            Some(existing) => {
                if existing.version.major != version.major {
                    tracing::warn!(
                        package = %parsed.name,
                        kept = %format!("{}@{}", dir.display(), version),
                        dropped = %format!("{}@{}", existing.dir.display(), existing.version),
                        "Multiple major versions of package {} are being externalized. Picking latest version.",
                        parsed.name
                    );
                }
                selected.insert(parsed.name, SelectedPackage { dir, version });
            }
        }
    }
    selected
}

/// Maps every traced file to its destination under `out_dir/node_modules`.
///
/// Each selected package contributes its `package.json`. When two installed
/// copies provide the same destination, the selected copy wins.
pub fn plan_copies(
    files: &[PathBuf],
    packages: &IndexMap<String, SelectedPackage>,
    out_dir: &Path,
) -> IndexMap<PathBuf, PathBuf> {
    let mut plan: IndexMap<PathBuf, (PathBuf, bool)> = IndexMap::new();

    let manifests = packages.values().map(|p| p.dir.join("package.json"));
    for src in files.iter().cloned().chain(manifests) {
        let Some(parsed) = NodeModulePath::parse(&src.to_string_lossy()) else {
            continue;
        };
        let Some(package) = packages.get(&parsed.name) else {
            continue;
        };
        let preferred = parsed.package_dir() == package.dir;
        if parsed.subpath == "/package.json" && !preferred {
            continue;
        }

        let dst = out_dir
            .join("node_modules")
            .join(&parsed.name)
            .join(parsed.subpath.trim_start_matches('/'));
        match plan.get(&dst) {
            Some((_, true)) => {}
            Some((_, false)) if !preferred => {}
            _ => {
                plan.insert(dst, (src, preferred));
            }
        }
    }

    plan.into_iter().map(|(dst, (src, _))| (dst, src)).collect()
}

/// Executes `plan` (destination to source). Copies run concurrently except
/// on Windows, where they run one at a time.
pub async fn copy_files(plan: IndexMap<PathBuf, PathBuf>) -> Result<usize> {
    let count = plan.len();

    if cfg!(windows) {
        for (dst, src) in plan {
            copy_one(src, dst).await?;
        }
        return Ok(count);
    }

    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_COPIES));
    let mut tasks = JoinSet::new();
    for (dst, src) in plan {
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| Error::io("copy semaphore closed", std::io::Error::other(e)))?;
            copy_one(src, dst).await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| Error::io("copy task failed", std::io::Error::other(e)))??;
    }
    Ok(count)
}

async fn copy_one(src: PathBuf, dst: PathBuf) -> Result<()> {
    match tokio::fs::metadata(&src).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::Trace {
                path: src,
                message: e.to_string(),
            });
        }
    }
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Trace {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
    }
    tokio::fs::copy(&src, &dst)
        .await
        .map_err(|e| Error::Trace {
            path: src.clone(),
            message: format!("copy to {} failed: {e}", dst.display()),
        })?;
    Ok(())
}

/// Writes `out_dir/package.json` naming every bundled dependency.
pub async fn write_root_manifest<'a>(
    out_dir: &Path,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    let names: Vec<&String> = names.into_iter().collect();
    let manifest = json!({
        "private": true,
        "bundledDependencies": names,
    });
    let path = out_dir.join("package.json");
    let contents = serde_json::to_string_pretty(&manifest)
        .map_err(|e| Error::WriteFailure(format!("{}: {e}", path.display())))?;
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| Error::io(format!("Failed to create {}", out_dir.display()), e))?;
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn install(root: &Path, rel: &str, version: &str) -> PathBuf {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"pkg","version":"{version}"}}"#),
        )
        .unwrap();
        fs::write(dir.join("index.js"), format!("module.exports = '{version}'")).unwrap();
        dir.join("index.js")
    }

    #[tokio::test]
    async fn higher_version_wins_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let old = install(dir.path(), "node_modules/pkg", "1.0.0");
        let new = install(dir.path(), "node_modules/other/node_modules/pkg", "2.0.0");
        let files = vec![old, new];

        let packages = select_packages(&files);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages["pkg"].version, semver::Version::new(2, 0, 0));

        let out = dir.path().join("out");
        let plan = plan_copies(&files, &packages, &out);
        let manifests = plan.keys().filter(|p| p.ends_with("package.json")).count();
        assert_eq!(manifests, 1);

        copy_files(plan).await.unwrap();
        let copied = fs::read_to_string(out.join("node_modules/pkg/package.json")).unwrap();
        assert!(copied.contains("2.0.0"));
        let entry = fs::read_to_string(out.join("node_modules/pkg/index.js")).unwrap();
        assert!(entry.contains("2.0.0"));
    }

    #[tokio::test]
    async fn root_manifest_lists_names_only() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["h3".to_string(), "@scope/x".to_string()];
        write_root_manifest(dir.path(), &names).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("package.json")).unwrap())
                .unwrap();
        assert_eq!(
            written,
            json!({ "private": true, "bundledDependencies": ["h3", "@scope/x"] })
        );
    }

    #[tokio::test]
    async fn missing_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = IndexMap::new();
        plan.insert(dir.path().join("out/x.js"), dir.path().join("gone.js"));
        assert_eq!(copy_files(plan).await.unwrap(), 1);
        assert!(!dir.path().join("out/x.js").exists());
    }
}
