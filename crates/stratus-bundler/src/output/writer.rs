//! Atomic writing of the server bundle.
//!
//! All files are first written next to their targets with a `.tmp`
//! extension and only renamed into place once every write succeeded. If
//! anything fails, the temporary files are removed again.
//!
//! Every file name is cleaned and joined onto the server directory; a name
//! that would land outside of it (`../`, absolute paths, NUL bytes) is
//! rejected before anything is written.

use std::fs;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::pipeline::OutputFile;
use crate::{Error, Result};

/// Writes `files` below `dir`, replacing existing files.
pub fn write_output(dir: &Path, files: &[OutputFile]) -> Result<()> {
    let dir = normalize_dir(dir)?;
    fs::create_dir_all(&dir).map_err(|e| {
        Error::WriteFailure(format!(
            "Failed to create output directory '{}': {}",
            dir.display(),
            e
        ))
    })?;

    let mut operations = Vec::with_capacity(files.len());
    for file in files {
        let target = validate_output_path(&dir, &file.file_name)?;
        operations.push((target, file.contents.as_slice()));
    }

    write_files_atomic(&operations)?;
    tracing::debug!(files = operations.len(), dir = %dir.display(), "server bundle written");
    Ok(())
}

fn normalize_dir(dir: &Path) -> Result<PathBuf> {
    let cleaned = dir.clean();
    if cleaned.is_absolute() {
        return Ok(cleaned);
    }
    let cwd = std::env::current_dir().map_err(|e| {
        Error::InvalidOutputPath(format!("Failed to get current directory: {}", e))
    })?;
    Ok(cwd.join(cleaned).clean())
}

/// Joins `file_name` onto `base_dir`, refusing names that escape it.
pub(crate) fn validate_output_path(base_dir: &Path, file_name: &str) -> Result<PathBuf> {
    if file_name.contains('\0') {
        return Err(Error::InvalidOutputPath(format!(
            "{:?} contains a null byte",
            file_name
        )));
    }

    #[cfg(target_os = "windows")]
    {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        const DEVICE_NAMES: [&str; 22] = [
            "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
            "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
        ];
        if DEVICE_NAMES.contains(&stem.as_str()) {
            return Err(Error::InvalidOutputPath(format!(
                "{} is a reserved device name",
                file_name
            )));
        }
    }

    let full_path = base_dir.join(Path::new(file_name).clean()).clean();
    if !full_path.starts_with(base_dir) {
        return Err(Error::InvalidOutputPath(format!(
            "'{}' escapes the server directory '{}' (resolved to '{}')",
            file_name,
            base_dir.display(),
            full_path.display()
        )));
    }
    Ok(full_path)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn write_files_atomic(operations: &[(PathBuf, &[u8])]) -> Result<()> {
    let mut temp_files: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(operations.len());

    for (target, contents) in operations {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                cleanup_temp_files(&temp_files);
                Error::WriteFailure(format!(
                    "Failed to create directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp = temp_path(target);
        fs::write(&temp, contents).map_err(|e| {
            cleanup_temp_files(&temp_files);
            Error::WriteFailure(format!(
                "Failed to write temporary file '{}': {}",
                temp.display(),
                e
            ))
        })?;
        temp_files.push((temp, target.clone()));
    }

    for (temp, target) in &temp_files {
        fs::rename(temp, target).map_err(|e| {
            cleanup_temp_files(&temp_files);
            Error::WriteFailure(format!(
                "Failed to rename '{}' to '{}': {}",
                temp.display(),
                target.display(),
                e
            ))
        })?;
    }

    Ok(())
}

fn cleanup_temp_files(temp_files: &[(PathBuf, PathBuf)]) {
    for (temp, _) in temp_files {
        if temp.exists()
            && let Err(e) = fs::remove_file(temp)
        {
            tracing::warn!(path = %temp.display(), error = %e, "failed to remove temporary file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, contents: &str) -> OutputFile {
        OutputFile {
            file_name: name.to_string(),
            contents: contents.as_bytes().to_vec(),
        }
    }

    #[test]
    fn nested_paths_stay_inside() {
        let base = Path::new("/tmp/output/server");
        assert_eq!(
            validate_output_path(base, "chunks/handlers/x.mjs").unwrap(),
            Path::new("/tmp/output/server/chunks/handlers/x.mjs")
        );
        assert_eq!(
            validate_output_path(base, "./index.mjs").unwrap(),
            Path::new("/tmp/output/server/index.mjs")
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let base = Path::new("/tmp/output/server");
        for name in ["../public/index.html", "a/../../../../etc/passwd", "/etc/passwd", "x\0.mjs"] {
            let err = validate_output_path(base, name).unwrap_err();
            assert!(matches!(err, Error::InvalidOutputPath(_)), "{name}");
        }
    }

    #[test]
    fn writes_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        write_output(
            &server,
            &[file("index.mjs", "export {}"), file("chunks/rollup/a.mjs", "1")],
        )
        .unwrap();

        assert_eq!(fs::read_to_string(server.join("index.mjs")).unwrap(), "export {}");
        assert_eq!(fs::read_to_string(server.join("chunks/rollup/a.mjs")).unwrap(), "1");
        let leftovers = walkdir::WalkDir::new(&server)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn invalid_name_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        let result = write_output(&server, &[file("ok.mjs", "1"), file("../escape.mjs", "2")]);
        assert!(result.is_err());
        assert!(!server.join("ok.mjs").exists());
        assert!(!dir.path().join("escape.mjs").exists());
    }
}
