//! `stratus.json`, the description of a finished build.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_config::{Commands, Options};

use crate::assets::relative_path;
use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "stratus.json";

/// Output paths, relative to `output.dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestOutput {
    pub server_dir: String,
    pub public_dir: String,
}

/// Build manifest read by deploy tooling and the prerenderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub date: DateTime<Utc>,
    pub preset: String,
    pub commands: Commands,
    pub output: ManifestOutput,
}

impl BuildManifest {
    pub fn from_options(options: &Options) -> Self {
        let out = &options.output;
        Self {
            date: Utc::now(),
            preset: options.preset.clone(),
            commands: options.commands.clone(),
            output: ManifestOutput {
                server_dir: relative_path(&out.dir, &out.server_dir),
                public_dir: relative_path(&out.dir, &out.public_dir),
            },
        }
    }

    /// Writes the manifest into `output_dir` and returns its path.
    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| Error::io(format!("Failed to create {}", output_dir.display()), e))?;
        let path = output_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::WriteFailure(format!("{MANIFEST_FILE}: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;
        Ok(path)
    }

    pub fn read(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Absolute server directory for a manifest found in `output_dir`.
    pub fn server_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.output.server_dir)
    }

    pub fn public_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.output.public_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratus_config::{Environment, load_options};

    #[test]
    fn paths_are_relative_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_options(
            json!({ "commands": { "preview": "node ./server/index.mjs" } }),
            &Environment::new(dir.path()),
        )
        .unwrap();
        let manifest = BuildManifest::from_options(&options);

        assert_eq!(manifest.preset, "node-server");
        assert_eq!(manifest.output.server_dir, "server");
        assert_eq!(manifest.output.public_dir, "public");

        let path = manifest.write(&options.output.dir).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["commands"], json!({ "preview": "node ./server/index.mjs" }));
        assert_eq!(raw["output"], json!({ "serverDir": "server", "publicDir": "public" }));

        let back = BuildManifest::read(&options.output.dir).unwrap();
        assert_eq!(back.server_dir(&options.output.dir), options.output.server_dir);
    }
}
