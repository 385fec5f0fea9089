//! Run-scoped artifact persistence.
//!
//! Every stage writes its request/response trail and derived artifacts here
//! as pretty-printed JSON, one file per name under the configured output
//! root. The root is created lazily on first write. A write failure is fatal
//! to the run; a missing file on `load` is not an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::PipelineError;

/// Named JSON artifacts under one output directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path an artifact name maps to.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Serialize `payload` and write it under `name`, overwriting any
    /// previous file. Creates the output root (and parents) if absent.
    pub fn save(&self, name: &str, payload: &Value) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.root).map_err(|source| PipelineError::ArtifactIo {
            name: name.to_string(),
            source,
        })?;
        let text = serde_json::to_string_pretty(payload)?;
        fs::write(self.file_path(name), text).map_err(|source| PipelineError::ArtifactIo {
            name: name.to_string(),
            source,
        })
    }

    /// Read and deserialize the artifact, or `None` if no file exists.
    pub fn load(&self, name: &str) -> Result<Option<Value>, PipelineError> {
        let path = self.file_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PipelineError::ArtifactIo {
                    name: name.to_string(),
                    source,
                })
            }
        };
        let value = serde_json::from_str(&text).map_err(|source| PipelineError::ArtifactJson {
            name: name.to_string(),
            source,
        })?;
        Ok(Some(value))
    }
}

/// `{label}-{stage}-request.json`
pub fn request_trail(label: &str, stage: &str) -> String {
    format!("{label}-{stage}-request.json")
}

/// `{label}-{stage}-response.json`
pub fn response_trail(label: &str, stage: &str) -> String {
    format!("{label}-{stage}-response.json")
}

/// `{label}-{stage}.json` for the derived artifact itself.
pub fn derived_trail(label: &str, stage: &str) -> String {
    format!("{label}-{stage}.json")
}
