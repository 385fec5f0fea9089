//! Application configuration.
//!
//! One explicit `AppConfig` value deserialized from a JSON file and passed by
//! reference into each component's constructor. Endpoint resolution (operation
//! key to full URL) lives in `pipeline::remote` next to the client that uses
//! the table.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "notewright";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    "notewright=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not valid configuration JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("case record not found: {0}")]
    UnknownCase(String),
}

/// Top-level configuration for one run.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Credential token sent with every remote invocation.
    pub api_key: String,
    /// Base address of the remote reasoning service.
    pub base_url: String,
    /// Operation key to relative path, joined to `base_url` at call time.
    pub endpoints: Vec<Endpoint>,
    /// Run-scoped output root for persisted artifacts.
    pub output_dir: PathBuf,
    /// Case to process when the CLI does not override it.
    pub case_name: String,
    /// Read-only case registry file.
    pub cases_file: PathBuf,
    /// Provider context carried into correction and note generation.
    pub provider_information: String,
    pub schema_builder: SchemaBuilderConfig,
    pub rule_builder: RuleBuilderConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaBuilderConfig {
    /// Corpus of sample notes the schema is distilled from.
    pub samples_file: PathBuf,
    /// Artifact name the built schema persists under.
    pub schema_artifact: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleBuilderConfig {
    /// Audit requirements text the ruleset is built from.
    pub requirements_file: PathBuf,
    /// Corpus of sample audits.
    pub samples_file: PathBuf,
    /// Artifact name the built ruleset persists under.
    pub rules_artifact: String,
}

/// Credentials and addressing for the bucket holding encounter audio.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Lifetime of presigned audio URLs, in seconds.
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
}

fn default_url_ttl_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config_json() -> &'static str {
        r#"{
            "api_key": "test-key",
            "base_url": "https://service.example.com/api",
            "endpoints": [
                {"key": "transcribe", "url": "v1/transcribe"},
                {"key": "edit", "url": "/v1/edit"}
            ],
            "output_dir": "output",
            "case_name": "Charles Johnson",
            "cases_file": "cases.json",
            "provider_information": "Dr. Goofy Goof, PT, DPT",
            "schema_builder": {
                "samples_file": "corpus/note-samples.txt",
                "schema_artifact": "note-schema.json"
            },
            "rule_builder": {
                "requirements_file": "corpus/audit-requirements.txt",
                "samples_file": "corpus/audit-samples.txt",
                "rules_artifact": "audit-rules.json"
            },
            "audio": {
                "region": "us-east-1",
                "bucket": "encounter-audio",
                "access_key_id": "AKIA",
                "secret_access_key": "secret"
            }
        }"#
    }

    #[test]
    fn parses_full_config() {
        let config: AppConfig = serde_json::from_str(sample_config_json()).unwrap();
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].key, "transcribe");
        assert_eq!(config.case_name, "Charles Johnson");
        assert_eq!(config.schema_builder.schema_artifact, "note-schema.json");
        assert_eq!(config.rule_builder.rules_artifact, "audit-rules.json");
    }

    #[test]
    fn audio_ttl_defaults_to_fifteen_minutes() {
        let config: AppConfig = serde_json::from_str(sample_config_json()).unwrap();
        assert_eq!(config.audio.url_ttl_secs, 900);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = AppConfig::from_file(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn from_file_reports_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn app_name_is_notewright() {
        assert_eq!(APP_NAME, "notewright");
    }
}
