//! Encounter case records and the read-only registry they load from.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigError;

/// One clinical encounter. Immutable once loaded; `name` doubles as the
/// cache/file key for every artifact the run persists.
#[derive(Debug, Clone, Deserialize)]
pub struct EncounterCase {
    pub name: String,
    /// Object key of the recorded audio within the configured bucket.
    pub audio_path: String,
    /// Patient context carried into correction and note generation.
    pub patient_information: String,
    /// Speaker-separated transcription, as opposed to single-speaker dictation.
    pub diarize: bool,
    /// Group/schedule recording covering several patients.
    #[serde(default)]
    pub multi: bool,
}

#[derive(Debug, Deserialize)]
struct CaseFile {
    case_records: Vec<EncounterCase>,
}

/// Read-only lookup-by-name collection of encounter cases.
#[derive(Debug)]
pub struct CaseRegistry {
    cases: HashMap<String, EncounterCase>,
}

impl CaseRegistry {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CaseFile = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_cases(file.case_records))
    }

    pub fn from_cases(cases: Vec<EncounterCase>) -> Self {
        Self {
            cases: cases
                .into_iter()
                .map(|case| (case.name.clone(), case))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EncounterCase> {
        self.cases.get(name)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
