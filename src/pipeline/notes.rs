//! Note generation stage.
//!
//! Single-patient path: one corrected transcript in, one structured note out.
//! Multi-patient path: the encounter transcript is partitioned into a patient
//! list, then each entry's scratch notes feed one generation call. Entries
//! are processed strictly in list order; the caller decides what to chain
//! after each note (the orchestrator runs the per-patient compliance check).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::artifacts::{derived_trail, request_trail, response_trail, ArtifactStore};
use super::error::PipelineError;
use super::remote::RemoteInvoke;
use super::schema::SchemaBuilder;
use crate::cases::EncounterCase;

pub const PATIENT_LIST_REQUEST_FILE: &str = "multi-session-patient-list-request.json";
pub const PATIENT_LIST_RESPONSE_FILE: &str = "multi-session-patient-list-response.json";

/// One patient within a multi-session batch.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientListEntry {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub mrn: Option<String>,
    #[serde(default)]
    pub visit_type: Option<String>,
    /// Ordered session fragments, concatenated before note generation.
    #[serde(default, rename = "scratchNotes")]
    pub scratch_notes: Vec<String>,
}

impl PatientListEntry {
    /// Key used for this patient's artifact files.
    pub fn artifact_label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("patient-{}", self.id),
        }
    }

    /// Patient-information string from name and, when present, date of birth.
    pub fn patient_information(&self) -> Option<String> {
        let name = self.name.as_ref()?;
        let mut info = format!("patient name: {name}");
        if let Some(dob) = &self.dob {
            info.push_str(&format!(" date of birth {dob}"));
        }
        Some(info)
    }

    /// Scratch-note fragments newline-joined in order.
    pub fn joined_scratch_notes(&self) -> String {
        self.scratch_notes.join("\n")
    }
}

/// One structured note, ready for the compliance check.
#[derive(Debug, Clone)]
pub struct GeneratedNote {
    pub label: String,
    pub payload: Value,
}

#[derive(Serialize, Default)]
struct NoteEncounterInformation<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    patient_information: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_information: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encounter_transcript: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dictation_transcript: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scratch_notes: Option<&'a str>,
}

#[derive(Serialize)]
struct NoteRequest<'a> {
    encounter_information: NoteEncounterInformation<'a>,
    note_schema: String,
}

#[derive(Serialize)]
struct PatientListEncounterInformation<'a> {
    provider_information: &'a str,
    encounter_transcript: &'a str,
}

#[derive(Serialize)]
struct PatientListRequest<'a> {
    encounter_information: PatientListEncounterInformation<'a>,
}

pub struct NoteGenerator {
    remote: Arc<dyn RemoteInvoke>,
    store: Arc<ArtifactStore>,
    schema: SchemaBuilder,
    provider_information: String,
    patient_list: Vec<PatientListEntry>,
}

impl NoteGenerator {
    pub fn new(
        remote: Arc<dyn RemoteInvoke>,
        store: Arc<ArtifactStore>,
        schema: SchemaBuilder,
        provider_information: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            schema,
            provider_information: provider_information.into(),
            patient_list: Vec::new(),
        }
    }

    pub fn schema_builder(&mut self) -> &mut SchemaBuilder {
        &mut self.schema
    }

    /// Entries from the last `generate_patient_list` call, in list order.
    pub fn patient_list(&self) -> &[PatientListEntry] {
        &self.patient_list
    }

    /// Single-patient path: one note from the corrected transcript.
    pub async fn generate_note(
        &mut self,
        case: &EncounterCase,
        transcript: &str,
    ) -> Result<GeneratedNote, PipelineError> {
        let note_schema = serde_json::to_string(self.schema.ensure_built().await?)?;

        let started = Instant::now();
        tracing::info!(case = %case.name, "Generating note");

        let request = serde_json::to_value(NoteRequest {
            encounter_information: NoteEncounterInformation {
                provider_information: Some(&self.provider_information),
                patient_information: Some(&case.patient_information),
                // Diarized encounters carry a dialogue transcript; dictated
                // ones carry a dictation transcript. Never both.
                encounter_transcript: case.diarize.then_some(transcript),
                dictation_transcript: (!case.diarize).then_some(transcript),
                ..Default::default()
            },
            note_schema,
        })?;
        self.store.save(&request_trail(&case.name, "note"), &request)?;

        let response = self.remote.invoke("noteGenerator", &request).await?;
        self.store.save(&response_trail(&case.name, "note"), &response)?;

        let payload = expect_note(&response)?;
        self.store.save(&derived_trail(&case.name, "note"), &payload)?;

        tracing::info!(
            case = %case.name,
            elapsed_s = started.elapsed().as_secs_f32(),
            "Note generated"
        );
        Ok(GeneratedNote {
            label: case.name.clone(),
            payload,
        })
    }

    /// Partition a multi-session encounter transcript into patient entries.
    /// A response that is not a list yields zero entries; a malformed entry
    /// inside a list is skipped. Both are logged.
    pub async fn generate_patient_list(
        &mut self,
        case: &EncounterCase,
        transcript: &str,
    ) -> Result<&[PatientListEntry], PipelineError> {
        self.schema.ensure_built().await?;

        let started = Instant::now();
        tracing::info!(case = %case.name, "Generating multi-session patient list");

        let request = serde_json::to_value(PatientListRequest {
            encounter_information: PatientListEncounterInformation {
                provider_information: &self.provider_information,
                encounter_transcript: transcript,
            },
        })?;
        self.store.save(PATIENT_LIST_REQUEST_FILE, &request)?;

        let response = self.remote.invoke("multiSessionGenerator", &request).await?;
        self.store.save(PATIENT_LIST_RESPONSE_FILE, &response)?;

        self.patient_list = parse_patient_list(&response);

        tracing::info!(
            case = %case.name,
            patients = self.patient_list.len(),
            elapsed_s = started.elapsed().as_secs_f32(),
            "Patient list generated"
        );
        Ok(&self.patient_list)
    }

    /// Generate one note from a patient entry's scratch notes.
    pub async fn generate_patient_note(
        &mut self,
        entry: &PatientListEntry,
    ) -> Result<GeneratedNote, PipelineError> {
        let note_schema = serde_json::to_string(self.schema.ensure_built().await?)?;

        let label = entry.artifact_label();
        let started = Instant::now();
        tracing::info!(patient = %label, "Generating note");

        let scratch_notes = entry.joined_scratch_notes();
        let patient_information = entry.patient_information();

        let request = serde_json::to_value(NoteRequest {
            encounter_information: NoteEncounterInformation {
                provider_information: Some(&self.provider_information),
                patient_information: patient_information.as_deref(),
                scratch_notes: Some(&scratch_notes),
                ..Default::default()
            },
            note_schema,
        })?;
        self.store.save(&request_trail(&label, "multi-note"), &request)?;

        let response = self.remote.invoke("noteGenerator", &request).await?;
        self.store
            .save(&response_trail(&label, "multi-note"), &response)?;

        let payload = expect_note(&response)?;
        self.store.save(&derived_trail(&label, "multi-note"), &payload)?;

        tracing::info!(
            patient = %label,
            elapsed_s = started.elapsed().as_secs_f32(),
            "Note generated"
        );
        Ok(GeneratedNote { label, payload })
    }

    /// Generate every listed patient's note in order, with no per-note
    /// chaining. The orchestrator loops `generate_patient_note` itself when
    /// a compliance check must follow each note.
    pub async fn generate_all_notes(&mut self) -> Result<Vec<GeneratedNote>, PipelineError> {
        let entries = self.patient_list.clone();
        let mut notes = Vec::with_capacity(entries.len());
        for entry in &entries {
            notes.push(self.generate_patient_note(entry).await?);
        }
        Ok(notes)
    }

    /// Resume from a persisted note response instead of regenerating.
    pub fn load_note(
        &self,
        label: impl Into<String>,
        path: &Path,
    ) -> Result<GeneratedNote, PipelineError> {
        let name = path.display().to_string();
        let text =
            std::fs::read_to_string(path).map_err(|source| PipelineError::ArtifactIo {
                name: name.clone(),
                source,
            })?;
        let response: Value =
            serde_json::from_str(&text).map_err(|source| PipelineError::ArtifactJson {
                name,
                source,
            })?;
        let payload = expect_note(&response)?;
        tracing::info!(path = %path.display(), "Loaded note from disk");
        Ok(GeneratedNote {
            label: label.into(),
            payload,
        })
    }
}

fn parse_patient_list(response: &Value) -> Vec<PatientListEntry> {
    let Some(items) = response.as_array() else {
        tracing::warn!("patient list response was not a list; producing zero notes");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!(%error, "skipping malformed patient list entry");
                None
            }
        })
        .collect()
}

fn expect_note(response: &Value) -> Result<Value, PipelineError> {
    response
        .get("note")
        .cloned()
        .ok_or_else(|| PipelineError::UnexpectedShape {
            operation: "noteGenerator".to_string(),
            detail: "response is missing a note field".to_string(),
        })
}
