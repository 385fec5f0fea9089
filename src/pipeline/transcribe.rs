//! Transcription stage: raw transcript, then corrected transcript.
//!
//! Owns the transcript exclusively while it advances through
//! `Idle → Transcribed → Corrected`; later stages receive it by value.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use super::artifacts::{request_trail, response_trail, ArtifactStore};
use super::error::PipelineError;
use super::remote::RemoteInvoke;
use crate::cases::EncounterCase;

/// Fixed correction instruction sent with every edit request.
pub const CORRECTION_INSTRUCTIONS: &str =
    "Please correct the transcription to remove any errors and ensure it is grammatically correct. \
     Please also update the patient and provider information to be correct. ";

/// Appended when diarization is enabled: speaker labels drift between
/// speakers and the editor is asked to reattach them.
pub const DIARIZATION_CORRECTION_INSTRUCTIONS: &str =
    "Sometimes, speaker labels are misplaced—parts of one speaker's sentence may be wrongly \
     attached to another speaker. Fix the speaker tags so that each sentence makes logical and \
     grammatical sense and belongs to the correct speaker.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptState {
    Idle,
    Transcribed,
    Corrected,
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    url: &'a str,
    diarize: bool,
    timestamped: bool,
}

#[derive(Serialize)]
struct CorrectionEncounterInformation<'a> {
    encounter_transcript: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_information: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patient_information: Option<&'a str>,
}

#[derive(Serialize)]
struct CorrectionRequest<'a> {
    encounter_information: CorrectionEncounterInformation<'a>,
    transcript_correction_instructions: String,
}

pub struct Transcriber {
    remote: Arc<dyn RemoteInvoke>,
    store: Arc<ArtifactStore>,
    provider_information: String,
    state: TranscriptState,
    transcript: String,
}

impl Transcriber {
    pub fn new(
        remote: Arc<dyn RemoteInvoke>,
        store: Arc<ArtifactStore>,
        provider_information: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            provider_information: provider_information.into(),
            state: TranscriptState::Idle,
            transcript: String::new(),
        }
    }

    pub fn state(&self) -> TranscriptState {
        self.state
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Resume from a persisted editor response instead of re-transcribing.
    pub fn load(&mut self, path: &Path) -> Result<(), PipelineError> {
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
        self.transcript = expect_transcript("edit", &response)?;
        self.state = TranscriptState::Corrected;
        tracing::info!(path = %path.display(), "Loaded corrected transcript from disk");
        Ok(())
    }

    /// Turn the audio reference into a raw transcript.
    pub async fn transcribe(
        &mut self,
        audio_url: &str,
        case: &EncounterCase,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        tracing::info!(case = %case.name, diarize = case.diarize, "Transcribing");

        let request = serde_json::to_value(TranscribeRequest {
            url: audio_url,
            diarize: case.diarize,
            timestamped: false,
        })?;
        self.store.save(&request_trail(&case.name, "transcribe"), &request)?;

        let response = self.remote.invoke("transcribe", &request).await?;
        self.store
            .save(&response_trail(&case.name, "transcribe"), &response)?;

        self.transcript = expect_transcript("transcribe", &response)?;
        self.state = TranscriptState::Transcribed;

        tracing::info!(
            case = %case.name,
            elapsed_s = started.elapsed().as_secs_f32(),
            "Transcription complete"
        );
        Ok(())
    }

    /// Replace the raw transcript with the remote editor's corrected text.
    pub async fn correct(&mut self, case: &EncounterCase) -> Result<(), PipelineError> {
        if self.state == TranscriptState::Idle {
            return Err(PipelineError::StageOrder {
                operation: "correct",
                requires: "transcribe",
            });
        }

        let started = Instant::now();
        tracing::info!(case = %case.name, "Correcting transcript");

        let mut instructions = CORRECTION_INSTRUCTIONS.to_string();
        if case.diarize {
            instructions.push_str(DIARIZATION_CORRECTION_INSTRUCTIONS);
        }

        let request = serde_json::to_value(CorrectionRequest {
            encounter_information: CorrectionEncounterInformation {
                encounter_transcript: &self.transcript,
                provider_information: Some(&self.provider_information),
                // Multi-patient sessions have no single patient context.
                patient_information: (!case.multi).then_some(case.patient_information.as_str()),
            },
            transcript_correction_instructions: instructions,
        })?;
        self.store.save(&request_trail(&case.name, "edit"), &request)?;

        let response = self.remote.invoke("edit", &request).await?;
        self.store.save(&response_trail(&case.name, "edit"), &response)?;

        self.transcript = expect_transcript("edit", &response)?;
        self.state = TranscriptState::Corrected;

        tracing::info!(
            case = %case.name,
            elapsed_s = started.elapsed().as_secs_f32(),
            "Correction complete"
        );
        Ok(())
    }
}

fn expect_transcript(operation: &str, response: &Value) -> Result<String, PipelineError> {
    response
        .get("transcript")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PipelineError::UnexpectedShape {
            operation: operation.to_string(),
            detail: "response is missing a transcript field".to_string(),
        })
}
