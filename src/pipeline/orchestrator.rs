//! Encounter pipeline orchestrator.
//!
//! Sequences the stages for one encounter: presign audio → transcribe →
//! correct → generate note(s) → check compliance. Multi-patient sessions fan
//! out sequentially, and each patient's compliance check completes before
//! the next patient's note generation begins. Stages propagate their first
//! fatal failure; the binary is the sole error boundary.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::compliance::{ComplianceChecker, ComplianceOutcome};
use super::error::PipelineError;
use super::notes::NoteGenerator;
use super::transcribe::Transcriber;
use crate::audio::AudioLocator;
use crate::cases::EncounterCase;

/// Summary of one completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub case_name: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<ComplianceOutcome>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.verdict.is_fail())
    }
}

pub struct EncounterPipeline {
    audio: Arc<dyn AudioLocator>,
    transcriber: Transcriber,
    generator: NoteGenerator,
    checker: ComplianceChecker,
}

impl EncounterPipeline {
    pub fn new(
        audio: Arc<dyn AudioLocator>,
        transcriber: Transcriber,
        generator: NoteGenerator,
        checker: ComplianceChecker,
    ) -> Self {
        Self {
            audio,
            transcriber,
            generator,
            checker,
        }
    }

    pub fn transcriber(&mut self) -> &mut Transcriber {
        &mut self.transcriber
    }

    pub fn generator(&mut self) -> &mut NoteGenerator {
        &mut self.generator
    }

    pub fn checker(&mut self) -> &mut ComplianceChecker {
        &mut self.checker
    }

    /// Run the full pipeline for one encounter case.
    pub async fn run(&mut self, case: &EncounterCase) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            case = %case.name,
            diarize = case.diarize,
            multi = case.multi,
            "Starting encounter run"
        );

        let audio_url = self.audio.presigned_url(case).await?;
        tracing::debug!(case = %case.name, url = %audio_url, "Audio source resolved");

        self.transcriber.transcribe(&audio_url, case).await?;
        self.transcriber.correct(case).await?;
        let transcript = self.transcriber.transcript().to_string();

        let mut outcomes = Vec::new();
        if !case.multi {
            let note = self.generator.generate_note(case, &transcript).await?;
            self.checker.set_label(&case.name);
            outcomes.push(self.checker.check(&note.payload, &transcript).await?);
        } else {
            let entries = self
                .generator
                .generate_patient_list(case, &transcript)
                .await?
                .to_vec();
            for entry in &entries {
                let note = self.generator.generate_patient_note(entry).await?;
                self.checker.set_label(note.label.clone());
                outcomes.push(self.checker.check(&note.payload, &transcript).await?);
            }
        }

        tracing::info!(
            run_id = %run_id,
            case = %case.name,
            checks = outcomes.len(),
            elapsed_s = started.elapsed().as_secs_f32(),
            "Encounter run complete"
        );
        Ok(RunReport {
            run_id,
            case_name: case.name.clone(),
            started_at,
            outcomes,
        })
    }
}
