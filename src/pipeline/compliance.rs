//! Compliance stage: audit ruleset construction and per-note chart checks.
//!
//! The ruleset follows the same build-once-then-reuse policy as the note
//! schema. A FAIL verdict is a normal, reported outcome; only transport,
//! persistence, and shape failures are errors.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use super::artifacts::ArtifactStore;
use super::cache::{ArtifactCache, CacheState};
use super::error::PipelineError;
use super::remote::RemoteInvoke;
use crate::config::RuleBuilderConfig;

pub const BUILD_RULES_REQUEST_FILE: &str = "build-rules-request.json";

#[derive(Serialize)]
struct BuildRulesRequest<'a> {
    audit_requirements: &'a str,
    samples: &'a str,
}

/// Builds (once) or reloads the audit ruleset from requirements text and
/// sample audits. Same cache policy as `SchemaBuilder`.
pub struct RulesBuilder {
    remote: Arc<dyn RemoteInvoke>,
    store: Arc<ArtifactStore>,
    cache: ArtifactCache,
    requirements_file: PathBuf,
    samples_file: PathBuf,
}

impl RulesBuilder {
    /// Construct the builder, adopting a persisted ruleset if one exists.
    pub fn new(
        remote: Arc<dyn RemoteInvoke>,
        store: Arc<ArtifactStore>,
        config: &RuleBuilderConfig,
    ) -> Result<Self, PipelineError> {
        let mut cache = ArtifactCache::new(&config.rules_artifact);
        if cache.load_persisted(&store)? {
            tracing::info!(artifact = %config.rules_artifact, "Loaded audit rules from disk");
        }
        Ok(Self {
            remote,
            store,
            cache,
            requirements_file: config.requirements_file.clone(),
            samples_file: config.samples_file.clone(),
        })
    }

    pub fn ruleset(&self) -> Option<&Value> {
        self.cache.value()
    }

    pub fn state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Build the ruleset if it is not already built or loaded. Idempotent.
    pub async fn ensure_built(&mut self) -> Result<&Value, PipelineError> {
        if !self.cache.is_loaded() {
            self.build().await?;
        }
        self.cache
            .value()
            .ok_or_else(|| PipelineError::UnexpectedShape {
                operation: "build_rules".to_string(),
                detail: "rules cache empty after build".to_string(),
            })
    }

    async fn build(&mut self) -> Result<(), PipelineError> {
        let started = Instant::now();
        tracing::info!("Building audit rules");
        self.cache.begin_build();

        let result = self.build_inner().await;
        if result.is_err() {
            self.cache.invalidate();
        }
        result?;

        tracing::info!(
            elapsed_s = started.elapsed().as_secs_f32(),
            "Audit rules built"
        );
        Ok(())
    }

    async fn build_inner(&mut self) -> Result<(), PipelineError> {
        let requirements = fs::read_to_string(&self.requirements_file).map_err(|source| {
            PipelineError::CorpusIo {
                path: self.requirements_file.clone(),
                source,
            }
        })?;
        let samples =
            fs::read_to_string(&self.samples_file).map_err(|source| PipelineError::CorpusIo {
                path: self.samples_file.clone(),
                source,
            })?;

        let request = serde_json::to_value(BuildRulesRequest {
            audit_requirements: &requirements,
            samples: &samples,
        })?;
        self.store.save(BUILD_RULES_REQUEST_FILE, &request)?;

        let response = self.remote.invoke("build_rules", &request).await?;
        self.cache.adopt(&self.store, response)
    }
}

/// Aggregate pass/fail over a sequence of rule results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_fail(self) -> bool {
        self == Verdict::Fail
    }
}

/// Verdict plus the individual rule results, in response order.
#[derive(Debug, Clone)]
pub struct ComplianceOutcome {
    pub label: String,
    pub verdict: Verdict,
    pub results: Vec<Value>,
}

/// FAIL iff at least one item's status equals "FAIL". A response that is
/// not a list evaluates to PASS (fail-open, preserved for compatibility).
pub fn evaluate_verdict(response: &Value) -> (Verdict, Vec<Value>) {
    match response.as_array() {
        Some(items) => {
            let failed = items
                .iter()
                .any(|item| item.get("status").and_then(Value::as_str) == Some("FAIL"));
            let verdict = if failed { Verdict::Fail } else { Verdict::Pass };
            (verdict, items.clone())
        }
        None => {
            tracing::warn!("compliance response was not a list; defaulting to PASS");
            (Verdict::Pass, Vec::new())
        }
    }
}

/// Canonical text form of a note for the check request: structured notes
/// are pretty-printed, plain strings pass through.
pub fn flatten_note(note: &Value) -> Result<String, PipelineError> {
    match note {
        Value::String(text) => Ok(text.clone()),
        other => Ok(serde_json::to_string_pretty(other)?),
    }
}

#[derive(Serialize)]
struct CheckEncounterInformation<'a> {
    encounter_transcript: &'a str,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    clinical_note: &'a str,
    encounter_information: CheckEncounterInformation<'a>,
    chart_audit_rules: &'a Value,
}

pub struct ComplianceChecker {
    remote: Arc<dyn RemoteInvoke>,
    store: Arc<ArtifactStore>,
    rules: RulesBuilder,
    label: Option<String>,
}

impl ComplianceChecker {
    pub fn new(
        remote: Arc<dyn RemoteInvoke>,
        store: Arc<ArtifactStore>,
        config: &RuleBuilderConfig,
    ) -> Result<Self, PipelineError> {
        let rules = RulesBuilder::new(remote.clone(), store.clone(), config)?;
        Ok(Self {
            remote,
            store,
            rules,
            label: None,
        })
    }

    /// Case or patient name for logs and artifact files of the next check.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn rules_builder(&mut self) -> &mut RulesBuilder {
        &mut self.rules
    }

    pub async fn ensure_rules_available(&mut self) -> Result<(), PipelineError> {
        self.rules.ensure_built().await?;
        Ok(())
    }

    /// Check one note against the ruleset and report the verdict.
    pub async fn check(
        &mut self,
        note: &Value,
        transcript: &str,
    ) -> Result<ComplianceOutcome, PipelineError> {
        self.rules.ensure_built().await?;

        let label = self.label.clone().unwrap_or_default();
        let started = Instant::now();
        tracing::info!(case = %label, "Checking note compliance");

        let clinical_note = flatten_note(note)?;
        let ruleset = self
            .rules
            .ruleset()
            .ok_or_else(|| PipelineError::UnexpectedShape {
                operation: "build_rules".to_string(),
                detail: "rules cache empty after build".to_string(),
            })?;

        let request = serde_json::to_value(CheckRequest {
            clinical_note: &clinical_note,
            encounter_information: CheckEncounterInformation {
                encounter_transcript: transcript,
            },
            chart_audit_rules: ruleset,
        })?;
        self.store.save(&self.trail_name("request"), &request)?;

        let response = self.remote.invoke("check", &request).await?;
        self.store.save(&self.trail_name("response"), &response)?;

        let (verdict, results) = evaluate_verdict(&response);
        match verdict {
            Verdict::Pass => {
                tracing::info!(case = %label, "Note passed compliance check");
            }
            Verdict::Fail => {
                tracing::warn!(case = %label, "Note failed compliance check");
            }
        }

        tracing::info!(
            case = %label,
            elapsed_s = started.elapsed().as_secs_f32(),
            "Compliance check complete"
        );
        Ok(ComplianceOutcome {
            label,
            verdict,
            results,
        })
    }

    fn trail_name(&self, kind: &str) -> String {
        match &self.label {
            Some(label) => format!("{label}-check-{kind}.json"),
            None => format!("check-{kind}.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::remote::MockRemote;
    use serde_json::json;

    fn corpus_config(dir: &tempfile::TempDir) -> RuleBuilderConfig {
        let requirements = dir.path().join("audit-requirements.txt");
        let samples = dir.path().join("audit-samples.txt");
        fs::write(&requirements, "Every note must document consent.").unwrap();
        fs::write(&samples, "Sample audit A\nSample audit B").unwrap();
        RuleBuilderConfig {
            requirements_file: requirements,
            samples_file: samples,
            rules_artifact: "audit-rules.json".to_string(),
        }
    }

    fn setup(mock: MockRemote) -> (tempfile::TempDir, Arc<MockRemote>, ComplianceChecker) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("output")));
        let config = corpus_config(&dir);
        let mock = Arc::new(mock);
        let checker = ComplianceChecker::new(mock.clone(), store, &config).unwrap();
        (dir, mock, checker)
    }

    #[test]
    fn all_pass_items_give_pass() {
        let response = json!([
            {"rule": "consent", "status": "PASS"},
            {"rule": "signature", "status": "PASS"}
        ]);
        let (verdict, results) = evaluate_verdict(&response);
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn one_fail_item_gives_fail() {
        let response = json!([
            {"rule": "consent", "status": "PASS"},
            {"rule": "signature", "status": "FAIL"},
            {"rule": "dates", "status": "PASS"}
        ]);
        let (verdict, _) = evaluate_verdict(&response);
        assert_eq!(verdict, Verdict::Fail);
    }

    #[test]
    fn non_list_response_defaults_to_pass() {
        let (verdict, results) = evaluate_verdict(&json!({"error": "malformed"}));
        assert_eq!(verdict, Verdict::Pass);
        assert!(results.is_empty());
    }

    #[test]
    fn items_without_status_do_not_fail_the_verdict() {
        let (verdict, _) = evaluate_verdict(&json!([{"rule": "consent"}]));
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn structured_notes_flatten_to_pretty_json() {
        let text = flatten_note(&json!({"plan": "rest"})).unwrap();
        assert_eq!(text, "{\n  \"plan\": \"rest\"\n}");
    }

    #[test]
    fn string_notes_pass_through_unchanged() {
        let text = flatten_note(&json!("already plain text")).unwrap();
        assert_eq!(text, "already plain text");
    }

    #[tokio::test]
    async fn rules_build_exactly_once_across_checks() {
        let (_dir, mock, mut checker) = setup(
            MockRemote::new()
                .respond_with("build_rules", json!({"rules": ["consent"]}))
                .respond_with("check", json!([{"status": "PASS"}])),
        );

        checker.set_label("Charles Johnson");
        checker.check(&json!({"n": 1}), "transcript").await.unwrap();
        checker.check(&json!({"n": 2}), "transcript").await.unwrap();

        assert_eq!(mock.call_count("build_rules"), 1);
        assert_eq!(mock.call_count("check"), 2);
    }

    #[tokio::test]
    async fn build_rules_request_carries_both_corpora() {
        let (_dir, mock, mut checker) = setup(
            MockRemote::new()
                .respond_with("build_rules", json!({}))
                .respond_with("check", json!([])),
        );

        checker.ensure_rules_available().await.unwrap();

        let build = &mock.calls()[0];
        assert_eq!(build.operation, "build_rules");
        assert_eq!(
            build.request["audit_requirements"],
            "Every note must document consent."
        );
        assert_eq!(build.request["samples"], "Sample audit A\nSample audit B");
    }

    #[tokio::test]
    async fn persisted_rules_skip_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("output")));
        store
            .save("audit-rules.json", &json!({"rules": ["consent"]}))
            .unwrap();
        let config = corpus_config(&dir);
        let mock = Arc::new(MockRemote::new().respond_with("check", json!([])));

        let mut checker = ComplianceChecker::new(mock.clone(), store, &config).unwrap();
        assert_eq!(checker.rules_builder().state(), CacheState::Loaded);

        checker.check(&json!({}), "t").await.unwrap();
        assert_eq!(mock.call_count("build_rules"), 0);
    }

    #[tokio::test]
    async fn check_request_carries_note_transcript_and_ruleset() {
        let (_dir, mock, mut checker) = setup(
            MockRemote::new()
                .respond_with("build_rules", json!({"rules": ["consent"]}))
                .respond_with("check", json!([{"status": "PASS"}])),
        );

        checker.set_label("Charles Johnson");
        let outcome = checker
            .check(&json!({"plan": "rest"}), "the transcript")
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.label, "Charles Johnson");

        let check = mock
            .calls()
            .into_iter()
            .find(|call| call.operation == "check")
            .unwrap();
        assert_eq!(
            check.request["clinical_note"],
            "{\n  \"plan\": \"rest\"\n}"
        );
        assert_eq!(
            check.request["encounter_information"]["encounter_transcript"],
            "the transcript"
        );
        assert_eq!(check.request["chart_audit_rules"], json!({"rules": ["consent"]}));
    }

    #[tokio::test]
    async fn labeled_checks_persist_labeled_trail_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("output")));
        let config = corpus_config(&dir);
        let mock = Arc::new(
            MockRemote::new()
                .respond_with("build_rules", json!({}))
                .respond_with("check", json!([])),
        );
        let mut checker = ComplianceChecker::new(mock, store.clone(), &config).unwrap();

        checker.set_label("Ada Byron");
        checker.check(&json!({}), "t").await.unwrap();

        assert!(store.load("Ada Byron-check-request.json").unwrap().is_some());
        assert!(store
            .load("Ada Byron-check-response.json")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unlabeled_checks_persist_plain_trail_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("output")));
        let config = corpus_config(&dir);
        let mock = Arc::new(
            MockRemote::new()
                .respond_with("build_rules", json!({}))
                .respond_with("check", json!([])),
        );
        let mut checker = ComplianceChecker::new(mock, store.clone(), &config).unwrap();

        checker.check(&json!({}), "t").await.unwrap();

        assert!(store.load("check-request.json").unwrap().is_some());
        assert!(store.load("check-response.json").unwrap().is_some());
    }

    #[tokio::test]
    async fn fail_verdict_is_an_outcome_not_an_error() {
        let (_dir, _mock, mut checker) = setup(
            MockRemote::new()
                .respond_with("build_rules", json!({}))
                .respond_with("check", json!([{"rule": "consent", "status": "FAIL"}])),
        );

        checker.set_label("Charles Johnson");
        let outcome = checker.check(&json!({}), "t").await.unwrap();
        assert!(outcome.verdict.is_fail());
        assert_eq!(outcome.results.len(), 1);
    }
}
