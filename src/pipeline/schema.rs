//! Note schema builder.
//!
//! Distills a structural schema for generated notes from a corpus of sample
//! notes, at most once per process. A persisted schema from an earlier run is
//! adopted at construction and no build call is made.

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
use crate::config::SchemaBuilderConfig;

pub const BUILD_SCHEMA_REQUEST_FILE: &str = "build-schema-request.json";

#[derive(Serialize)]
struct BuildSchemaRequest<'a> {
    samples: &'a str,
    schema: &'a str,
    recorded_actions: &'a str,
}

pub struct SchemaBuilder {
    remote: Arc<dyn RemoteInvoke>,
    store: Arc<ArtifactStore>,
    cache: ArtifactCache,
    samples_file: PathBuf,
}

impl SchemaBuilder {
    /// Construct the builder, adopting a persisted schema if one exists.
    pub fn new(
        remote: Arc<dyn RemoteInvoke>,
        store: Arc<ArtifactStore>,
        config: &SchemaBuilderConfig,
    ) -> Result<Self, PipelineError> {
        let mut cache = ArtifactCache::new(&config.schema_artifact);
        if cache.load_persisted(&store)? {
            tracing::info!(artifact = %config.schema_artifact, "Loaded note schema from disk");
        }
        Ok(Self {
            remote,
            store,
            cache,
            samples_file: config.samples_file.clone(),
        })
    }

    pub fn schema(&self) -> Option<&Value> {
        self.cache.value()
    }

    pub fn state(&self) -> CacheState {
        self.cache.state()
    }

    /// Discard the held schema so the next `ensure_built` rebuilds.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Build the schema if it is not already built or loaded. Idempotent:
    /// at most one remote build per process lifetime.
    pub async fn ensure_built(&mut self) -> Result<&Value, PipelineError> {
        if !self.cache.is_loaded() {
            self.build().await?;
        }
        self.cache
            .value()
            .ok_or_else(|| PipelineError::UnexpectedShape {
                operation: "build_schema".to_string(),
                detail: "schema cache empty after build".to_string(),
            })
    }

    async fn build(&mut self) -> Result<(), PipelineError> {
        let started = Instant::now();
        tracing::info!("Building note schema");
        self.cache.begin_build();

        let result = self.build_inner().await;
        if result.is_err() {
            self.cache.invalidate();
        }
        result?;

        tracing::info!(
            elapsed_s = started.elapsed().as_secs_f32(),
            "Note schema built"
        );
        Ok(())
    }

    async fn build_inner(&mut self) -> Result<(), PipelineError> {
        let samples =
            fs::read_to_string(&self.samples_file).map_err(|source| PipelineError::CorpusIo {
                path: self.samples_file.clone(),
                source,
            })?;

        let request = serde_json::to_value(BuildSchemaRequest {
            samples: &samples,
            schema: "",
            recorded_actions: "",
        })?;
        self.store.save(BUILD_SCHEMA_REQUEST_FILE, &request)?;

        let response = self.remote.invoke("build_schema", &request).await?;
        self.cache.adopt(&self.store, response)
    }
}
