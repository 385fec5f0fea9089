//! Pipeline-wide error taxonomy.
//!
//! Remote transport/protocol failures and persistence failures are fatal and
//! propagate to the binary's outermost boundary. A compliance FAIL verdict is
//! a value, not an error (see `compliance::Verdict`).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Remote operation answered with a status other than 200.
    #[error("{operation} failed: status {status}")]
    RemoteStatus {
        operation: String,
        status: u16,
        body: String,
    },

    /// Remote operation answered 200 but the body was not JSON.
    #[error("{operation} failed: response was not JSON")]
    NonJsonBody { operation: String, body: String },

    /// The request never produced a response (connect, TLS, read failure).
    #[error("{operation} transport failure: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// Operation key missing from the configured endpoint table.
    #[error("no endpoint configured for operation {0}")]
    UnknownOperation(String),

    /// A well-formed response that lacks a field the pipeline depends on.
    #[error("unexpected {operation} response shape: {detail}")]
    UnexpectedShape { operation: String, detail: String },

    /// Artifact file read or write failure (other than "absent").
    #[error("artifact {name}: {source}")]
    ArtifactIo {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Artifact file exists but does not hold valid JSON.
    #[error("artifact {name} holds invalid JSON: {source}")]
    ArtifactJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Corpus input (schema samples, audit requirements) unreadable.
    #[error("corpus file {path}: {source}")]
    CorpusIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stage operation invoked out of order.
    #[error("{operation} requires a prior {requires}")]
    StageOrder {
        operation: &'static str,
        requires: &'static str,
    },

    /// Audio source could not be resolved to a fetchable address.
    #[error("audio source: {0}")]
    Audio(#[from] object_store::Error),

    #[error("JSON encoding: {0}")]
    Json(#[from] serde_json::Error),
}
