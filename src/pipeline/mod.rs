pub mod artifacts;
pub mod cache;
pub mod compliance;
pub mod error;
pub mod notes;
pub mod orchestrator;
pub mod remote;
pub mod schema;
pub mod transcribe;

pub use error::PipelineError;
