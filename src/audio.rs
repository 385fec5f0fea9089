//! Audio source addressing.
//!
//! The pipeline needs only a pre-signed, time-limited fetchable URL for an
//! encounter's recording; storage specifics stay behind the `AudioLocator`
//! seam. `S3AudioLocator` signs GET URLs against an S3-compatible bucket.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;

use crate::cases::EncounterCase;
use crate::config::AudioConfig;
use crate::pipeline::error::PipelineError;

#[async_trait]
pub trait AudioLocator: Send + Sync {
    /// Pre-signed fetchable address for the case's audio source.
    async fn presigned_url(&self, case: &EncounterCase) -> Result<String, PipelineError>;
}

pub struct S3AudioLocator {
    bucket: AmazonS3,
    ttl: Duration,
}

impl S3AudioLocator {
    pub fn from_config(config: &AudioConfig) -> Result<Self, PipelineError> {
        let bucket = AmazonS3Builder::new()
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .build()?;
        Ok(Self {
            bucket,
            ttl: Duration::from_secs(config.url_ttl_secs),
        })
    }
}

#[async_trait]
impl AudioLocator for S3AudioLocator {
    async fn presigned_url(&self, case: &EncounterCase) -> Result<String, PipelineError> {
        let path = ObjectPath::from(case.audio_path.as_str());
        let url = self.bucket.signed_url(Method::GET, &path, self.ttl).await?;
        Ok(url.to_string())
    }
}

/// Serves one fixed URL for every case. Test double.
pub struct FixedAudioLocator {
    url: String,
}

impl FixedAudioLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl AudioLocator for FixedAudioLocator {
    async fn presigned_url(&self, _case: &EncounterCase) -> Result<String, PipelineError> {
        Ok(self.url.clone())
    }
}
