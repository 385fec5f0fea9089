//! Build-once-then-reuse artifact cache.
//!
//! One `ArtifactCache` backs each built resource (note schema, audit
//! ruleset). States: `Unloaded` until a persisted copy is adopted or a build
//! completes, `Building` while a build request is in flight, `Loaded`
//! afterwards for the rest of the process lifetime. There is no TTL;
//! `invalidate` is the only way back to `Unloaded`.

use serde_json::Value;

use super::artifacts::ArtifactStore;
use super::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Unloaded,
    Building,
    Loaded,
}

#[derive(Debug)]
pub struct ArtifactCache {
    name: String,
    state: CacheState,
    value: Option<Value>,
}

impl ArtifactCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CacheState::Unloaded,
            value: None,
        }
    }

    /// Artifact name this cache persists under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == CacheState::Loaded
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Adopt a previously persisted artifact if one exists. Returns whether
    /// a persisted copy was found; absence leaves the cache `Unloaded`.
    pub fn load_persisted(&mut self, store: &ArtifactStore) -> Result<bool, PipelineError> {
        match store.load(&self.name)? {
            Some(value) => {
                self.value = Some(value);
                self.state = CacheState::Loaded;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Mark a build in flight.
    pub fn begin_build(&mut self) {
        self.state = CacheState::Building;
    }

    /// Persist a freshly built artifact and adopt it as current, so the next
    /// process run loads it instead of rebuilding.
    pub fn adopt(&mut self, store: &ArtifactStore, value: Value) -> Result<(), PipelineError> {
        store.save(&self.name, &value)?;
        self.value = Some(value);
        self.state = CacheState::Loaded;
        Ok(())
    }

    /// Discard the held artifact; the next `ensure_built` on the owner
    /// rebuilds. Does not delete the persisted file.
    pub fn invalidate(&mut self) {
        self.value = None;
        self.state = CacheState::Unloaded;
    }
}
