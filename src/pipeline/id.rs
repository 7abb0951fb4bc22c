//! Pipeline identifiers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::Clock;
use crate::config::{PipelineConfig, Settings};

/// Opaque identifier of one experiment run. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipelineId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PipelineId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Assigns pipeline ids for one shard.
///
/// A requested id in the pipeline config is returned verbatim. Otherwise the
/// id is the first 128 bits of a SHA-256 digest over the shard index, shard
/// count, serving address and the current clock reading, hex-encoded.
///
/// ```rust
/// use std::sync::Arc;
/// use livetune::clock::ManualClock;
/// use livetune::pipeline::PipelineIdGenerator;
///
/// let clock = Arc::new(ManualClock::at_millis(1_000));
/// let generator = PipelineIdGenerator::new(0, 3, "tuner-0:8080", clock.clone());
///
/// let first = generator.fresh_id();
/// clock.advance_millis(1);
/// assert_ne!(first, generator.fresh_id());
/// assert_eq!(first.as_str().len(), 32);
/// ```
#[derive(Clone)]
pub struct PipelineIdGenerator {
    shard_index: u32,
    num_shards: u32,
    serving_address: String,
    clock: Arc<dyn Clock>,
}

impl PipelineIdGenerator {
    /// Create a generator for one shard.
    #[must_use]
    pub fn new(
        shard_index: u32,
        num_shards: u32,
        serving_address: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shard_index,
            num_shards,
            serving_address: serving_address.into(),
            clock,
        }
    }

    /// Create a generator from process settings.
    #[must_use]
    pub fn from_settings(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            settings.shard_index,
            settings.num_shards,
            settings.serving_address.clone(),
            clock,
        )
    }

    /// Id for a pipeline: the requested id if set, else a fresh one.
    #[must_use]
    pub fn generate(&self, config: &PipelineConfig) -> PipelineId {
        config
            .requested_pipeline_id()
            .map_or_else(|| self.fresh_id(), PipelineId::new)
    }

    /// Derive a new id from shard parameters and the current time.
    #[must_use]
    pub fn fresh_id(&self) -> PipelineId {
        let millis = self.clock.now().timestamp_millis();
        let mut hasher = Sha256::new();
        hasher.update(self.shard_index.to_be_bytes());
        hasher.update(self.num_shards.to_be_bytes());
        hasher.update(self.serving_address.as_bytes());
        hasher.update(millis.to_be_bytes());
        let digest = hasher.finalize();
        let id = PipelineId(hex::encode(&digest[..16]));
        debug!(pipeline_id = %id, shard = self.shard_index, "generated pipeline id");
        id
    }
}

impl fmt::Debug for PipelineIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineIdGenerator")
            .field("shard_index", &self.shard_index)
            .field("num_shards", &self.num_shards)
            .field("serving_address", &self.serving_address)
            .finish_non_exhaustive()
    }
}
