//! Static configuration for the process and for each pipeline
//!
//! Every tunable is an explicit, named field resolved once when a pipeline
//! (or an iteration) is constructed. Two layers exist:
//!
//! - [`Settings`]: process-wide (shard identity, backend names, tick interval)
//! - [`PipelineConfig`]: one experiment (population, search space, scoring,
//!   synchronization, health floor, budgets)
//!
//! Both deserialize from TOML via [`loader`]; a [`ConfigManager`] hands a
//! validated [`PipelineConfig`] snapshot to the pipeline that owns it.

pub mod loader;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::experiment::ParameterSpace;
use crate::pipeline::SyncMode;
use crate::scorer::GenerationWeighting;
use crate::{Error, Result};

pub use loader::{
    load_pipeline_config_from_file, load_pipeline_config_from_str, load_settings_from_file,
    load_settings_from_str,
};

/// Process-wide settings shared by every pipeline on this shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Index of this shard, `0..num_shards`
    pub shard_index: u32,
    /// Total number of cooperating shards
    pub num_shards: u32,
    /// Address this process serves on (feeds pipeline id derivation)
    pub serving_address: String,
    /// Registered name of the live-state [`crate::datastore::Datastore`] backend
    pub datastore: String,
    /// Registered name of the [`crate::history::HistoryDatastore`] backend
    pub history_datastore: String,
    /// Delay between retries of a failed step, in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shard_index: 0,
            num_shards: 1,
            serving_address: "localhost:0".to_string(),
            datastore: "memory".to_string(),
            history_datastore: "memory".to_string(),
            tick_interval_ms: 1_000,
        }
    }
}

impl Settings {
    /// Retry tick as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check shard bounds and backend names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::InvalidConfig("num_shards must be at least 1".to_string()));
        }
        if self.shard_index >= self.num_shards {
            return Err(Error::InvalidConfig(format!(
                "shard_index {} out of range for {} shards",
                self.shard_index, self.num_shards
            )));
        }
        if self.datastore.trim().is_empty() || self.history_datastore.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "datastore and history_datastore names must be set".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// One experimental population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGroupConfig {
    /// Cluster hosting the population
    pub cluster_name: String,
    /// Group (job) name
    pub name: String,
    /// Owning user
    pub user_name: String,
    /// Desired subject count; `0` means "everything the census finds"
    #[serde(default)]
    pub number_of_subjects: usize,
    /// Trailing subjects kept on the baseline configuration
    #[serde(default)]
    pub number_of_default_subjects: usize,
    /// Directory under which per-subject settings files live
    pub experiment_settings_files_dir: String,
    /// Template for subject serving addresses (see [`crate::subject::TemplateAddressGenerator`])
    #[serde(default)]
    pub serving_address_template: Option<String>,
}

/// Cross-shard synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Barrier strictness
    pub mode: SyncMode,
    /// How long one barrier wait may block, in milliseconds
    pub timeout_ms: u64,
    /// Shard indices that must finalize each iteration
    pub expected_shards: Vec<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::None,
            timeout_ms: 30_000,
            expected_shards: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Barrier timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Fitness computation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Sub-metric name → weight in the linear combination
    pub weights: BTreeMap<String, f64>,
    /// Trust placed in later generations by the historical best-performer scorer
    pub generation_weighting: GenerationWeighting,
}

/// Population health bounds checked after every generate step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Below this healthy fraction the iteration fails the pipeline
    pub min_healthy_fraction: f64,
    /// Below this many healthy experimental subjects the iteration fails the pipeline
    pub min_healthy_subjects: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_healthy_fraction: 0.5,
            min_healthy_subjects: 1,
        }
    }
}

/// Knobs for the built-in [`crate::hypothesizer::NeighborhoodHypothesizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypothesizerConfig {
    /// Share of subjects that get a fresh random candidate instead of a neighbor
    pub exploration_rate: f64,
    /// Maximum steps a neighbor may move per flag
    pub radius_steps: i64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for HypothesizerConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.2,
            radius_steps: 2,
            seed: None,
        }
    }
}

/// Configuration of a single experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Caller-chosen pipeline id; generated when absent or empty
    #[serde(default)]
    pub requested_pipeline_id: Option<String>,
    /// Iteration budget
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Deadline for the population census and for each subject manipulation
    #[serde(default = "default_manipulation_deadline_ms")]
    pub subject_manipulation_deadline_ms: u64,
    /// Retries allowed per step before a temporary failure escalates
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Finalize after this many generations without a new historical best
    #[serde(default)]
    pub convergence_patience: Option<u32>,
    /// Populations experimented on
    pub subject_groups: Vec<SubjectGroupConfig>,
    /// Tunable flags
    #[serde(default)]
    pub parameters: ParameterSpace,
    /// Cross-shard synchronization
    #[serde(default)]
    pub sync: SyncConfig,
    /// Fitness computation
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Health bounds
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Built-in hypothesizer knobs
    #[serde(default)]
    pub hypothesizer: HypothesizerConfig,
}

const fn default_max_iterations() -> u64 {
    10
}

const fn default_manipulation_deadline_ms() -> u64 {
    60_000
}

const fn default_retry_budget() -> u32 {
    3
}

impl PipelineConfig {
    /// Minimal config for one group; remaining fields take their defaults.
    #[must_use]
    pub fn new(subject_groups: Vec<SubjectGroupConfig>, parameters: ParameterSpace) -> Self {
        Self {
            requested_pipeline_id: None,
            max_iterations: default_max_iterations(),
            subject_manipulation_deadline_ms: default_manipulation_deadline_ms(),
            retry_budget: default_retry_budget(),
            convergence_patience: None,
            subject_groups,
            parameters,
            sync: SyncConfig::default(),
            scoring: ScoringConfig::default(),
            validation: ValidationConfig::default(),
            hypothesizer: HypothesizerConfig::default(),
        }
    }

    /// Requested pipeline id, ignoring blank values.
    #[must_use]
    pub fn requested_pipeline_id(&self) -> Option<&str> {
        self.requested_pipeline_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    /// Census / per-subject manipulation deadline as a [`Duration`].
    #[must_use]
    pub const fn subject_manipulation_deadline(&self) -> Duration {
        Duration::from_millis(self.subject_manipulation_deadline_ms)
    }

    /// Check every semantic constraint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("max_iterations must be at least 1".to_string()));
        }
        if self.subject_manipulation_deadline_ms == 0 {
            return Err(Error::InvalidConfig(
                "subject_manipulation_deadline_ms must be positive".to_string(),
            ));
        }
        if self.subject_groups.is_empty() {
            return Err(Error::InvalidConfig("at least one subject group is required".to_string()));
        }
        for group in &self.subject_groups {
            if group.name.trim().is_empty() {
                return Err(Error::InvalidConfig("subject group name is empty".to_string()));
            }
            if group.number_of_subjects > 0
                && group.number_of_default_subjects > group.number_of_subjects
            {
                return Err(Error::InvalidConfig(format!(
                    "group {}: {} default subjects exceed {} subjects",
                    group.name, group.number_of_default_subjects, group.number_of_subjects
                )));
            }
        }
        if self.convergence_patience == Some(0) {
            return Err(Error::InvalidConfig(
                "convergence_patience must be at least 1 when set".to_string(),
            ));
        }
        self.parameters.validate()?;
        if self.scoring.weights.is_empty() {
            return Err(Error::InvalidConfig(
                "scoring.weights must name at least one metric".to_string(),
            ));
        }
        if self.scoring.weights.values().any(|w| !w.is_finite()) {
            return Err(Error::InvalidConfig("scoring weights must be finite".to_string()));
        }
        let floor = self.validation.min_healthy_fraction;
        if !(0.0..=1.0).contains(&floor) {
            return Err(Error::InvalidConfig(format!(
                "validation.min_healthy_fraction {floor} outside [0, 1]"
            )));
        }
        if !(0.0..=1.0).contains(&self.hypothesizer.exploration_rate) {
            return Err(Error::InvalidConfig(
                "hypothesizer.exploration_rate must be within [0, 1]".to_string(),
            ));
        }
        if self.hypothesizer.radius_steps <= 0 {
            return Err(Error::InvalidConfig(
                "hypothesizer.radius_steps must be positive".to_string(),
            ));
        }
        if self.sync.mode == SyncMode::IterationFinalizationOnly {
            if self.sync.expected_shards.is_empty() {
                return Err(Error::InvalidConfig(
                    "sync.expected_shards must be listed for iteration_finalization_only"
                        .to_string(),
                ));
            }
            if self.sync.timeout_ms == 0 {
                return Err(Error::InvalidConfig("sync.timeout_ms must be positive".to_string()));
            }
        }
        Ok(())
    }
}

/// Source of the static experiment configuration for one pipeline.
pub trait ConfigManager: Send + Sync {
    /// Current configuration snapshot.
    fn config(&self) -> Arc<PipelineConfig>;
}

/// [`ConfigManager`] over a fixed, validated configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigManager {
    config: Arc<PipelineConfig>,
}

impl StaticConfigManager {
    /// Validate and wrap a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if validation fails.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

impl ConfigManager for StaticConfigManager {
    fn config(&self) -> Arc<PipelineConfig> {
        Arc::clone(&self.config)
    }
}
