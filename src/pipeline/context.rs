//! Explicit lifecycle scopes.
//!
//! [`Services`] are process-wide and shared by every pipeline.
//! [`PipelineContext`] is owned by exactly one pipeline for its lifetime.
//! [`super::IterationContext`] borrows the pipeline context for one
//! generation and is dropped at the end of it.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{PipelineId, PipelineSynchronizer, StageTracker};
use crate::clock::Clock;
use crate::config::{ConfigManager, PipelineConfig, Settings};
use crate::datastore::Datastore;
use crate::experiment::ExperimentDb;
use crate::history::HistoryDatastore;
use crate::hypothesizer::Hypothesizer;
use crate::registry::Backends;
use crate::scorer::{
    GenerationNumberWeightedBestPerformerScorer, HistoricalBestPerformerScorer, MetricSource,
};
use crate::subject::{
    ServingAddressGenerator, SubjectGroup, SubjectManipulator, TemplateAddressGenerator,
};
use crate::Result;

/// Process-wide collaborators.
#[derive(Clone)]
pub struct Services {
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    manipulator: Arc<dyn SubjectManipulator>,
    metric_source: Arc<dyn MetricSource>,
    backends: Backends,
    synchronizer: Arc<dyn PipelineSynchronizer>,
}

impl Services {
    /// Bundle collaborators after validating `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if `settings` are invalid.
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        manipulator: Arc<dyn SubjectManipulator>,
        metric_source: Arc<dyn MetricSource>,
        backends: Backends,
        synchronizer: Arc<dyn PipelineSynchronizer>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            clock,
            manipulator,
            metric_source,
            backends,
            synchronizer,
        })
    }

    /// Process settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Time source.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Subject manipulator.
    #[must_use]
    pub fn manipulator(&self) -> &Arc<dyn SubjectManipulator> {
        &self.manipulator
    }

    /// Metric source.
    #[must_use]
    pub fn metric_source(&self) -> &Arc<dyn MetricSource> {
        &self.metric_source
    }

    /// Live-state store.
    #[must_use]
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.backends.datastore
    }

    /// History store.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn HistoryDatastore> {
        &self.backends.history
    }

    /// Iteration synchronizer.
    #[must_use]
    pub fn synchronizer(&self) -> &Arc<dyn PipelineSynchronizer> {
        &self.synchronizer
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("settings", &self.settings)
            .field("sync_mode", &self.synchronizer.mode())
            .finish_non_exhaustive()
    }
}

/// Pipeline-scoped state: one config manager, one experiment database.
pub struct PipelineContext {
    pub(crate) id: PipelineId,
    pub(crate) services: Services,
    pub(crate) config_manager: Box<dyn ConfigManager>,
    pub(crate) experiment_db: ExperimentDb,
    pub(crate) hypothesizer: Box<dyn Hypothesizer>,
    pub(crate) best: Box<dyn HistoricalBestPerformerScorer>,
    pub(crate) groups: Vec<SubjectGroup>,
    pub(crate) stage: Arc<StageTracker>,
    pub(crate) cancel: CancellationToken,
}

impl PipelineContext {
    /// Build the pipeline scope from the config manager's current snapshot.
    pub(crate) fn new(
        id: PipelineId,
        services: Services,
        config_manager: Box<dyn ConfigManager>,
        hypothesizer: Box<dyn Hypothesizer>,
        cancel: CancellationToken,
    ) -> Self {
        let config = config_manager.config();
        let groups = subject_groups(&config);
        let best = Box::new(GenerationNumberWeightedBestPerformerScorer::new(
            config.scoring.generation_weighting,
        ));
        let stage = Arc::new(StageTracker::new(id.clone(), services.clock().now()));
        Self {
            id,
            services,
            config_manager,
            experiment_db: ExperimentDb::new(),
            hypothesizer,
            best,
            groups,
            stage,
            cancel,
        }
    }

    /// Pipeline id.
    #[must_use]
    pub const fn id(&self) -> &PipelineId {
        &self.id
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<PipelineConfig> {
        self.config_manager.config()
    }

    /// Experiment database.
    #[must_use]
    pub const fn experiment_db(&self) -> &ExperimentDb {
        &self.experiment_db
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("id", &self.id)
            .field("groups", &self.groups)
            .field("stage", &self.stage.stage())
            .finish_non_exhaustive()
    }
}

fn subject_groups(config: &PipelineConfig) -> Vec<SubjectGroup> {
    config
        .subject_groups
        .iter()
        .map(|group| {
            let addresses: Arc<dyn ServingAddressGenerator> = Arc::new(
                group
                    .serving_address_template
                    .as_deref()
                    .map_or_else(TemplateAddressGenerator::default, TemplateAddressGenerator::new),
            );
            SubjectGroup::new(group.clone(), addresses, config.subject_manipulation_deadline())
        })
        .collect()
}
