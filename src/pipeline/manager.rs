//! Process-wide registry of running pipelines.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Pipeline, PipelineId, PipelineIdGenerator, PipelineStageInfo, Services, StageTracker};
use crate::config::ConfigManager;
use crate::hypothesizer::{Hypothesizer, NeighborhoodHypothesizer};
use crate::{Error, Result};

/// Handle to a spawned pipeline.
struct PipelineHandle {
    stage: Arc<StageTracker>,
    cancel: CancellationToken,
    task: Option<JoinHandle<PipelineStageInfo>>,
}

/// Starts, observes and stops pipelines on this shard.
///
/// Every pipeline runs in its own task under a child of the manager's
/// cancellation token, so [`PipelineManager::shutdown`] stops them all.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use livetune::clock::SystemClock;
/// use livetune::config::{PipelineConfig, Settings, StaticConfigManager, SyncConfig};
/// use livetune::pipeline::{for_mode, PipelineManager, Services};
/// use livetune::registry::BackendRegistry;
/// use livetune::subject::SimulatedPopulation;
///
/// # async fn run(config: PipelineConfig) -> livetune::Result<()> {
/// let settings = Settings::default();
/// let backends = BackendRegistry::with_builtins().resolve(&settings)?;
/// let population = Arc::new(SimulatedPopulation::new().with_group("frontend", 8));
/// let services = Services::new(
///     settings,
///     Arc::new(SystemClock),
///     population.clone(),
///     population,
///     backends,
///     for_mode(&SyncConfig::default()),
/// )?;
///
/// let manager = PipelineManager::new(services);
/// let id = manager.start(Box::new(StaticConfigManager::new(config)?)).await?;
/// let status = manager.join(&id).await;
/// println!("{id}: {status:?}");
/// # Ok(())
/// # }
/// ```
pub struct PipelineManager {
    services: Services,
    ids: PipelineIdGenerator,
    pipelines: DashMap<PipelineId, PipelineHandle>,
    cancel: CancellationToken,
}

impl PipelineManager {
    /// Manager over shared services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let ids = PipelineIdGenerator::from_settings(services.settings(), Arc::clone(services.clock()));
        Self {
            services,
            ids,
            pipelines: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a pipeline with the built-in [`NeighborhoodHypothesizer`].
    ///
    /// # Errors
    ///
    /// See [`PipelineManager::start_with`].
    pub async fn start(&self, config_manager: Box<dyn ConfigManager>) -> Result<PipelineId> {
        let hypothesizer = NeighborhoodHypothesizer::new(&config_manager.config().hypothesizer);
        self.start_with(config_manager, Box::new(hypothesizer)).await
    }

    /// Register and spawn a pipeline.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a bad configuration,
    /// [`Error::PipelineConflict`] if a live pipeline already has the id, or
    /// a datastore error from registration.
    pub async fn start_with(
        &self,
        config_manager: Box<dyn ConfigManager>,
        hypothesizer: Box<dyn Hypothesizer>,
    ) -> Result<PipelineId> {
        let config = config_manager.config();
        config.validate()?;
        let id = self.ids.generate(&config);

        let cancel = self.cancel.child_token();
        let pipeline = Pipeline::new(
            id.clone(),
            self.services.clone(),
            config_manager,
            hypothesizer,
            cancel.clone(),
        );
        let stage = pipeline.stage_tracker();
        self.reserve(&id, &stage, cancel)?;

        if let Err(e) = pipeline.register().await {
            self.pipelines
                .remove_if(&id, |_, handle| Arc::ptr_eq(&handle.stage, &stage));
            return Err(e);
        }

        let task = tokio::spawn(pipeline.run());
        if let Some(mut handle) = self.pipelines.get_mut(&id) {
            handle.task = Some(task);
        }
        info!(pipeline_id = %id, "pipeline started");
        Ok(id)
    }

    /// Claim `id` for a new pipeline unless a live one holds it.
    fn reserve(
        &self,
        id: &PipelineId,
        stage: &Arc<StageTracker>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let handle = PipelineHandle {
            stage: Arc::clone(stage),
            cancel,
            task: None,
        };
        match self.pipelines.entry(id.clone()) {
            Entry::Occupied(entry) if !entry.get().stage.stage().is_terminal() => {
                Err(Error::PipelineConflict(id.clone()))
            }
            Entry::Occupied(mut entry) => {
                entry.insert(handle);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Ask a pipeline to stop at its next cancellation point.
    ///
    /// Returns `false` if the id is unknown or the pipeline already ended.
    pub fn stop(&self, id: &PipelineId) -> bool {
        let Some(handle) = self.pipelines.get(id) else {
            return false;
        };
        if handle.stage.stage().is_terminal() {
            return false;
        }
        info!(pipeline_id = %id, "stopping pipeline");
        handle.cancel.cancel();
        true
    }

    /// Current status of one pipeline.
    #[must_use]
    pub fn stage_info(&self, id: &PipelineId) -> Option<PipelineStageInfo> {
        self.pipelines.get(id).map(|handle| handle.stage.snapshot())
    }

    /// Status of every pipeline started by this manager, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<PipelineStageInfo> {
        let mut infos: Vec<_> = self
            .pipelines
            .iter()
            .map(|entry| entry.stage.snapshot())
            .collect();
        infos.sort_by(|a, b| a.pipeline_id.cmp(&b.pipeline_id));
        infos
    }

    /// Wait for a pipeline to reach a terminal stage.
    ///
    /// Returns `None` for an unknown id. Joining twice returns the final
    /// status both times.
    pub async fn join(&self, id: &PipelineId) -> Option<PipelineStageInfo> {
        let task = self.pipelines.get_mut(id)?.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(pipeline_id = %id, error = %e, "pipeline task did not complete");
            }
        }
        self.stage_info(id)
    }

    /// Cancel every pipeline and wait for all of them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let ids: Vec<PipelineId> = self.pipelines.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.join(&id).await;
        }
        info!(pipelines = self.pipelines.len(), "pipeline manager shut down");
    }
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("services", &self.services)
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}
