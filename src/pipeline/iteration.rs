//! One generation: HYPOTHESIZE → GENERATE → VALIDATE → SCORE → barrier.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::retry::{tick, Retry};
use super::{PipelineContext, PipelineStage, SyncOutcome};
use crate::config::PipelineConfig;
use crate::datastore::PipelineState;
use crate::experiment::{CandidateConfig, SubjectRecord};
use crate::generator::Generator;
use crate::history::PipelineHistoryState;
use crate::hypothesizer::HypothesisRequest;
use crate::scorer::{
    IterationScore, IterationScorer, LinearCombinationScorer, SubjectMetrics, SubjectScore,
    SubjectScorer,
};
use crate::subject::{Subject, SubjectKey};
use crate::validator::{ValidationReport, Validator, Verdict};
use crate::{Error, Result};

/// What a completed generation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationOutcome {
    /// Aggregate score
    pub score: IterationScore,
    /// Whether the champion became the new historical best
    pub improved: bool,
}

/// Iteration-scoped state, built fresh for every generation.
///
/// Borrows the [`PipelineContext`] mutably for the generation; nothing in it
/// survives the generation except what is written to the experiment
/// database or the history store.
pub struct IterationContext<'a> {
    pipeline: &'a mut PipelineContext,
    generation: u64,
    config: Arc<PipelineConfig>,
    generator: Generator,
    validator: Validator,
    subject_scorer: LinearCombinationScorer,
    scorer: IterationScorer,
    subjects: Vec<Subject>,
}

impl<'a> IterationContext<'a> {
    /// Open generation `generation`, reading the config snapshot once.
    pub fn new(pipeline: &'a mut PipelineContext, generation: u64) -> Self {
        let config = pipeline.config();
        let generator = Generator::new(
            Arc::clone(pipeline.services.manipulator()),
            config.parameters.clone(),
            config.subject_manipulation_deadline(),
        );
        let validator = Validator::new(config.validation.clone());
        let subject_scorer = LinearCombinationScorer::new(config.scoring.weights.clone());
        Self {
            pipeline,
            generation,
            config,
            generator,
            validator,
            subject_scorer,
            scorer: IterationScorer::new(),
            subjects: Vec::new(),
        }
    }

    /// Generation number.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Subjects found by this generation's census.
    #[must_use]
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    fn enter(&self, stage: PipelineStage) -> Result<()> {
        self.pipeline.stage.transition(
            stage,
            self.generation,
            self.pipeline.services.clock().now(),
            None,
        )
    }

    fn retry(&self, step: &'static str) -> Retry {
        Retry::new(
            step,
            self.config.retry_budget,
            self.pipeline.services.settings().tick_interval(),
            self.pipeline.cancel.clone(),
        )
    }

    /// Take the population census and propose one candidate per experimental
    /// subject; control subjects get the baseline.
    ///
    /// # Errors
    ///
    /// Census failures after the retry budget, permanent census failures, or
    /// a hypothesizer failure.
    pub async fn hypothesize(&mut self) -> Result<()> {
        self.enter(PipelineStage::Hypothesize)?;

        let mut retry = self.retry("population census");
        self.subjects = loop {
            match self.census().await {
                Ok(subjects) => break subjects,
                Err(e) => retry.backoff(e).await?,
            }
        };

        let history = self
            .pipeline
            .services
            .history()
            .get_states_for_pipeline_id(&self.pipeline.id)
            .await?;
        let slots = self.subjects.iter().filter(|s| !s.is_control()).count();
        let space = &self.config.parameters;
        let proposals = self.pipeline.hypothesizer.propose(&HypothesisRequest {
            generation: self.generation,
            slots,
            space,
            best: self.pipeline.best.best(),
            history: &history,
        })?;
        if proposals.len() != slots {
            return Err(Error::permanent(format!(
                "hypothesizer proposed {} candidates for {slots} experimental subjects",
                proposals.len()
            )));
        }

        let baseline = space.baseline();
        let mut proposals = proposals.into_iter();
        let records = self
            .subjects
            .iter()
            .map(|subject| {
                let candidate = if subject.is_control() {
                    baseline.clone()
                } else {
                    proposals
                        .next()
                        .map_or_else(|| baseline.clone(), |c| space.normalize(&c))
                };
                SubjectRecord::new(subject.key(), self.generation, candidate)
                    .control(subject.is_control())
            })
            .collect();
        self.pipeline
            .experiment_db
            .begin_generation(self.generation, records);
        Ok(())
    }

    async fn census(&mut self) -> Result<Vec<Subject>> {
        let manipulator = Arc::clone(self.pipeline.services.manipulator());
        let cancel = self.pipeline.cancel.clone();
        let mut subjects = Vec::new();
        for group in &mut self.pipeline.groups {
            subjects = group
                .initialize(manipulator.as_ref(), Some(subjects), &cancel)
                .await?;
        }
        Ok(subjects)
    }

    /// Apply every subject's candidate. Subjects that fail with a retryable
    /// error are retried within the budget; the rest are marked unhealthy.
    ///
    /// # Errors
    ///
    /// Only cancellation or an illegal stage transition.
    pub async fn generate(&mut self) -> Result<()> {
        self.enter(PipelineStage::Generate)?;
        let cancel = self.pipeline.cancel.clone();
        let mut retry = self.retry("subject reconfiguration");
        let mut pending: Vec<SubjectKey> = self.subjects.iter().map(Subject::key).collect();

        loop {
            let assignments = self.assignments(&pending);
            let deployments = self.generator.deploy(assignments, &cancel).await?;
            pending.clear();

            for deployment in deployments {
                let Some(record) = self
                    .pipeline
                    .experiment_db
                    .get_mut(self.generation, &deployment.subject)
                else {
                    continue;
                };
                match deployment.outcome {
                    Ok(()) => record.mark_healthy(),
                    Err(e) => {
                        if e.is_retryable() {
                            pending.push(deployment.subject);
                        }
                        record.mark_unhealthy(e.to_string());
                    }
                }
            }

            if pending.is_empty() || !retry.can_retry() {
                return Ok(());
            }
            retry
                .wait(&format!("{} subjects rejected their configuration", pending.len()))
                .await?;
        }
    }

    fn assignments(&self, keys: &[SubjectKey]) -> Vec<(Subject, CandidateConfig)> {
        self.subjects
            .iter()
            .filter(|subject| keys.contains(&subject.key()))
            .filter_map(|subject| {
                self.pipeline
                    .experiment_db
                    .get(self.generation, &subject.key())
                    .map(|record| (subject.clone(), record.candidate().clone()))
            })
            .collect()
    }

    /// Check population health.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermanentFailure`] when the healthy share drops below
    /// the configured floor.
    pub fn validate(&mut self) -> Result<ValidationReport> {
        self.enter(PipelineStage::Validate)?;
        let records = self
            .pipeline
            .experiment_db
            .records_for_generation(self.generation);
        let report = self.validator.validate(&records);

        match report.verdict {
            Verdict::Healthy => debug!(
                pipeline_id = %self.pipeline.id,
                iteration = self.generation,
                healthy = report.healthy,
                "population healthy"
            ),
            Verdict::Degraded => {
                warn!(
                    pipeline_id = %self.pipeline.id,
                    iteration = self.generation,
                    healthy = report.healthy,
                    total = report.total,
                    "population degraded, scoring healthy subjects only"
                );
                self.pipeline.stage.annotate(format!(
                    "degraded: {}/{} subjects healthy",
                    report.healthy, report.total
                ));
            }
            Verdict::BelowFloor => {
                return Err(Error::permanent(format!(
                    "generation {}: {}/{} subjects healthy ({} experimental), below the configured floor",
                    self.generation, report.healthy, report.total, report.healthy_experimental
                )));
            }
        }
        Ok(report)
    }

    /// Observe and score healthy subjects, update the historical best and
    /// persist the generation.
    ///
    /// # Errors
    ///
    /// No experimental subject could be scored within the retry budget, or a
    /// store failed.
    pub async fn score(&mut self) -> Result<IterationOutcome> {
        self.enter(PipelineStage::Score)?;

        let healthy: Vec<Subject> = self
            .subjects
            .iter()
            .filter(|subject| {
                self.pipeline
                    .experiment_db
                    .get(self.generation, &subject.key())
                    .is_some_and(SubjectRecord::is_healthy)
            })
            .cloned()
            .collect();

        let mut retry = self.retry("metric collection");
        let observations = loop {
            let observations = self.observe(&healthy).await?;
            let experimental_ok = observations
                .iter()
                .any(|(subject, result)| !subject.is_control() && result.is_ok());
            let retryable = observations
                .iter()
                .any(|(_, result)| matches!(result, Err(e) if e.is_retryable()));
            if experimental_ok || !retryable || !retry.can_retry() {
                break observations;
            }
            retry
                .wait("no experimental subject reported metrics")
                .await?;
        };

        for (subject, result) in observations {
            let Some(record) = self
                .pipeline
                .experiment_db
                .get_mut(self.generation, &subject.key())
            else {
                continue;
            };
            match result {
                Ok(metrics) => {
                    let score = self.subject_scorer.score(&metrics);
                    record.record_score(metrics, score);
                    self.scorer.add(SubjectScore {
                        subject: subject.key(),
                        control: subject.is_control(),
                        candidate: record.candidate().clone(),
                        score,
                    });
                }
                Err(e) => record.mark_unhealthy(format!("metrics unavailable: {e}")),
            }
        }

        let score = self.scorer.finish(self.generation);
        let Some(champion) = score.champion.clone() else {
            return Err(Error::permanent(format!(
                "generation {} produced no scored experimental subject",
                self.generation
            )));
        };
        let improved = self
            .pipeline
            .best
            .offer(&champion.candidate, champion.score, self.generation);
        info!(
            pipeline_id = %self.pipeline.id,
            iteration = self.generation,
            mean = ?score.mean,
            baseline_mean = ?score.baseline_mean,
            champion = champion.score,
            improved,
            "generation scored"
        );

        self.persist(&score).await?;
        Ok(IterationOutcome { score, improved })
    }

    async fn observe(&self, subjects: &[Subject]) -> Result<Vec<(Subject, Result<SubjectMetrics>)>> {
        let deadline = self.config.subject_manipulation_deadline();
        let mut tasks = JoinSet::new();
        for subject in subjects {
            let subject = subject.clone();
            let source = Arc::clone(self.pipeline.services.metric_source());
            tasks.spawn(async move {
                let observed = tokio::time::timeout(deadline, source.observe(&subject))
                    .await
                    .unwrap_or_else(|_| Err(deadline_exceeded(&subject, deadline)));
                (subject, observed)
            });
        }

        let cancel = self.pipeline.cancel.clone();
        let mut observations = Vec::with_capacity(subjects.len());
        loop {
            let joined = tokio::select! {
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok(observation)) => observations.push(observation),
                Some(Err(e)) => warn!(error = %e, "metric collection task aborted"),
            }
        }
        observations.sort_by_key(|(subject, _)| subject.key());
        Ok(observations)
    }

    async fn persist(&self, score: &IterationScore) -> Result<()> {
        let services = &self.pipeline.services;
        let now = services.clock().now();
        let subjects: Vec<SubjectRecord> = self
            .pipeline
            .experiment_db
            .records_for_generation(self.generation)
            .into_iter()
            .cloned()
            .collect();
        let best = self.pipeline.best.best().cloned();

        let state = PipelineHistoryState::builder(self.pipeline.id.clone(), self.generation, now)
            .stage(PipelineStage::Score)
            .iteration_score(score.clone())
            .best_performer(best.clone())
            .subjects(subjects)
            .build();
        let mut retry = self.retry("history write");
        loop {
            match services.history().write_state(state.clone()).await {
                Ok(()) => break,
                Err(e) => retry.backoff(e).await?,
            }
        }

        services
            .datastore()
            .write_pipelines(vec![PipelineState {
                pipeline_id: self.pipeline.id.clone(),
                config: self.config.as_ref().clone(),
                stage: PipelineStage::Score,
                iteration: self.generation,
                best_performer: best,
                updated_at: now,
            }])
            .await
    }

    /// Register this shard's finalization and wait at the barrier, retrying
    /// the wait every tick until it is satisfied.
    ///
    /// # Errors
    ///
    /// Only cancellation.
    pub async fn finalize(&mut self) -> Result<()> {
        let synchronizer = Arc::clone(self.pipeline.services.synchronizer());
        let shard = self.pipeline.services.settings().shard_index;
        let interval = self.pipeline.services.settings().tick_interval();
        let cancel = self.pipeline.cancel.clone();
        let id = self.pipeline.id.clone();

        synchronizer.register_finalization(shard, &id, self.generation);
        loop {
            match synchronizer
                .await_iteration_finalization(&id, self.generation, &cancel)
                .await?
            {
                SyncOutcome::Proceed => return Ok(()),
                SyncOutcome::Abort => {
                    // Idempotent; restores a barrier dropped while waiting.
                    synchronizer.register_finalization(shard, &id, self.generation);
                    info!(
                        pipeline_id = %id,
                        iteration = self.generation,
                        shard,
                        "iteration barrier not yet satisfied, waiting again next tick"
                    );
                    tick(interval, &cancel).await?;
                }
            }
        }
    }
}

fn deadline_exceeded(subject: &Subject, deadline: Duration) -> Error {
    Error::DeadlineExceeded {
        operation: format!("metric collection from {}", subject.key()),
        deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
    }
}
