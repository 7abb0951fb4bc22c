//! Population model: subject groups and the subjects they own
//!
//! A [`SubjectGroup`] is a named population on one cluster, owned by one
//! user. Its [`Subject`]s only exist after [`SubjectGroup::initialize`] has
//! taken a census through a [`SubjectManipulator`]; before that every accessor
//! returns an empty slice.
//!
//! ## Layout
//!
//! ```text
//! SubjectGroup ──owns──< Subject (index, config path, control flag)
//!      │                    │
//!      └── Arc<GroupIdentity> ◄──shared──┘
//!      └── Arc<dyn ServingAddressGenerator> ◄──shared──┘
//! ```

mod address;
mod command;
mod simulated;

pub use address::{ServingAddressGenerator, TemplateAddressGenerator};
pub use command::{CommandSubjectManipulator, CommandTemplates};
pub(crate) use command::{expand, expand_subject};
pub use simulated::{Objective, SimulatedPopulation};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SubjectGroupConfig;
use crate::experiment::CandidateConfig;
use crate::{Error, Result};

/// Cluster / group / user triple naming a population.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupIdentity {
    /// Cluster hosting the population
    pub cluster_name: String,
    /// Group name
    pub name: String,
    /// Owning user
    pub user_name: String,
}

impl fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster_name, self.user_name, self.name)
    }
}

/// Stable key of a subject across generations: group identity plus index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    /// `cluster/user/group`
    pub group: String,
    /// Index within the group
    pub index: usize,
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.index)
    }
}

/// One experiment target.
#[derive(Clone)]
pub struct Subject {
    group: Arc<GroupIdentity>,
    index: usize,
    config_path: String,
    control: bool,
    address_generator: Arc<dyn ServingAddressGenerator>,
}

impl Subject {
    fn new(
        group: Arc<GroupIdentity>,
        index: usize,
        config_path: String,
        control: bool,
        address_generator: Arc<dyn ServingAddressGenerator>,
    ) -> Self {
        Self {
            group,
            index,
            config_path,
            control,
            address_generator,
        }
    }

    /// Identity of the owning group.
    #[must_use]
    pub fn group(&self) -> &GroupIdentity {
        &self.group
    }

    /// Index within the owning group.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Path of the settings file this subject reads its flags from.
    #[must_use]
    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    /// Whether this subject is a control (baseline) subject.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.control
    }

    /// Network address used for manipulation and metric collection.
    #[must_use]
    pub fn serving_address(&self) -> String {
        self.address_generator.address(&self.group, self.index)
    }

    /// Stable key for this subject.
    #[must_use]
    pub fn key(&self) -> SubjectKey {
        SubjectKey {
            group: self.group.to_string(),
            index: self.index,
        }
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("group", &self.group.to_string())
            .field("index", &self.index)
            .field("config_path", &self.config_path)
            .field("control", &self.control)
            .finish()
    }
}

/// Means of observing and manipulating a population.
///
/// Per-subject calls report their own failure; a failing subject never aborts
/// a batch.
#[async_trait]
pub trait SubjectManipulator: Send + Sync {
    /// Number of subjects currently present in `group`.
    ///
    /// # Errors
    ///
    /// [`Error::TemporaryFailure`] for transient census problems,
    /// [`Error::PermanentFailure`] when the population source is unusable.
    async fn population_size(&self, group: &GroupIdentity) -> Result<usize>;

    /// Apply `args` (rendered from `candidate`) to `subject` and restart it.
    ///
    /// # Errors
    ///
    /// Any error marks only this subject unhealthy for the iteration.
    async fn apply_configuration(
        &self,
        subject: &Subject,
        candidate: &CandidateConfig,
        args: &[String],
    ) -> Result<()>;
}

/// A named population and its subjects.
pub struct SubjectGroup {
    identity: Arc<GroupIdentity>,
    config: SubjectGroupConfig,
    subjects: Vec<Subject>,
    address_generator: Arc<dyn ServingAddressGenerator>,
    census_deadline: Duration,
}

impl SubjectGroup {
    /// Create an uninitialized group.
    #[must_use]
    pub fn new(
        config: SubjectGroupConfig,
        address_generator: Arc<dyn ServingAddressGenerator>,
        census_deadline: Duration,
    ) -> Self {
        let identity = Arc::new(GroupIdentity {
            cluster_name: config.cluster_name.clone(),
            name: config.name.clone(),
            user_name: config.user_name.clone(),
        });
        Self {
            identity,
            config,
            subjects: Vec::new(),
            address_generator,
            census_deadline,
        }
    }

    /// Cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.identity.cluster_name
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Owning user.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.identity.user_name
    }

    /// Shared identity handed to subjects.
    #[must_use]
    pub fn identity(&self) -> &GroupIdentity {
        &self.identity
    }

    /// Group configuration.
    #[must_use]
    pub const fn config(&self) -> &SubjectGroupConfig {
        &self.config
    }

    /// Subjects from the last census; empty before [`Self::initialize`].
    #[must_use]
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// Take a population census and (re)build the subject list.
    ///
    /// The census is bounded by the group's census deadline and aborted by
    /// `cancel`. The effective count is the configured count capped by the
    /// census; the trailing `number_of_default_subjects` subjects become control
    /// subjects. When `existing` is given, the new subjects are appended to it
    /// and the combined list is returned.
    ///
    /// Every call re-derives the full list from a fresh census.
    ///
    /// # Errors
    ///
    /// [`Error::DeadlineExceeded`] when the census outlives its deadline,
    /// [`Error::Cancelled`] on shutdown, or whatever the manipulator reports.
    pub async fn initialize(
        &mut self,
        manipulator: &dyn SubjectManipulator,
        existing: Option<Vec<Subject>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Subject>> {
        let deadline_ms = u64::try_from(self.census_deadline.as_millis()).unwrap_or(u64::MAX);
        let discovered = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = tokio::time::timeout(
                self.census_deadline,
                manipulator.population_size(&self.identity),
            ) => outcome.map_err(|_| Error::DeadlineExceeded {
                operation: format!("population census of {}", self.identity),
                deadline_ms,
            })??,
        };

        let subject_count = effective_subject_count(self.config.number_of_subjects, discovered);
        let experimental = subject_count.saturating_sub(self.config.number_of_default_subjects);

        self.subjects = (0..subject_count)
            .map(|index| {
                Subject::new(
                    Arc::clone(&self.identity),
                    index,
                    self.subject_config_path(index),
                    index >= experimental,
                    Arc::clone(&self.address_generator),
                )
            })
            .collect();

        info!(
            group = %self.identity,
            discovered,
            subjects = subject_count,
            controls = subject_count - experimental,
            "population census complete"
        );

        match existing {
            Some(mut list) => {
                debug!(group = %self.identity, merged_into = list.len(), "appending subjects");
                list.extend(self.subjects.iter().cloned());
                Ok(list)
            }
            None => Ok(self.subjects.clone()),
        }
    }

    fn subject_config_path(&self, index: usize) -> String {
        format!("{}/{}", self.config.experiment_settings_files_dir, index)
    }
}

impl fmt::Debug for SubjectGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectGroup")
            .field("name", &self.identity.name)
            .field("user_name", &self.identity.user_name)
            .field("cluster_name", &self.identity.cluster_name)
            .field("subjects", &self.subjects.len())
            .finish()
    }
}

/// `configured` capped by `discovered`; `0` configured means "all discovered".
#[must_use]
pub const fn effective_subject_count(configured: usize, discovered: usize) -> usize {
    if configured > 0 && configured < discovered {
        configured
    } else {
        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_config(subjects: usize, defaults: usize) -> SubjectGroupConfig {
        SubjectGroupConfig {
            cluster_name: "xx".to_string(),
            name: "frontend".to_string(),
            user_name: "tuner".to_string(),
            number_of_subjects: subjects,
            number_of_default_subjects: defaults,
            experiment_settings_files_dir: "/settings".to_string(),
            serving_address_template: None,
        }
    }

    fn group(subjects: usize, defaults: usize) -> SubjectGroup {
        SubjectGroup::new(
            group_config(subjects, defaults),
            Arc::new(TemplateAddressGenerator::default()),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_effective_subject_count() {
        assert_eq!(effective_subject_count(10, 4), 4);
        assert_eq!(effective_subject_count(3, 4), 3);
        assert_eq!(effective_subject_count(0, 4), 4);
        assert_eq!(effective_subject_count(4, 4), 4);
    }

    #[test]
    fn test_uninitialized_group_has_no_subjects() {
        let group = group(5, 1);
        assert!(group.subjects().is_empty());
        assert_eq!(group.name(), "frontend");
        assert_eq!(group.cluster_name(), "xx");
        assert_eq!(group.user_name(), "tuner");
    }

    #[tokio::test]
    async fn test_initialize_caps_and_flags_controls() {
        let population = SimulatedPopulation::new().with_group("frontend", 4);
        let mut group = group(10, 2);

        let subjects = group
            .initialize(&population, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(subjects.len(), 4);
        let controls: Vec<bool> = subjects.iter().map(Subject::is_control).collect();
        assert_eq!(controls, vec![false, false, true, true]);
        assert_eq!(subjects[3].config_path(), "/settings/3");
        assert_eq!(group.subjects().len(), 4);
    }

    #[tokio::test]
    async fn test_initialize_appends_to_existing() {
        let population = SimulatedPopulation::new()
            .with_group("frontend", 3)
            .with_group("backend", 2);
        let mut frontend = group(0, 0);
        let mut backend_config = group_config(0, 1);
        backend_config.name = "backend".to_string();
        let mut backend = SubjectGroup::new(
            backend_config,
            Arc::new(TemplateAddressGenerator::default()),
            Duration::from_millis(500),
        );
        let cancel = CancellationToken::new();

        let list = frontend.initialize(&population, None, &cancel).await.unwrap();
        let list = backend.initialize(&population, Some(list), &cancel).await.unwrap();

        assert_eq!(list.len(), 5);
        assert_eq!(list[3].group().name, "backend");
        assert!(list[4].is_control());
        assert_eq!(backend.subjects().len(), 2);
    }

    #[tokio::test]
    async fn test_initialize_rederives_from_fresh_census() {
        let population = SimulatedPopulation::new().with_group("frontend", 6);
        let mut group = group(0, 1);
        let cancel = CancellationToken::new();

        assert_eq!(group.initialize(&population, None, &cancel).await.unwrap().len(), 6);

        population.set_population("frontend", 2);
        let subjects = group.initialize(&population, None, &cancel).await.unwrap();
        assert_eq!(subjects.len(), 2);
        assert!(subjects[1].is_control());
    }

    #[tokio::test(start_paused = true)]
    async fn test_census_deadline_is_temporary() {
        let population = SimulatedPopulation::new()
            .with_group("frontend", 4)
            .with_census_delay(Duration::from_secs(5));
        let mut group = group(0, 0);

        let error = group
            .initialize(&population, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::DeadlineExceeded { .. }));
        assert!(error.is_retryable());
        assert!(group.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_census_cancellation() {
        let population = SimulatedPopulation::new()
            .with_group("frontend", 4)
            .with_census_delay(Duration::from_secs(60));
        let mut group = SubjectGroup::new(
            group_config(0, 0),
            Arc::new(TemplateAddressGenerator::default()),
            Duration::from_secs(120),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = group.initialize(&population, None, &cancel).await.unwrap_err();
        assert!(matches!(error, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_unknown_group_is_permanent() {
        let population = SimulatedPopulation::new();
        let mut group = group(0, 0);

        let error = group
            .initialize(&population, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::PermanentFailure(_)));
    }
}
