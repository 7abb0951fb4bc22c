//! Pipeline history schema and store contract tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use livetune::config::Settings;
use livetune::experiment::{CandidateConfig, SubjectRecord};
use livetune::history::{HistoryDatastore, MemoryHistoryDatastore, PipelineHistoryState};
use livetune::pipeline::{PipelineId, PipelineStage};
use livetune::registry::BackendRegistry;
use livetune::scorer::{BestPerformer, IterationScore, SubjectScore};
use livetune::subject::SubjectKey;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn key(index: usize) -> SubjectKey {
    SubjectKey {
        group: "frontend".to_string(),
        index,
    }
}

fn scored_state(id: &PipelineId, iteration: u64, ms: i64) -> PipelineHistoryState {
    let candidate = CandidateConfig::new().with("-XX:NewRatio", 3);
    let mut record = SubjectRecord::new(key(0), iteration, candidate.clone());
    record.mark_healthy();
    record.record_score(Default::default(), 4.5);

    PipelineHistoryState::builder(id.clone(), iteration, at(ms))
        .iteration_score(IterationScore {
            generation: iteration,
            mean: Some(4.5),
            baseline_mean: None,
            champion: Some(SubjectScore {
                subject: key(0),
                control: false,
                candidate: candidate.clone(),
                score: 4.5,
            }),
            scored_subjects: 1,
        })
        .best_performer(Some(BestPerformer {
            candidate,
            score: 4.5,
            generation: iteration,
        }))
        .subjects(vec![record])
        .build()
}

// =============================================================================
// PipelineHistoryState Schema
// =============================================================================

#[test]
fn test_history_state_defaults() {
    let state = PipelineHistoryState::builder(PipelineId::new("p"), 1, at(10)).build();

    assert_eq!(state.pipeline_id().as_str(), "p");
    assert_eq!(state.iteration(), 1);
    assert_eq!(state.end_timestamp(), at(10));
    assert_eq!(state.stage(), PipelineStage::Score);
    assert!(state.iteration_score().is_none());
    assert!(state.best_performer().is_none());
    assert!(state.subjects().is_empty());
}

#[test]
fn test_history_state_serialization() {
    let state = scored_state(&PipelineId::new("gc-tuning"), 2, 1_000);

    let json = serde_json::to_value(&state).expect("serialization failed");
    assert_eq!(json["pipeline_id"], "gc-tuning");
    assert_eq!(json["stage"], "SCORE");
    assert_eq!(json["subjects"][0]["health"]["status"], "healthy");

    let restored: PipelineHistoryState =
        serde_json::from_value(json).expect("deserialization failed");
    assert_eq!(restored, state);
}

// =============================================================================
// Store Contract
// =============================================================================

#[tokio::test]
async fn test_states_ordered_by_end_timestamp() {
    let store = MemoryHistoryDatastore::new();
    let id = PipelineId::new("p");
    for (iteration, ms) in [(3, 300), (1, 100), (2, 200)] {
        store.write_state(scored_state(&id, iteration, ms)).await.unwrap();
    }

    let iterations: Vec<u64> = store
        .get_states_for_pipeline_id(&id)
        .await
        .unwrap()
        .iter()
        .map(PipelineHistoryState::iteration)
        .collect();
    assert_eq!(iterations, vec![1, 2, 3]);

    let after = store.get_states_for_pipeline_id_after(&id, at(200)).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].iteration(), 3);
}

#[tokio::test]
async fn test_unknown_pipeline_has_no_history() {
    let store = MemoryHistoryDatastore::new();
    let states = store
        .get_states_for_pipeline_id(&PipelineId::new("missing"))
        .await
        .unwrap();
    assert!(states.is_empty());
    assert!(store.list_pipeline_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_writers_of_many_pipelines() {
    let backends = BackendRegistry::with_builtins()
        .resolve(&Settings::default())
        .unwrap();
    let history: Arc<dyn HistoryDatastore> = backends.history;

    let mut tasks = tokio::task::JoinSet::new();
    for pipeline in 0..4 {
        for iteration in 1..=25_u64 {
            let history = Arc::clone(&history);
            tasks.spawn(async move {
                let id = PipelineId::new(format!("p{pipeline}"));
                let ms = i64::try_from(iteration).unwrap() * 10;
                history.write_state(scored_state(&id, iteration, ms)).await
            });
        }
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let ids = history.list_pipeline_ids().await.unwrap();
    assert_eq!(ids.len(), 4);
    for id in ids {
        let states = history.get_states_for_pipeline_id(&id).await.unwrap();
        assert_eq!(states.len(), 25);
        assert!(states
            .windows(2)
            .all(|pair| pair[0].end_timestamp() <= pair[1].end_timestamp()));
    }
}
