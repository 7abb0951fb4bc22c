//! Property-based tests for livetune
//!
//! - Population sizing and control-subject invariants
//! - History ordering under arbitrary write orders
//! - Parameter-space normalization
//! - Generation-weighted best-performer selection
//! - Run with ProptestConfig::with_cases(100)

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use livetune::clock::ManualClock;
use livetune::config::SubjectGroupConfig;
use livetune::experiment::{CandidateConfig, ParameterRange, ParameterSpace};
use livetune::history::{HistoryDatastore, MemoryHistoryDatastore, PipelineHistoryState};
use livetune::pipeline::{PipelineId, PipelineIdGenerator};
use livetune::scorer::{
    GenerationNumberWeightedBestPerformerScorer, GenerationWeighting,
    HistoricalBestPerformerScorer,
};
use livetune::subject::{
    effective_subject_count, SimulatedPopulation, SubjectGroup, TemplateAddressGenerator,
};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate a valid parameter range
fn arb_range() -> impl Strategy<Value = ParameterRange> {
    (-1_000i64..1_000, 0i64..5_000, 1i64..100).prop_flat_map(|(min, width, step)| {
        (min..=min + width).prop_map(move |default| {
            ParameterRange::new("-XX:Flag", min, min + width, default).step(step)
        })
    })
}

fn arb_weighting() -> impl Strategy<Value = GenerationWeighting> {
    prop_oneof![
        Just(GenerationWeighting::Linear),
        Just(GenerationWeighting::Logarithmic),
        Just(GenerationWeighting::Constant),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Population Properties
    // ========================================================================

    /// Property: effective count never exceeds the discovered population
    #[test]
    fn prop_effective_count_bounded(configured in 0usize..50, discovered in 0usize..50) {
        let count = effective_subject_count(configured, discovered);
        prop_assert!(count <= discovered);
        if configured == 0 {
            prop_assert_eq!(count, discovered);
        } else {
            prop_assert_eq!(count, configured.min(discovered));
        }
    }

    /// Property: controls are the trailing subjects, capped by the group size
    #[test]
    fn prop_controls_trail_experimental_subjects(
        configured in 0usize..20,
        defaults in 0usize..20,
        discovered in 0usize..20
    ) {
        prop_assume!(configured == 0 || defaults <= configured);
        let population = SimulatedPopulation::new().with_group("frontend", discovered);
        let mut group = SubjectGroup::new(
            SubjectGroupConfig {
                cluster_name: "xx".to_string(),
                name: "frontend".to_string(),
                user_name: "tuner".to_string(),
                number_of_subjects: configured,
                number_of_default_subjects: defaults,
                experiment_settings_files_dir: "/tmp/livetune".to_string(),
                serving_address_template: None,
            },
            Arc::new(TemplateAddressGenerator::default()),
            Duration::from_secs(1),
        );

        let subjects = runtime()
            .block_on(group.initialize(&population, None, &CancellationToken::new()))
            .unwrap();

        let count = effective_subject_count(configured, discovered);
        prop_assert_eq!(subjects.len(), count);
        let controls = subjects.iter().filter(|s| s.is_control()).count();
        prop_assert_eq!(controls, defaults.min(count));
        for (index, subject) in subjects.iter().enumerate() {
            prop_assert_eq!(subject.index(), index);
            prop_assert_eq!(subject.is_control(), index >= count - controls);
        }
    }

    // ========================================================================
    // History Properties
    // ========================================================================

    /// Property: reads are sorted by end timestamp whatever the write order
    #[test]
    fn prop_history_sorted_by_end_timestamp(stamps in proptest::collection::vec(0i64..1_000, 1..40)) {
        let store = MemoryHistoryDatastore::new();
        let id = PipelineId::new("p");

        let states = runtime().block_on(async {
            for (iteration, ms) in stamps.iter().enumerate() {
                let at = Utc.timestamp_millis_opt(*ms).unwrap();
                let state = PipelineHistoryState::builder(id.clone(), iteration as u64, at).build();
                store.write_state(state).await.unwrap();
            }
            store.get_states_for_pipeline_id(&id).await.unwrap()
        });

        prop_assert_eq!(states.len(), stamps.len());
        for pair in states.windows(2) {
            prop_assert!(pair[0].end_timestamp() <= pair[1].end_timestamp());
            if pair[0].end_timestamp() == pair[1].end_timestamp() {
                // Equal timestamps keep write order.
                prop_assert!(pair[0].iteration() < pair[1].iteration());
            }
        }
    }

    // ========================================================================
    // Parameter Space Properties
    // ========================================================================

    /// Property: normalized values are in range and on the step grid
    #[test]
    fn prop_normalize_lands_on_grid(range in arb_range(), value in -10_000i64..10_000) {
        let normalized = range.normalize(value);
        prop_assert!(normalized >= range.min && normalized <= range.max);
        prop_assert_eq!((normalized - range.min) % range.step, 0);
        prop_assert_eq!(range.normalize(normalized), normalized);
    }

    /// Property: normalizing a candidate yields exactly the space's flags
    #[test]
    fn prop_normalized_candidate_has_every_flag(value in proptest::option::of(-10_000i64..10_000)) {
        let space = ParameterSpace::new(vec![
            ParameterRange::new("-Xmx", 256, 4096, 1024).step(256),
            ParameterRange::new("-XX:NewRatio", 1, 8, 2),
        ])
        .unwrap();
        let mut candidate = CandidateConfig::new().with("-XX:Unknown", 1);
        if let Some(value) = value {
            candidate.set("-Xmx", value);
        }

        let normalized = space.normalize(&candidate);
        prop_assert_eq!(normalized.len(), 2);
        prop_assert!(normalized.get("-XX:Unknown").is_none());
        prop_assert_eq!(normalized.get("-XX:NewRatio"), Some(2));
    }

    // ========================================================================
    // Best-Performer Properties
    // ========================================================================

    /// Property: weights never decrease with the generation number
    #[test]
    fn prop_weight_monotonic(weighting in arb_weighting(), generation in 0u64..10_000) {
        prop_assert!(weighting.weight(generation) >= 1.0);
        prop_assert!(weighting.weight(generation + 1) >= weighting.weight(generation));
    }

    /// Property: the same score offered later never loses to itself earlier
    #[test]
    fn prop_later_generation_at_least_as_trusted(
        weighting in arb_weighting(),
        score in -1_000.0f64..1_000.0,
        generation in 1u64..1_000
    ) {
        prop_assert!(
            weighting.weighted(score, generation + 1) >= weighting.weighted(score, generation)
        );
    }

    /// Property: the retained best is the first maximum of the weighted scores
    #[test]
    fn prop_best_is_first_weighted_maximum(
        weighting in arb_weighting(),
        scores in proptest::collection::vec(-100.0f64..100.0, 1..30)
    ) {
        let mut scorer = GenerationNumberWeightedBestPerformerScorer::new(weighting);
        for (index, score) in scores.iter().enumerate() {
            let generation = index as u64 + 1;
            let candidate = CandidateConfig::new().with("-XX:NewRatio", index as i64);
            scorer.offer(&candidate, *score, generation);
        }

        let mut expected = 0;
        for index in 1..scores.len() {
            let best = weighting.weighted(scores[expected], expected as u64 + 1);
            if weighting.weighted(scores[index], index as u64 + 1) > best {
                expected = index;
            }
        }

        let best = scorer.best().unwrap();
        prop_assert_eq!(best.generation, expected as u64 + 1);
        prop_assert_eq!(best.score, scores[expected]);
    }

    // ========================================================================
    // Pipeline Id Properties
    // ========================================================================

    /// Property: ids are 32 lowercase hex digits and differ across instants
    #[test]
    fn prop_fresh_ids_distinct_across_instants(
        shard in 0u32..8,
        start in 0i64..1_000_000_000,
        gap in 1i64..1_000
    ) {
        let clock = Arc::new(ManualClock::at_millis(start));
        let generator = PipelineIdGenerator::new(shard, 8, "tuner:8080", clock.clone());

        let first = generator.fresh_id();
        clock.advance_millis(gap);
        let second = generator.fresh_id();

        prop_assert_ne!(&first, &second);
        prop_assert_eq!(first.as_str().len(), 32);
        prop_assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
