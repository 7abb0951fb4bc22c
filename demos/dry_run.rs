//! Dry Run: tuning two JVM flags on a simulated population
//!
//! Runs one pipeline against an in-process population whose throughput peaks
//! at `-Xmn256m -XX:NewRatio=3`, then prints the per-generation history and
//! the best performer found.
//!
//! Run with: cargo run --example dry_run

use std::collections::BTreeMap;
use std::sync::Arc;

use livetune::clock::SystemClock;
use livetune::config::{PipelineConfig, Settings, StaticConfigManager, SubjectGroupConfig};
use livetune::experiment::{CandidateConfig, ParameterRange, ParameterSpace, ValueSeparator};
use livetune::pipeline::{for_mode, PipelineManager, Services};
use livetune::registry::BackendRegistry;
use livetune::subject::SimulatedPopulation;

#[allow(clippy::cast_precision_loss)]
fn throughput(candidate: &CandidateConfig) -> BTreeMap<String, f64> {
    let young = candidate.get("-Xmn").unwrap_or(0) as f64;
    let ratio = candidate.get("-XX:NewRatio").unwrap_or(0) as f64;
    let value = 1_000.0 - ((young - 256.0) / 32.0).powi(2) - 20.0 * (ratio - 3.0).powi(2);
    BTreeMap::from([("throughput".to_string(), value)])
}

#[tokio::main]
async fn main() -> livetune::Result<()> {
    livetune::logging::init("livetune=info")?;

    let space = ParameterSpace::new(vec![
        ParameterRange::new("-Xmn", 64, 512, 128)
            .step(32)
            .separator(ValueSeparator::None)
            .suffix("m"),
        ParameterRange::new("-XX:NewRatio", 1, 8, 2),
    ])?;
    let group = SubjectGroupConfig {
        cluster_name: "local".to_string(),
        name: "frontend".to_string(),
        user_name: "demo".to_string(),
        number_of_subjects: 8,
        number_of_default_subjects: 2,
        experiment_settings_files_dir: "/tmp/livetune/frontend".to_string(),
        serving_address_template: Some("frontend-{index}.local:8080".to_string()),
    };
    let mut config = PipelineConfig::new(vec![group], space);
    config.max_iterations = 12;
    config.convergence_patience = Some(4);
    config.scoring.weights = BTreeMap::from([("throughput".to_string(), 1.0)]);

    let settings = Settings {
        tick_interval_ms: 100,
        ..Settings::default()
    };
    let backends = BackendRegistry::with_builtins().resolve(&settings)?;
    let population = Arc::new(
        SimulatedPopulation::new()
            .with_group("frontend", 8)
            .with_objective(throughput),
    );
    let services = Services::new(
        settings,
        Arc::new(SystemClock),
        population.clone(),
        population,
        backends.clone(),
        for_mode(&config.sync),
    )?;

    println!("=== livetune dry run ===\n");
    let manager = PipelineManager::new(services);
    let id = manager.start(Box::new(StaticConfigManager::new(config)?)).await?;
    let status = manager.join(&id).await;
    println!("Pipeline {id}: {status:?}\n");

    for state in backends.history.get_states_for_pipeline_id(&id).await? {
        let Some(score) = state.iteration_score() else {
            continue;
        };
        println!(
            "  generation {:>2}: mean {:>8.1}  baseline {:>8.1}",
            state.iteration(),
            score.mean.unwrap_or(f64::NAN),
            score.baseline_mean.unwrap_or(f64::NAN),
        );
    }

    let history = backends.history.get_states_for_pipeline_id(&id).await?;
    if let Some(best) = history.last().and_then(|state| state.best_performer()) {
        println!(
            "\nBest performer (generation {}): {:?} scoring {:.1}",
            best.generation, best.candidate, best.score
        );
    }
    Ok(())
}
