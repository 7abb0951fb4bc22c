//! # livetune: Live-Tuning Pipeline Orchestration
//!
//! **Version**: 0.1.0
//!
//! livetune runs generation-based experiments on the runtime flags of a live
//! population of servers. Each pipeline repeatedly proposes candidate flag
//! sets, deploys them to experimental subjects (controls keep the baseline),
//! checks population health, scores every subject, and keeps the historical
//! best performer, trusting later generations more than earlier ones.
//!
//! ## Design Principles
//!
//! - **Explicit scopes**: process [`pipeline::Services`], one
//!   [`pipeline::PipelineContext`] per pipeline, one
//!   [`pipeline::IterationContext`] per generation
//! - **Two failure kinds**: temporary failures are retried on the next tick
//!   within a budget, permanent ones fail the pipeline
//! - **Pluggable stores**: backends are looked up by name in a
//!   [`registry::BackendRegistry`]
//! - **Selectable coordination**: shards run independently or meet at a
//!   barrier after every iteration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use livetune::clock::SystemClock;
//! use livetune::config::{self, StaticConfigManager};
//! use livetune::pipeline::{for_mode, PipelineManager, Services};
//! use livetune::registry::BackendRegistry;
//! use livetune::subject::SimulatedPopulation;
//!
//! # async fn example() -> livetune::Result<()> {
//! livetune::logging::init("livetune=info")?;
//! let settings = config::load_settings_from_file(Path::new("livetune.toml"))?;
//! let pipeline = config::load_pipeline_config_from_file(Path::new("experiment.toml"))?;
//!
//! let backends = BackendRegistry::with_builtins().resolve(&settings)?;
//! let population = Arc::new(SimulatedPopulation::new().with_group("frontend", 12));
//! let services = Services::new(
//!     settings,
//!     Arc::new(SystemClock),
//!     population.clone(),
//!     population,
//!     backends,
//!     for_mode(&pipeline.sync),
//! )?;
//!
//! let manager = PipelineManager::new(services);
//! let id = manager.start(Box::new(StaticConfigManager::new(pipeline)?)).await?;
//! println!("{:?}", manager.join(&id).await);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod clock;
pub mod config;
pub mod datastore;
pub mod error;
pub mod experiment;
pub mod generator;
pub mod history;
pub mod hypothesizer;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod scorer;
pub mod subject;
pub mod validator;

pub use error::{Error, Result};
