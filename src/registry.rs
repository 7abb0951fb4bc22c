//! Name → constructor registry for persistence backends
//!
//! Populated at process start, then [`BackendRegistry::resolve`] checks the
//! names in [`Settings`] and builds exactly one live-state store and one
//! history store. Unknown names fail there, before any pipeline starts.
//!
//! ```rust
//! use livetune::config::Settings;
//! use livetune::registry::BackendRegistry;
//!
//! let registry = BackendRegistry::with_builtins();
//! let backends = registry.resolve(&Settings::default()).unwrap();
//!
//! let mut settings = Settings::default();
//! settings.history_datastore = "cassandra".to_string();
//! assert!(registry.resolve(&settings).is_err());
//! # drop(backends);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::datastore::{Datastore, InMemoryDatastore};
use crate::history::{HistoryDatastore, MemoryHistoryDatastore};
use crate::{Error, Result};

/// Builds a live-state store.
pub type DatastoreFactory = Arc<dyn Fn(&Settings) -> Result<Arc<dyn Datastore>> + Send + Sync>;

/// Builds a history store.
pub type HistoryDatastoreFactory =
    Arc<dyn Fn(&Settings) -> Result<Arc<dyn HistoryDatastore>> + Send + Sync>;

/// Name of the built-in in-memory backends.
pub const MEMORY_BACKEND: &str = "memory";

/// The pair of stores shared by every pipeline in the process.
#[derive(Clone)]
pub struct Backends {
    /// Live-state store
    pub datastore: Arc<dyn Datastore>,
    /// History store
    pub history: Arc<dyn HistoryDatastore>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Registry of backend constructors.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    datastores: BTreeMap<String, DatastoreFactory>,
    history_datastores: BTreeMap<String, HistoryDatastoreFactory>,
}

impl BackendRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-memory backends under [`MEMORY_BACKEND`].
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_datastore(MEMORY_BACKEND, |_| Ok(Arc::new(InMemoryDatastore::new())));
        registry.register_history_datastore(MEMORY_BACKEND, |_| {
            Ok(Arc::new(MemoryHistoryDatastore::new()))
        });
        registry
    }

    /// Register (or replace) a live-state backend.
    pub fn register_datastore(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Settings) -> Result<Arc<dyn Datastore>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.datastores.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register (or replace) a history backend.
    pub fn register_history_datastore(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Settings) -> Result<Arc<dyn HistoryDatastore>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.history_datastores.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registered live-state backend names.
    #[must_use]
    pub fn datastore_names(&self) -> Vec<&str> {
        self.datastores.keys().map(String::as_str).collect()
    }

    /// Registered history backend names.
    #[must_use]
    pub fn history_datastore_names(&self) -> Vec<&str> {
        self.history_datastores.keys().map(String::as_str).collect()
    }

    /// Check both configured names exist, then build both stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBackend`] for an unregistered name, or
    /// whatever a factory returns.
    pub fn resolve(&self, settings: &Settings) -> Result<Backends> {
        let datastore = self.datastores.get(&settings.datastore).ok_or_else(|| {
            Error::UnknownBackend {
                kind: "datastore",
                name: settings.datastore.clone(),
                available: self.datastore_names().join(", "),
            }
        })?;
        let history = self
            .history_datastores
            .get(&settings.history_datastore)
            .ok_or_else(|| Error::UnknownBackend {
                kind: "history datastore",
                name: settings.history_datastore.clone(),
                available: self.history_datastore_names().join(", "),
            })?;

        let backends = Backends {
            datastore: datastore(settings)?,
            history: history(settings)?,
        };
        info!(
            datastore = %settings.datastore,
            history_datastore = %settings.history_datastore,
            "persistence backends resolved"
        );
        Ok(backends)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("datastores", &self.datastore_names())
            .field("history_datastores", &self.history_datastore_names())
            .finish()
    }
}
