//! Document store builder
//!
//! ```ignore
//! use apogy_engine::{DocumentStore, EngineConfig};
//!
//! // Defaults: MVCC backend, JSON records, two reconcile workers
//! let store = DocumentStore::open(EngineConfig::default())?;
//!
//! // Injected collaborators
//! let store = DocumentStore::builder()
//!     .config(EngineConfig::default().with_reconcile_workers(0))
//!     .kv(Arc::new(EmbeddedKv::new()))
//!     .reactors(Arc::new(registry))
//!     .bus(Arc::new(LocalBus::new()))
//!     .build()?;
//! ```

use std::sync::Arc;

use apogy_concurrency::MvccKv;
use apogy_core::{KvStore, Result};
use apogy_storage::EmbeddedKv;
use tracing::info;

use super::DocumentStore;
use crate::background::ReconcileScheduler;
use crate::bus::Bus;
use crate::config::{Backend, EngineConfig};
use crate::model::ModelCache;
use crate::reactor::ReactorRegistry;

// ============================================================================
// DocumentStore Builder
// ============================================================================

/// Builder for [`DocumentStore`]
///
/// Every collaborator not supplied is created from the configuration.
#[derive(Default)]
pub struct DocumentStoreBuilder {
    config: EngineConfig,
    kv: Option<Arc<dyn KvStore>>,
    models: Option<Arc<ModelCache>>,
    reactors: Option<Arc<ReactorRegistry>>,
    scheduler: Option<Arc<ReconcileScheduler>>,
    bus: Option<Arc<dyn Bus>>,
}

impl DocumentStoreBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this KV backend instead of the configured one
    pub fn kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Share a model cache
    pub fn models(mut self, models: Arc<ModelCache>) -> Self {
        self.models = Some(models);
        self
    }

    /// Use a reactor registry (with its runtimes registered)
    pub fn reactors(mut self, reactors: Arc<ReactorRegistry>) -> Self {
        self.reactors = Some(reactors);
        self
    }

    /// Share a reconcile scheduler
    pub fn scheduler(mut self, scheduler: Arc<ReconcileScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Coordinate reconciliation through a bus
    pub fn bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the store
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the configuration is invalid.
    pub fn build(self) -> Result<DocumentStore> {
        self.config.validate()?;
        let config = self.config;

        let kv = self.kv.unwrap_or_else(|| match config.backend {
            Backend::Mvcc => Arc::new(MvccKv::new()) as Arc<dyn KvStore>,
            Backend::Embedded => Arc::new(EmbeddedKv::new()) as Arc<dyn KvStore>,
        });
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ReconcileScheduler::from_config(&config.reconcile)));

        info!(
            backend = kv.name(),
            encoding = ?config.encoding,
            reconcile_workers = scheduler.stats().worker_count,
            bus = self.bus.is_some(),
            "document store ready"
        );

        Ok(DocumentStore {
            kv,
            models: self.models.unwrap_or_default(),
            reactors: self.reactors.unwrap_or_default(),
            scheduler,
            bus: self.bus,
            config,
        })
    }
}
