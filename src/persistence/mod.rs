//! Where finalized queries and the final evaluation document go.
//!
//! Handlers are called concurrently by the workers finishing queries, so every
//! handler method takes `&self` and guards its own state.

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonPersistenceHandler;
pub use memory::MemoryPersistenceHandler;
pub use sqlite::SqlitePersistenceHandler;

use crate::domain::{EvaluationDocument, QueryRecord};
use crate::error::{RankevalError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub trait PersistenceHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare for a run of `evaluation` over `versions`.
    fn start(&self, evaluation: &str, versions: &[String]) -> Result<()>;

    /// Called exactly once per finalized query.
    fn record_query(&self, record: &QueryRecord) -> Result<()>;

    /// Called once with the aggregated document after every query finished.
    fn stop(&self, document: &EvaluationDocument) -> Result<()>;
}

/// The handlers that started successfully.
pub struct PersistenceManager {
    handlers: Vec<Arc<dyn PersistenceHandler>>,
    recorded: AtomicUsize,
}

impl PersistenceManager {
    /// Start every handler; the ones that fail are dropped. Fails when handlers
    /// were configured and none of them started.
    pub fn start(
        handlers: Vec<Arc<dyn PersistenceHandler>>,
        evaluation: &str,
        versions: &[String],
    ) -> Result<Self> {
        let configured = handlers.len();
        let mut active = Vec::with_capacity(configured);
        for handler in handlers {
            match handler.start(evaluation, versions) {
                Ok(()) => {
                    log::debug!("Persistence handler {} started", handler.name());
                    active.push(handler);
                }
                Err(e) => log::warn!(
                    "Dropping persistence handler {}: failed to start: {}",
                    handler.name(),
                    e
                ),
            }
        }
        if configured > 0 && active.is_empty() {
            return Err(RankevalError::Persistence(format!(
                "none of the {} persistence handlers could start",
                configured
            )));
        }
        if configured == 0 {
            log::info!("No persistence handlers configured");
        }
        Ok(Self {
            handlers: active,
            recorded: AtomicUsize::new(0),
        })
    }

    /// Manager without handlers.
    pub fn disabled() -> Self {
        Self {
            handlers: Vec::new(),
            recorded: AtomicUsize::new(0),
        }
    }

    pub fn active_handlers(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn record_query(&self, record: &QueryRecord) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        for handler in &self.handlers {
            if let Err(e) = handler.record_query(record) {
                log::error!(
                    "Persistence handler {} failed to record query '{}': {}",
                    handler.name(),
                    record.query.name,
                    e
                );
            }
        }
    }

    pub fn stop(&self, document: &EvaluationDocument) {
        for handler in &self.handlers {
            if let Err(e) = handler.stop(document) {
                log::error!("Persistence handler {} failed to stop: {}", handler.name(), e);
            }
        }
    }

    /// Queries handed to the handlers so far.
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Relaxed)
    }
}
