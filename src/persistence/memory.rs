use super::PersistenceHandler;
use crate::domain::{EvaluationDocument, QueryRecord};
use crate::error::{RankevalError, Result};
use std::sync::{Mutex, PoisonError};

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistenceHandler {
    records: Mutex<Vec<QueryRecord>>,
    document: Mutex<Option<EvaluationDocument>>,
    fail_start: bool,
}

impl MemoryPersistenceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler whose `start` always fails.
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<QueryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The document handed to `stop`, if the run finished.
    pub fn document(&self) -> Option<EvaluationDocument> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceHandler for MemoryPersistenceHandler {
    fn name(&self) -> &str {
        "memory"
    }

    fn start(&self, _evaluation: &str, _versions: &[String]) -> Result<()> {
        if self.fail_start {
            return Err(RankevalError::Persistence("memory handler refused to start".into()));
        }
        Ok(())
    }

    fn record_query(&self, record: &QueryRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| RankevalError::Persistence("record lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    fn stop(&self, document: &EvaluationDocument) -> Result<()> {
        *self
            .document
            .lock()
            .map_err(|_| RankevalError::Persistence("document lock poisoned".into()))? =
            Some(document.clone());
        Ok(())
    }
}
