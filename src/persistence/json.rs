//! JSON files: one line per query in `queries.jsonl`, the full tree in
//! `evaluation.json`.

use super::PersistenceHandler;
use crate::domain::{EvaluationDocument, QueryRecord};
use crate::error::{RankevalError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const QUERIES_FILE: &str = "queries.jsonl";
pub const EVALUATION_FILE: &str = "evaluation.json";

pub struct JsonPersistenceHandler {
    dir: PathBuf,
    queries: Mutex<Option<BufWriter<File>>>,
}

impl JsonPersistenceHandler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queries: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Option<BufWriter<File>>>> {
        self.queries
            .lock()
            .map_err(|_| RankevalError::Persistence("json writer lock poisoned".into()))
    }
}

impl PersistenceHandler for JsonPersistenceHandler {
    fn name(&self) -> &str {
        "json"
    }

    fn start(&self, evaluation: &str, _versions: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.dir.join(QUERIES_FILE))?;
        *self.writer()? = Some(BufWriter::new(file));
        log::info!("Writing {} results to {}", evaluation, self.dir.display());
        Ok(())
    }

    fn record_query(&self, record: &QueryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut guard = self.writer()?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| RankevalError::Persistence("json handler not started".into()))?;
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn stop(&self, document: &EvaluationDocument) -> Result<()> {
        if let Some(mut writer) = self.writer()?.take() {
            writer.flush()?;
        }
        let path = self.dir.join(EVALUATION_FILE);
        fs::write(&path, document.to_json_pretty()?)?;
        log::info!("Evaluation document written to {}", path.display());
        Ok(())
    }
}
