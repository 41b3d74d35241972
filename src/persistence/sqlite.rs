//! SQLite results store: one row per (query, metric, version).

use super::PersistenceHandler;
use crate::domain::{EvaluationDocument, QueryRecord};
use crate::error::{RankevalError, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_runs_and_metrics",
        sql: "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                evaluation TEXT NOT NULL,
                versions TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                query_count INTEGER,
                document TEXT
            );
            CREATE TABLE IF NOT EXISTS query_metrics (
                run_id TEXT NOT NULL REFERENCES runs(id),
                corpus TEXT NOT NULL,
                topic TEXT NOT NULL,
                query_group TEXT NOT NULL,
                query TEXT NOT NULL,
                metric TEXT NOT NULL,
                version TEXT NOT NULL,
                value TEXT NOT NULL,
                total_hits INTEGER,
                PRIMARY KEY (run_id, corpus, topic, query_group, query, metric, version)
            );",
    },
    Migration {
        version: 2,
        name: "002_query_failures",
        sql: "CREATE TABLE IF NOT EXISTS query_failures (
                run_id TEXT NOT NULL REFERENCES runs(id),
                corpus TEXT NOT NULL,
                topic TEXT NOT NULL,
                query_group TEXT NOT NULL,
                query TEXT NOT NULL,
                version TEXT NOT NULL,
                message TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_query_metrics_metric
                ON query_metrics(run_id, metric, version);",
    },
];

/// Open `path` with the pragmas every connection uses.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // WAL for concurrent readers of a results db being written
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

/// Apply every migration not yet recorded in `schema_migrations`.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    for migration in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![migration.version],
            |row| row.get(0),
        )?;
        if applied {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        log::info!("Applied migration {}", migration.name);
    }
    Ok(())
}

pub struct SqlitePersistenceHandler {
    path: PathBuf,
    run_id: String,
    conn: Mutex<Option<Connection>>,
}

impl SqlitePersistenceHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: Uuid::new_v4().to_string(),
            conn: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| RankevalError::Persistence("sqlite connection lock poisoned".into()))
    }
}

fn not_started() -> RankevalError {
    RankevalError::Persistence("sqlite handler not started".into())
}

impl PersistenceHandler for SqlitePersistenceHandler {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn start(&self, evaluation: &str, versions: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = open_connection(&self.path)?;
        run_migrations(&mut conn)?;
        conn.execute(
            "INSERT INTO runs (id, evaluation, versions, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.run_id,
                evaluation,
                serde_json::to_string(versions)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        *self.connection()? = Some(conn);
        log::info!("Recording run {} in {}", self.run_id, self.path.display());
        Ok(())
    }

    fn record_query(&self, record: &QueryRecord) -> Result<()> {
        let mut guard = self.connection()?;
        let conn = guard.as_mut().ok_or_else(not_started)?;
        let ancestry = &record.ancestry;
        let query = &record.query;

        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO query_metrics
                 (run_id, corpus, topic, query_group, query, metric, version, value, total_hits)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (metric, values) in &query.metrics {
                for (version, value) in &values.versions {
                    let total_hits = value.total_hits.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
                    insert.execute(params![
                        self.run_id,
                        ancestry.corpus,
                        ancestry.topic,
                        ancestry.query_group,
                        query.name,
                        metric,
                        version,
                        value.value.to_string(),
                        total_hits
                    ])?;
                }
            }
            let mut failure = tx.prepare(
                "INSERT INTO query_failures
                 (run_id, corpus, topic, query_group, query, version, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (version, message) in &query.failures {
                failure.execute(params![
                    self.run_id,
                    ancestry.corpus,
                    ancestry.topic,
                    ancestry.query_group,
                    query.name,
                    version,
                    message
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn stop(&self, document: &EvaluationDocument) -> Result<()> {
        let guard = self.connection()?;
        let conn = guard.as_ref().ok_or_else(not_started)?;
        conn.execute(
            "UPDATE runs SET finished_at = ?1, query_count = ?2, document = ?3 WHERE id = ?4",
            params![
                Utc::now().to_rfc3339(),
                document.query_count() as i64,
                serde_json::to_string(document)?,
                self.run_id
            ],
        )?;
        Ok(())
    }
}
