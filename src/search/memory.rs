//! Offline search platform replaying recorded responses.

use super::{SearchPlatform, SearchResponse};
use crate::error::{RankevalError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Responses keyed by (version, query text). Unknown pairs answer with no hits.
#[derive(Debug, Default)]
pub struct InMemorySearchPlatform {
    responses: HashMap<(String, String), SearchResponse>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl InMemorySearchPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{version: {queryText: {totalHits, hits}}}`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RankevalError::Config(format!(
                "Failed to read recorded responses {}: {}",
                path.display(),
                e
            ))
        })?;
        let recorded: BTreeMap<String, BTreeMap<String, SearchResponse>> =
            serde_json::from_str(&text).map_err(|e| {
                RankevalError::Config(format!(
                    "Malformed recorded responses {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let mut platform = Self::new();
        for (version, queries) in recorded {
            for (query_text, response) in queries {
                platform.insert(&version, &query_text, response);
            }
        }
        log::info!(
            "Loaded {} recorded responses from {}",
            platform.responses.len(),
            path.display()
        );
        Ok(platform)
    }

    pub fn insert(&mut self, version: &str, query_text: &str, response: SearchResponse) {
        self.responses
            .insert((version.to_string(), query_text.to_string()), response);
    }

    /// Record a response whose hits carry only `id_field`; the total is the hit count.
    pub fn insert_ids(&mut self, version: &str, query_text: &str, id_field: &str, ids: &[&str]) {
        let hits: Vec<Map<String, Value>> = ids
            .iter()
            .map(|id| {
                let mut hit = Map::new();
                hit.insert(id_field.to_string(), Value::String(id.to_string()));
                hit
            })
            .collect();
        let response = SearchResponse {
            total_hits: hits.len() as u64,
            hits,
        };
        self.insert(version, query_text, response);
    }

    /// Every query against `version` fails from now on.
    pub fn fail_version(&mut self, version: &str) {
        self.failing.insert(version.to_string());
    }

    /// Number of `execute_query` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl SearchPlatform for InMemorySearchPlatform {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn execute_query(
        &self,
        index: &str,
        version: &str,
        query_text: &str,
        _fields: &[String],
        max_rows: usize,
    ) -> Result<SearchResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(version) {
            return Err(RankevalError::Execution(format!(
                "version {} of index {} is unavailable",
                version, index
            )));
        }
        let key = (version.to_string(), query_text.to_string());
        match self.responses.get(&key) {
            Some(response) => Ok(response.clone().truncated(max_rows)),
            None => {
                log::debug!("No recorded response for version {}: {}", version, query_text);
                Ok(SearchResponse::empty())
            }
        }
    }
}
