//! Search platform adapters.
//!
//! The evaluator only needs to send a query text to one version of an index
//! and read back the hits in backend order plus the total hit count.

pub mod memory;

pub use memory::InMemorySearchPlatform;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hits of one query against one version, in backend ranking order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "totalHits", default)]
    pub total_hits: u64,
    #[serde(default)]
    pub hits: Vec<Map<String, Value>>,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keep at most `max_rows` hits; the total is left as reported.
    pub fn truncated(mut self, max_rows: usize) -> Self {
        self.hits.truncate(max_rows);
        self
    }
}

pub trait SearchPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Run `query_text` against `index` as configured for `version`.
    fn execute_query(
        &self,
        index: &str,
        version: &str,
        query_text: &str,
        fields: &[String],
        max_rows: usize,
    ) -> Result<SearchResponse>;
}
