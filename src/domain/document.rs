//! Serialized form of the evaluation tree.

use crate::metrics::VersionValue;
use serde::Serialize;
use std::collections::BTreeMap;

use super::query::Ancestry;

/// Metric name -> per-version values.
pub type MetricsMap = BTreeMap<String, MetricDocument>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricDocument {
    pub versions: BTreeMap<String, VersionValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationDocument {
    pub name: String,
    pub versions: Vec<String>,
    pub metrics: MetricsMap,
    pub corpora: Vec<CorpusDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusDocument {
    pub name: String,
    pub metrics: MetricsMap,
    pub topics: Vec<TopicDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDocument {
    pub name: String,
    pub metrics: MetricsMap,
    pub query_groups: Vec<QueryGroupDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryGroupDocument {
    pub name: String,
    pub metrics: MetricsMap,
    pub queries: Vec<QueryDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDocument {
    pub name: String,
    /// Version -> failure message for versions without data
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
    pub metrics: MetricsMap,
}

/// One finalized query as handed to persistence handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRecord {
    pub evaluation: String,
    #[serde(flatten)]
    pub ancestry: Ancestry,
    pub query: QueryDocument,
}

impl EvaluationDocument {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Number of queries across the whole tree.
    pub fn query_count(&self) -> usize {
        self.corpora
            .iter()
            .flat_map(|c| &c.topics)
            .flat_map(|t| &t.query_groups)
            .map(|g| g.queries.len())
            .sum()
    }
}
