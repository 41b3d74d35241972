//! A judged query, its per-version metric slots, and its lifecycle.

use crate::error::{RankevalError, Result};
use crate::judgment::JudgmentSet;
use crate::metrics::{JudgedHit, Metric, MetricDefinition, VersionSlot};
use crate::search::SearchResponse;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::document::{MetricDocument, MetricsMap, QueryDocument};
use super::Named;

/// Minimum number of rows requested from the search platform per version.
pub const MIN_ROWS: usize = 10;

/// The nodes a query belongs to. Used to place the query back in the tree and
/// to label persisted records; it carries no ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ancestry {
    pub corpus: String,
    pub topic: String,
    pub query_group: String,
}

/// How the query text is produced for a version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDefinition {
    /// Query-specific template name
    pub template: Option<String>,
    /// Template inherited from the query group
    pub default_template: Option<String>,
    /// Placeholder -> value substitutions applied to the resolved template
    pub placeholders: BTreeMap<String, Value>,
    /// The query node as it appeared in the ratings, used when no template applies
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Created,
    MetricsPrepared,
    /// Versions still to complete
    VersionsInFlight(usize),
    Finalized,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryState::Created => write!(f, "created"),
            QueryState::MetricsPrepared => write!(f, "metrics-prepared"),
            QueryState::VersionsInFlight(n) => write!(f, "versions-in-flight({})", n),
            QueryState::Finalized => write!(f, "finalized"),
        }
    }
}

#[derive(Debug)]
pub struct Query {
    name: String,
    ancestry: Ancestry,
    definition: QueryDefinition,
    judgments: Arc<JudgmentSet>,
    id_field: String,
    metrics: Vec<Metric>,
    state: QueryState,
    failures: BTreeMap<String, String>,
}

impl Query {
    pub fn new(
        name: impl Into<String>,
        ancestry: Ancestry,
        definition: QueryDefinition,
        judgments: JudgmentSet,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ancestry,
            definition,
            judgments: Arc::new(judgments),
            id_field: id_field.into(),
            metrics: Vec::new(),
            state: QueryState::Created,
            failures: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ancestry(&self) -> &Ancestry {
        &self.ancestry
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn judgments(&self) -> &JudgmentSet {
        &self.judgments
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Version -> failure message for versions that produced no data.
    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    /// Rows to request per version: enough to see every judged document.
    pub fn max_rows(&self) -> usize {
        MIN_ROWS.max(self.judgments.len())
    }

    fn illegal(&self, operation: &str) -> RankevalError {
        RankevalError::State(format!(
            "cannot {} query '{}' in state {}",
            operation, self.name, self.state
        ))
    }

    /// Bind every metric definition to this query's judgments and versions.
    pub fn prepare(
        &mut self,
        definitions: &[Arc<dyn MetricDefinition>],
        versions: &[String],
    ) -> Result<()> {
        if self.state != QueryState::Created {
            return Err(self.illegal("prepare"));
        }
        self.metrics = definitions
            .iter()
            .map(|definition| Metric::bind(Arc::clone(definition), &self.judgments, versions))
            .collect();
        self.state = QueryState::MetricsPrepared;
        Ok(())
    }

    pub fn begin_versions(&mut self, count: usize) -> Result<()> {
        if self.state != QueryState::MetricsPrepared {
            return Err(self.illegal("start versions of"));
        }
        self.state = QueryState::VersionsInFlight(count);
        Ok(())
    }

    /// Take this version's slot out of every metric for exclusive filling.
    pub fn checkout(&mut self, version: &str) -> Result<VersionRun> {
        if !matches!(self.state, QueryState::VersionsInFlight(_)) {
            return Err(self.illegal("check out a version of"));
        }
        let mut slots = Vec::with_capacity(self.metrics.len());
        for (index, metric) in self.metrics.iter_mut().enumerate() {
            if let Some(slot) = metric.take_slot(version) {
                slots.push((index, slot));
            }
        }
        Ok(VersionRun {
            version: version.to_string(),
            judgments: Arc::clone(&self.judgments),
            id_field: self.id_field.clone(),
            slots,
        })
    }

    /// Return a filled run; the version counts as complete.
    pub fn complete(&mut self, run: VersionRun) -> Result<()> {
        self.version_done("complete a version of")?;
        let VersionRun { version, slots, .. } = run;
        for (index, slot) in slots {
            if let Some(metric) = self.metrics.get_mut(index) {
                metric.restore_slot(version.clone(), slot);
            }
        }
        Ok(())
    }

    /// Record that `version` produced no data. Its slots are gone, leaving a gap.
    pub fn fail(&mut self, version: &str, error: &RankevalError) -> Result<()> {
        self.version_done("fail a version of")?;
        log::warn!(
            "Query '{}' has no data for version {}: {}",
            self.name,
            version,
            error
        );
        self.failures.insert(version.to_string(), error.to_string());
        Ok(())
    }

    fn version_done(&mut self, operation: &str) -> Result<()> {
        match self.state {
            QueryState::VersionsInFlight(n) if n > 0 => {
                self.state = QueryState::VersionsInFlight(n - 1);
                Ok(())
            }
            _ => Err(self.illegal(operation)),
        }
    }

    /// Freeze every metric once all versions are in.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state != QueryState::VersionsInFlight(0) {
            return Err(self.illegal("finalize"));
        }
        for metric in &mut self.metrics {
            metric.finalize();
        }
        self.state = QueryState::Finalized;
        Ok(())
    }

    pub fn metric_values(&self) -> MetricsMap {
        self.metrics
            .iter()
            .map(|metric| {
                (
                    metric.name().to_string(),
                    MetricDocument {
                        versions: metric.values().clone(),
                    },
                )
            })
            .collect()
    }

    pub fn to_document(&self) -> QueryDocument {
        QueryDocument {
            name: self.name.clone(),
            failures: self.failures.clone(),
            metrics: self.metric_values(),
        }
    }
}

impl Named for Query {
    fn name(&self) -> &str {
        &self.name
    }
}

/// The slots of one (query, version) pair, owned by the worker running it.
pub struct VersionRun {
    version: String,
    judgments: Arc<JudgmentSet>,
    id_field: String,
    slots: Vec<(usize, VersionSlot)>,
}

impl VersionRun {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stream the response hits as ranks 1..N into every slot, then the total.
    pub fn deliver(&mut self, response: &SearchResponse) {
        for (position, hit) in response.hits.iter().enumerate() {
            let rank = position + 1;
            let doc_id = hit.get(&self.id_field).and_then(doc_id);
            let judgment = doc_id.as_deref().and_then(|id| self.judgments.get(id));
            let judged = JudgedHit::new(doc_id.as_deref(), judgment);
            for (_, slot) in &mut self.slots {
                slot.collect(&judged, rank);
            }
        }
        for (_, slot) in &mut self.slots {
            slot.set_total_hits(response.total_hits);
        }
    }
}

impl fmt::Debug for VersionRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionRun")
            .field("version", &self.version)
            .field("slots", &self.slots.len())
            .finish()
    }
}

fn doc_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        // multi-valued id fields: the first value identifies the document
        Value::Array(values) => values.first().and_then(doc_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::Judgment;
    use crate::metrics::{AveragePrecision, Precision};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn query() -> Query {
        let judgments: JudgmentSet = ["a", "b"]
            .iter()
            .map(|id| (id.to_string(), Judgment::new(Decimal::ONE)))
            .collect();
        Query::new(
            "fender",
            Ancestry {
                corpus: "c".into(),
                topic: "t".into(),
                query_group: "g".into(),
            },
            QueryDefinition::default(),
            judgments,
            "id",
        )
    }

    fn definitions() -> Vec<Arc<dyn MetricDefinition>> {
        vec![Arc::new(Precision::at(10)), Arc::new(AveragePrecision::new())]
    }

    fn response(ids: &[&str], total: u64) -> SearchResponse {
        SearchResponse {
            total_hits: total,
            hits: ids
                .iter()
                .map(|id| json!({ "id": id }).as_object().cloned().unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let versions = vec!["v1".to_string(), "v2".to_string()];
        let mut q = query();
        assert_eq!(q.state(), QueryState::Created);
        q.prepare(&definitions(), &versions).unwrap();
        q.begin_versions(2).unwrap();

        let mut run = q.checkout("v1").unwrap();
        run.deliver(&response(&["a", "x", "b"], 3));
        q.complete(run).unwrap();

        let mut run = q.checkout("v2").unwrap();
        run.deliver(&response(&["x"], 1));
        q.complete(run).unwrap();

        assert_eq!(q.state(), QueryState::VersionsInFlight(0));
        q.finalize().unwrap();
        assert_eq!(q.state(), QueryState::Finalized);

        let values = q.metric_values();
        let p = &values["P@10"].versions;
        assert_eq!(p["v1"].value, Decimal::new(6667, 4));
        assert_eq!(p["v1"].total_hits, Some(3));
        assert_eq!(p["v2"].value, Decimal::ZERO);
    }

    #[test]
    fn test_failed_version_is_a_gap() {
        let versions = vec!["v1".to_string(), "v2".to_string()];
        let mut q = query();
        q.prepare(&definitions(), &versions).unwrap();
        q.begin_versions(2).unwrap();

        let mut run = q.checkout("v1").unwrap();
        run.deliver(&response(&["a", "b"], 2));
        q.complete(run).unwrap();

        let _lost = q.checkout("v2").unwrap();
        q.fail("v2", &RankevalError::Execution("timeout".into())).unwrap();
        q.finalize().unwrap();

        let values = q.metric_values();
        assert!(values["AP"].versions.contains_key("v1"));
        assert!(!values["AP"].versions.contains_key("v2"));
        assert!(q.failures()["v2"].contains("timeout"));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut q = query();
        assert!(matches!(q.begin_versions(1), Err(RankevalError::State(_))));
        assert!(q.checkout("v1").is_err());
        q.prepare(&definitions(), &["v1".to_string()]).unwrap();
        assert!(q.prepare(&definitions(), &["v1".to_string()]).is_err());
        assert!(q.finalize().is_err());
        q.begin_versions(1).unwrap();
        assert!(q.finalize().is_err());
        q.fail("v1", &RankevalError::Execution("x".into())).unwrap();
        assert!(q.fail("v1", &RankevalError::Execution("x".into())).is_err());
        q.finalize().unwrap();
        assert!(q.finalize().is_err());
    }

    #[test]
    fn test_max_rows_and_doc_ids() {
        let q = query();
        assert_eq!(q.max_rows(), MIN_ROWS);
        assert_eq!(doc_id(&json!("x")), Some("x".to_string()));
        assert_eq!(doc_id(&json!(42)), Some("42".to_string()));
        assert_eq!(doc_id(&json!(["first", "second"])), Some("first".to_string()));
        assert_eq!(doc_id(&json!(null)), None);
    }
}
