//! Drives every judged query through every version.
//!
//! [`Evaluator`] resolves the metric set once, detaches the queries from the
//! tree, lets an [`ExecutionStrategy`] run them and attaches them back before
//! the aggregated document is built.

pub mod strategy;

pub use strategy::{
    EvaluationParallel, ExecutionStrategy, QueryParallel, StrategyKind, Synchronous,
};

use crate::domain::{Ancestry, Evaluation, EvaluationDocument, Query, QueryRecord, VersionRun};
use crate::error::{RankevalError, Result};
use crate::metrics::{MetricDefinition, MetricFactory};
use crate::persistence::{PersistenceHandler, PersistenceManager};
use crate::search::SearchPlatform;
use crate::template::{substitute, TemplateResolver};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A checked-out version ready to be sent to the search platform.
pub struct VersionTask {
    run: VersionRun,
    query_text: String,
    max_rows: usize,
}

/// A version back from the search platform: its slots, filled or not.
pub struct VersionOutcome {
    run: VersionRun,
    result: Result<()>,
}

/// Everything a worker needs to evaluate a query. Shared read-only by all workers.
pub struct EvaluationContext {
    evaluation: String,
    index: String,
    fields: Vec<String>,
    versions: Vec<String>,
    platform: Arc<dyn SearchPlatform>,
    templates: Arc<dyn TemplateResolver>,
    definitions: Vec<Arc<dyn MetricDefinition>>,
    persistence: PersistenceManager,
    aborted: AtomicBool,
}

impl EvaluationContext {
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    /// Fails once any worker hit an error that ends the run.
    pub fn ensure_running(&self) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(RankevalError::Execution("evaluation aborted".into()));
        }
        Ok(())
    }

    fn abort_on<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.aborted.store(true, Ordering::Release);
        }
        result
    }

    /// Query text for `version`: the query template, else the group default,
    /// else the raw query node, with placeholders substituted.
    pub fn query_text(&self, query: &Query, version: &str) -> Result<String> {
        let definition = query.definition();
        let template = self.templates.resolve(
            definition.default_template.as_deref(),
            definition.template.as_deref(),
            version,
        )?;
        Ok(match template {
            Some(body) => substitute(&body, &definition.placeholders),
            None => definition.raw.to_string(),
        })
    }

    pub fn prepare(&self, query: &mut Query) -> Result<()> {
        let result = query
            .prepare(&self.definitions, &self.versions)
            .and_then(|()| query.begin_versions(self.versions.len()));
        self.abort_on(result)
    }

    pub fn version_task(&self, query: &mut Query, version: &str) -> Result<VersionTask> {
        let result = self.query_text(query, version).and_then(|query_text| {
            Ok(VersionTask {
                run: query.checkout(version)?,
                query_text,
                max_rows: query.max_rows(),
            })
        });
        self.abort_on(result)
    }

    /// Send one version to the search platform and stream the hits into its slots.
    pub fn execute(&self, task: VersionTask) -> VersionOutcome {
        let VersionTask {
            mut run,
            query_text,
            max_rows,
        } = task;
        log::debug!("Executing version {}: {}", run.version(), query_text);
        let result = self
            .platform
            .execute_query(&self.index, run.version(), &query_text, &self.fields, max_rows)
            .map(|response| {
                let response = response.truncated(max_rows);
                run.deliver(&response);
            });
        VersionOutcome { run, result }
    }

    /// Hand a version back to its query; an execution failure leaves a gap.
    pub fn settle(&self, query: &mut Query, outcome: VersionOutcome) -> Result<()> {
        let VersionOutcome { run, result } = outcome;
        let settled = match result {
            Ok(()) => query.complete(run),
            Err(e) => {
                let version = run.version().to_string();
                drop(run);
                query.fail(&version, &e)
            }
        };
        self.abort_on(settled)
    }

    /// Finalize the query and persist it.
    pub fn finish(&self, query: &mut Query) -> Result<()> {
        self.abort_on(query.finalize())?;
        let record = QueryRecord {
            evaluation: self.evaluation.clone(),
            ancestry: query.ancestry().clone(),
            query: query.to_document(),
        };
        self.persistence.record_query(&record);
        log::debug!("Query '{}' finalized", query.name());
        Ok(())
    }

    /// One query, its versions in order, on the calling thread.
    pub fn evaluate_query(&self, query: &mut Query) -> Result<()> {
        self.ensure_running()?;
        self.prepare(query)?;
        for version in &self.versions {
            let task = self.version_task(query, version)?;
            let outcome = self.execute(task);
            self.settle(query, outcome)?;
        }
        self.finish(query)
    }
}

/// A configured metric that could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiationFailure {
    pub metric: String,
    pub message: String,
}

/// A version of a query without data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub ancestry: Ancestry,
    pub query: String,
    pub version: String,
    pub message: String,
}

#[derive(Debug)]
pub struct EvaluationReport {
    pub evaluation: Evaluation,
    pub document: EvaluationDocument,
    pub failures: Vec<QueryFailure>,
    pub instantiation_failures: Vec<InstantiationFailure>,
    /// Queries handed to persistence
    pub persisted: usize,
    pub elapsed: Duration,
}

pub struct Evaluator {
    index: String,
    fields: Vec<String>,
    platform: Arc<dyn SearchPlatform>,
    templates: Arc<dyn TemplateResolver>,
    definitions: Vec<Arc<dyn MetricDefinition>>,
    instantiation_failures: Vec<InstantiationFailure>,
    strategy: Box<dyn ExecutionStrategy>,
    handlers: Vec<Arc<dyn PersistenceHandler>>,
}

impl Evaluator {
    /// Resolve every metric identifier once. Configuration errors abort;
    /// metrics that cannot be instantiated are reported and left out.
    pub fn new(
        factory: &dyn MetricFactory,
        metric_ids: &[String],
        platform: Arc<dyn SearchPlatform>,
        templates: Arc<dyn TemplateResolver>,
    ) -> Result<Self> {
        let mut definitions: Vec<Arc<dyn MetricDefinition>> = Vec::new();
        let mut names = HashSet::new();
        let mut instantiation_failures = Vec::new();
        for id in metric_ids {
            match factory.create(id) {
                Ok(definition) => {
                    if !names.insert(definition.name().to_string()) {
                        log::warn!("Metric {} resolves to duplicate name {}, skipped", id, definition.name());
                        continue;
                    }
                    definitions.push(definition);
                }
                Err(RankevalError::Instantiation(message)) => {
                    log::error!("Metric {} cannot be instantiated: {}", id, message);
                    instantiation_failures.push(InstantiationFailure {
                        metric: id.clone(),
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        if definitions.is_empty() {
            return Err(RankevalError::Config("no metric could be instantiated".into()));
        }
        log::info!(
            "Metrics: {}",
            definitions.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self {
            index: String::new(),
            fields: Vec::new(),
            platform,
            templates,
            definitions,
            instantiation_failures,
            strategy: Box::new(Synchronous),
            handlers: Vec::new(),
        })
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ExecutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_persistence(mut self, handler: Arc<dyn PersistenceHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name()).collect()
    }

    pub fn instantiation_failures(&self) -> &[InstantiationFailure] {
        &self.instantiation_failures
    }

    pub async fn run(&self, mut evaluation: Evaluation) -> Result<EvaluationReport> {
        let versions = evaluation.versions().to_vec();
        if versions.is_empty() {
            return Err(RankevalError::Config(format!(
                "evaluation {} has no versions",
                evaluation.name()
            )));
        }
        let persistence =
            PersistenceManager::start(self.handlers.clone(), evaluation.name(), &versions)?;
        let context = Arc::new(EvaluationContext {
            evaluation: evaluation.name().to_string(),
            index: self.index.clone(),
            fields: self.fields.clone(),
            versions,
            platform: Arc::clone(&self.platform),
            templates: Arc::clone(&self.templates),
            definitions: self.definitions.clone(),
            persistence,
            aborted: AtomicBool::new(false),
        });

        let queries = evaluation.detach_queries();
        log::info!(
            "Evaluating {} queries over {} versions ({} strategy, platform {})",
            queries.len(),
            context.versions.len(),
            self.strategy.name(),
            self.platform.name()
        );
        let started = Instant::now();
        let done = self.strategy.execute(queries, Arc::clone(&context)).await?;
        for query in done {
            evaluation.attach_query(query);
        }
        let elapsed = started.elapsed();

        let document = evaluation.to_document();
        context.persistence.stop(&document);

        let failures = collect_failures(&evaluation);
        if !failures.is_empty() {
            log::warn!("{} query versions produced no data", failures.len());
        }
        log::info!(
            "Evaluation {} finished in {:.2}s",
            evaluation.name(),
            elapsed.as_secs_f64()
        );
        Ok(EvaluationReport {
            evaluation,
            document,
            failures,
            instantiation_failures: self.instantiation_failures.clone(),
            persisted: context.persistence.recorded(),
            elapsed,
        })
    }
}

fn collect_failures(evaluation: &Evaluation) -> Vec<QueryFailure> {
    evaluation
        .queries()
        .flat_map(|query| {
            query.failures().iter().map(move |(version, message)| QueryFailure {
                ancestry: query.ancestry().clone(),
                query: query.name().to_string(),
                version: version.clone(),
                message: message.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueryDefinition;
    use crate::judgment::{Judgment, JudgmentSet};
    use crate::metrics::SimpleMetricFactory;
    use crate::persistence::MemoryPersistenceHandler;
    use crate::search::InMemorySearchPlatform;
    use crate::template::{FileTemplateResolver, InMemoryTemplateResolver};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::collections::BTreeMap;

    const VERSIONS: [&str; 3] = ["v1.0", "v1.1", "v1.2"];

    fn metric_ids() -> Vec<String> {
        [
            "PrecisionAtTen",
            "Recall",
            "F1",
            "AveragePrecision",
            "ReciprocalRank",
            "NDCGAtTen",
            "ERRAtTen",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn add_query(evaluation: &mut Evaluation, group: &str, term: &str, relevant: &[(&str, i64)]) {
        let ancestry = Ancestry {
            corpus: "basses".into(),
            topic: "brands".into(),
            query_group: group.into(),
        };
        let judgments: JudgmentSet = relevant
            .iter()
            .map(|(id, grade)| (id.to_string(), Judgment::new(Decimal::from(*grade))))
            .collect();
        let placeholders: BTreeMap<String, serde_json::Value> =
            [("$query".to_string(), json!(term))].into_iter().collect();
        let definition = QueryDefinition {
            template: None,
            default_template: Some("only_q.json".into()),
            placeholders,
            raw: json!({ "placeholders": { "$query": term } }),
        };
        let query = Query::new(term, ancestry.clone(), definition, judgments, "id");
        evaluation.group_at(&ancestry).query(term, || query);
    }

    /// Nine queries in three groups, each version ranking the documents differently.
    fn fixture() -> (Evaluation, InMemorySearchPlatform, InMemoryTemplateResolver) {
        let mut evaluation = Evaluation::new(
            "fixture",
            VERSIONS.iter().map(|v| v.to_string()).collect(),
        );
        let mut platform = InMemorySearchPlatform::new();
        let mut templates = InMemoryTemplateResolver::new();
        templates.insert("only_q.json", r#"{"match": "$query"}"#);

        for i in 0..9 {
            let group = format!("group{}", i % 3);
            let term = format!("term{}", i);
            let relevant: Vec<(String, i64)> =
                (0..4).map(|d| (format!("{}-doc{}", term, d), (d % 4) as i64)).collect();
            let relevant_refs: Vec<(&str, i64)> =
                relevant.iter().map(|(id, g)| (id.as_str(), *g)).collect();
            add_query(&mut evaluation, &group, &term, &relevant_refs);

            let text = format!(r#"{{"match": "{}"}}"#, term);
            for (v, version) in VERSIONS.iter().enumerate() {
                let ids: Vec<String> = (0..6)
                    .map(|r| {
                        let slot = (r + v + i) % 6;
                        if slot < 4 {
                            format!("{}-doc{}", term, slot)
                        } else {
                            format!("noise{}", slot)
                        }
                    })
                    .take(6 - v)
                    .collect();
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                platform.insert_ids(version, &text, "id", &refs);
            }
        }
        // no hits and no judgments at all
        add_query(&mut evaluation, "group0", "nothing", &[]);
        (evaluation, platform, templates)
    }

    fn evaluator(
        platform: InMemorySearchPlatform,
        templates: InMemoryTemplateResolver,
        kind: StrategyKind,
    ) -> Evaluator {
        Evaluator::new(
            &SimpleMetricFactory::default(),
            &metric_ids(),
            Arc::new(platform),
            Arc::new(templates),
        )
        .unwrap()
        .with_index("core1")
        .with_fields(vec!["id".into()])
        .with_strategy(kind.build(4, 3))
    }

    #[tokio::test]
    async fn test_query_parallel_with_file_templates_on_current_thread() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("only_q.json"), r#"{"match": "$query"}"#).unwrap();

        let mut documents = Vec::new();
        for kind in [StrategyKind::Synchronous, StrategyKind::QueryParallel] {
            let (evaluation, platform, _) = fixture();
            let report = Evaluator::new(
                &SimpleMetricFactory::default(),
                &metric_ids(),
                Arc::new(platform),
                Arc::new(FileTemplateResolver::new(dir.path())),
            )
            .unwrap()
            .with_index("core1")
            .with_strategy(kind.build(2, 2))
            .run(evaluation)
            .await
            .unwrap();
            assert!(report.failures.is_empty());
            assert_eq!(report.document.query_count(), 10);
            documents.push(report.document);
        }
        assert_eq!(documents[0], documents[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_strategies_produce_identical_documents() {
        let mut documents = Vec::new();
        for kind in [
            StrategyKind::Synchronous,
            StrategyKind::EvaluationParallel,
            StrategyKind::QueryParallel,
        ] {
            let (evaluation, platform, templates) = fixture();
            let report = evaluator(platform, templates, kind).run(evaluation).await.unwrap();
            assert!(report.failures.is_empty());
            documents.push(serde_json::to_string(&report.document).unwrap());
        }
        assert_eq!(documents[0], documents[1]);
        assert_eq!(documents[0], documents[2]);
    }

    #[tokio::test]
    async fn test_values_and_empty_query_convention() {
        let (evaluation, platform, templates) = fixture();
        let report = evaluator(platform, templates, StrategyKind::Synchronous)
            .run(evaluation)
            .await
            .unwrap();

        let group0 = &report.document.corpora[0].topics[0].query_groups[0];
        let nothing = group0.queries.iter().find(|q| q.name == "nothing").unwrap();
        for (name, metric) in &nothing.metrics {
            for version in VERSIONS {
                let value = &metric.versions[version];
                assert_eq!(value.value, Decimal::ONE, "{} {}", name, version);
                assert_eq!(value.total_hits, Some(0));
            }
        }
        // term0 in v1.0 sees its four judged documents at ranks 1..4
        let term0 = group0.queries.iter().find(|q| q.name == "term0").unwrap();
        assert_eq!(term0.metrics["AP"].versions["v1.0"].value, Decimal::ONE);
        assert_eq!(term0.metrics["R"].versions["v1.0"].value, Decimal::ONE);
        assert!(report.document.metrics.contains_key("MAP"));
        assert!(report.document.metrics.contains_key("GMAP"));
        assert_eq!(report.document.metrics["AP"].versions.len(), VERSIONS.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_query_persisted_exactly_once() {
        for kind in [StrategyKind::EvaluationParallel, StrategyKind::QueryParallel] {
            let (evaluation, platform, templates) = fixture();
            let expected = evaluation.query_count();
            let handler = Arc::new(MemoryPersistenceHandler::new());
            let report = evaluator(platform, templates, kind)
                .with_persistence(handler.clone())
                .run(evaluation)
                .await
                .unwrap();

            let records = handler.records();
            assert_eq!(records.len(), expected);
            assert_eq!(report.persisted, expected);
            let names: HashSet<String> = records.iter().map(|r| r.query.name.clone()).collect();
            assert_eq!(names.len(), expected);
            assert_eq!(handler.document(), Some(report.document.clone()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_version_leaves_gap() {
        let (evaluation, mut platform, templates) = fixture();
        platform.fail_version("v1.1");
        let queries = evaluation.query_count();
        let report = evaluator(platform, templates, StrategyKind::QueryParallel)
            .run(evaluation)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), queries);
        assert!(report.failures.iter().all(|f| f.version == "v1.1"));
        let ap = &report.document.metrics["AP"].versions;
        assert!(ap.contains_key("v1.0"));
        assert!(!ap.contains_key("v1.1"));
        assert!(ap.contains_key("v1.2"));
        let query = &report.document.corpora[0].topics[0].query_groups[0].queries[0];
        assert!(query.failures["v1.1"].contains("unavailable"));
    }

    #[tokio::test]
    async fn test_template_failure_is_fatal() {
        let (mut evaluation, platform, _) = fixture();
        add_query(&mut evaluation, "group1", "late", &[("a", 1)]);
        let empty = InMemoryTemplateResolver::new();
        let handler = Arc::new(MemoryPersistenceHandler::new());
        let result = evaluator(platform, empty, StrategyKind::Synchronous)
            .with_persistence(handler.clone())
            .run(evaluation)
            .await;
        assert!(matches!(result, Err(RankevalError::Template(_))));
        assert!(handler.document().is_none());
    }

    #[tokio::test]
    async fn test_raw_query_used_without_template() {
        let mut evaluation = Evaluation::new("raw", vec!["v1".into()]);
        let ancestry = Ancestry {
            corpus: "c".into(),
            topic: "t".into(),
            query_group: "g".into(),
        };
        let raw = json!({ "placeholders": { "$query": "jazz" } });
        let definition = QueryDefinition {
            raw: raw.clone(),
            ..QueryDefinition::default()
        };
        let judgments: JudgmentSet = [("j1".to_string(), Judgment::new(Decimal::ONE))]
            .into_iter()
            .collect();
        let query = Query::new("jazz", ancestry.clone(), definition, judgments, "id");
        evaluation.group_at(&ancestry).query("jazz", || query);

        let mut platform = InMemorySearchPlatform::new();
        platform.insert_ids("v1", &raw.to_string(), "id", &["j1"]);
        let evaluator = Evaluator::new(
            &SimpleMetricFactory::default(),
            &["PrecisionAtOne".to_string()],
            Arc::new(platform),
            Arc::new(InMemoryTemplateResolver::new()),
        )
        .unwrap();
        let report = evaluator.run(evaluation).await.unwrap();
        assert_eq!(report.document.metrics["P@1"].versions["v1"].value, Decimal::ONE);
    }

    #[test]
    fn test_metric_resolution() {
        let platform: Arc<dyn SearchPlatform> = Arc::new(InMemorySearchPlatform::new());
        let templates: Arc<dyn TemplateResolver> = Arc::new(InMemoryTemplateResolver::new());
        let factory = SimpleMetricFactory::default();

        let ids: Vec<String> = ["AveragePrecision", "PrecisionAtK", "AveragePrecision"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let evaluator =
            Evaluator::new(&factory, &ids, Arc::clone(&platform), Arc::clone(&templates)).unwrap();
        assert_eq!(evaluator.metric_names(), vec!["AP"]);
        assert_eq!(evaluator.instantiation_failures().len(), 1);
        assert_eq!(evaluator.instantiation_failures()[0].metric, "PrecisionAtK");

        let unknown = vec!["Bogus".to_string()];
        let err = Evaluator::new(&factory, &unknown, Arc::clone(&platform), Arc::clone(&templates))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_no_versions_is_config_error() {
        let evaluator = Evaluator::new(
            &SimpleMetricFactory::default(),
            &["AveragePrecision".to_string()],
            Arc::new(InMemorySearchPlatform::new()),
            Arc::new(InMemoryTemplateResolver::new()),
        )
        .unwrap();
        let result = evaluator.run(Evaluation::new("e", Vec::new())).await;
        assert!(matches!(result, Err(RankevalError::Config(_))));
    }
}
