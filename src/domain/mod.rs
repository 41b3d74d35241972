//! The evaluation tree: Evaluation -> Corpus -> Topic -> QueryGroup -> Query.
//!
//! Ownership runs strictly parent to child. Queries remember the names of the
//! nodes they belong to ([`Ancestry`]) so they can be detached for execution and
//! attached back afterwards. Ancestor metrics are never stored: they are folded
//! from the finalized query values whenever a document is built.

pub mod document;
pub mod query;

pub use document::{
    CorpusDocument, EvaluationDocument, MetricDocument, MetricsMap, QueryDocument,
    QueryGroupDocument, QueryRecord, TopicDocument,
};
pub use query::{Ancestry, Query, QueryDefinition, QueryState, VersionRun};

use crate::metrics::compound::{ancestor_compounds, is_compound, mean};
use crate::metrics::{round_value, VersionValue};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub trait Named {
    fn name(&self) -> &str;
}

/// Return the child called `name`, appending a new one from `create` if absent.
/// Children keep first-seen order.
pub fn find_or_create<'a, T: Named>(
    children: &'a mut Vec<T>,
    name: &str,
    create: impl FnOnce() -> T,
) -> &'a mut T {
    let index = match children.iter().position(|child| child.name() == name) {
        Some(index) => index,
        None => {
            children.push(create());
            children.len() - 1
        }
    };
    &mut children[index]
}

#[derive(Debug)]
pub struct Evaluation {
    name: String,
    versions: Vec<String>,
    corpora: Vec<Corpus>,
}

#[derive(Debug)]
pub struct Corpus {
    name: String,
    topics: Vec<Topic>,
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    query_groups: Vec<QueryGroup>,
}

#[derive(Debug)]
pub struct QueryGroup {
    name: String,
    queries: Vec<Query>,
}

impl Evaluation {
    pub fn new(name: impl Into<String>, versions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            versions,
            corpora: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn set_versions(&mut self, versions: Vec<String>) {
        self.versions = versions;
    }

    pub fn corpora(&self) -> &[Corpus] {
        &self.corpora
    }

    pub fn corpus(&mut self, name: &str) -> &mut Corpus {
        find_or_create(&mut self.corpora, name, || Corpus::new(name))
    }

    /// Create the path named by `ancestry` if needed and return its group.
    pub fn group_at(&mut self, ancestry: &Ancestry) -> &mut QueryGroup {
        self.corpus(&ancestry.corpus)
            .topic(&ancestry.topic)
            .query_group(&ancestry.query_group)
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.corpora.iter().flat_map(Corpus::queries)
    }

    pub fn query_count(&self) -> usize {
        self.queries().count()
    }

    /// Move every query out of the tree, in tree order. Empty nodes stay.
    pub fn detach_queries(&mut self) -> Vec<Query> {
        let mut detached = Vec::new();
        for corpus in &mut self.corpora {
            for topic in &mut corpus.topics {
                for group in &mut topic.query_groups {
                    detached.append(&mut group.queries);
                }
            }
        }
        detached
    }

    /// Put a query back under the nodes named by its ancestry.
    pub fn attach_query(&mut self, query: Query) {
        let group = self.group_at(&query.ancestry().clone());
        group.queries.push(query);
    }

    pub fn metrics(&self) -> MetricsMap {
        self.to_document().metrics
    }

    /// Builds the whole tree bottom-up; every node is aggregated exactly once.
    pub fn to_document(&self) -> EvaluationDocument {
        let corpora: Vec<CorpusDocument> = self.corpora.iter().map(Corpus::to_document).collect();
        EvaluationDocument {
            name: self.name.clone(),
            versions: self.versions.clone(),
            metrics: aggregate(corpora.iter().map(|c| &c.metrics), self.queries()),
            corpora,
        }
    }
}

impl Corpus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: Vec::new(),
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&mut self, name: &str) -> &mut Topic {
        find_or_create(&mut self.topics, name, || Topic::new(name))
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.topics.iter().flat_map(Topic::queries)
    }

    pub fn metrics(&self) -> MetricsMap {
        self.to_document().metrics
    }

    pub fn to_document(&self) -> CorpusDocument {
        let topics: Vec<TopicDocument> = self.topics.iter().map(Topic::to_document).collect();
        CorpusDocument {
            name: self.name.clone(),
            metrics: aggregate(topics.iter().map(|t| &t.metrics), self.queries()),
            topics,
        }
    }
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_groups: Vec::new(),
        }
    }

    pub fn query_groups(&self) -> &[QueryGroup] {
        &self.query_groups
    }

    pub fn query_group(&mut self, name: &str) -> &mut QueryGroup {
        find_or_create(&mut self.query_groups, name, || QueryGroup::new(name))
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.query_groups.iter().flat_map(|g| g.queries.iter())
    }

    pub fn metrics(&self) -> MetricsMap {
        self.to_document().metrics
    }

    pub fn to_document(&self) -> TopicDocument {
        let query_groups: Vec<QueryGroupDocument> = self
            .query_groups
            .iter()
            .map(QueryGroup::to_document)
            .collect();
        TopicDocument {
            name: self.name.clone(),
            metrics: aggregate(query_groups.iter().map(|g| &g.metrics), self.queries()),
            query_groups,
        }
    }
}

impl QueryGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queries: Vec::new(),
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Find the query called `name` or create it with `create`.
    pub fn query(&mut self, name: &str, create: impl FnOnce() -> Query) -> &mut Query {
        find_or_create(&mut self.queries, name, create)
    }

    pub fn metrics(&self) -> MetricsMap {
        self.to_document().metrics
    }

    pub fn to_document(&self) -> QueryGroupDocument {
        let queries: Vec<QueryDocument> = self.queries.iter().map(Query::to_document).collect();
        QueryGroupDocument {
            name: self.name.clone(),
            metrics: aggregate(queries.iter().map(|q| &q.metrics), self.queries.iter()),
            queries,
        }
    }
}

macro_rules! named {
    ($($node:ty),*) => {
        $(
            impl $node {
                pub fn name(&self) -> &str {
                    &self.name
                }
            }

            impl Named for $node {
                fn name(&self) -> &str {
                    &self.name
                }
            }
        )*
    };
}

named!(Corpus, Topic, QueryGroup);

/// Ancestor metrics: per metric name and version, the mean of the children
/// that have a value, plus the compound metrics over every descendant query.
fn aggregate<'a, 'q>(
    children: impl Iterator<Item = &'a MetricsMap>,
    queries: impl Iterator<Item = &'q Query>,
) -> MetricsMap {
    let mut collected: BTreeMap<&str, BTreeMap<&str, Vec<Decimal>>> = BTreeMap::new();
    for child in children {
        for (name, metric) in child {
            if is_compound(name) {
                continue;
            }
            let per_version = collected.entry(name.as_str()).or_default();
            for (version, value) in &metric.versions {
                per_version
                    .entry(version.as_str())
                    .or_default()
                    .push(value.value);
            }
        }
    }

    let mut out: MetricsMap = collected
        .into_iter()
        .map(|(name, per_version)| {
            let versions = per_version
                .into_iter()
                .map(|(version, values)| {
                    (version.to_string(), VersionValue::new(round_value(mean(&values)), None))
                })
                .collect();
            (name.to_string(), MetricDocument { versions })
        })
        .collect();

    let mut compounds = ancestor_compounds();
    for query in queries {
        for metric in query.metrics() {
            for compound in compounds.iter_mut() {
                compound.collect(metric.name(), metric.values());
            }
        }
    }
    for compound in compounds {
        let versions = compound.versions();
        if !versions.is_empty() {
            out.insert(compound.name().to_string(), MetricDocument { versions });
        }
    }
    out
}
