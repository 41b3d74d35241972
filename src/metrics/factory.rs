//! Metric factories: resolve configured metric identifiers into definitions.
//!
//! Identifiers name a metric kind registered in [`MetricRegistry`]. They may be
//! fully qualified (`org.example.metrics.PrecisionAtK`); only the last
//! dot-separated segment selects the kind.

use super::{
    AveragePrecision, ExpectedReciprocalRank, FMeasure, MetricDefinition, Ndcg, Precision, Recall,
    ReciprocalRank,
};
use crate::error::{RankevalError, Result};
use crate::judgment::MAX_GRADE;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Resolves a metric identifier (or alias) into a metric definition.
pub trait MetricFactory: Send + Sync {
    fn create(&self, identifier: &str) -> Result<Arc<dyn MetricDefinition>>;
}

/// Zero-argument constructor.
pub type Build = fn() -> Arc<dyn MetricDefinition>;
/// Constructor from a parameter object (`k`, `maxgrade`, `defaultgrade`, `name`, ...).
pub type Configure = fn(Value) -> Result<Arc<dyn MetricDefinition>>;

/// A registered metric kind and the ways it can be constructed.
#[derive(Clone, Copy)]
pub struct MetricKind {
    pub id: &'static str,
    build: Option<Build>,
    configure: Option<Configure>,
}

impl MetricKind {
    pub const fn simple(id: &'static str, build: Build) -> Self {
        Self {
            id,
            build: Some(build),
            configure: None,
        }
    }

    pub const fn parameterized(id: &'static str, configure: Configure) -> Self {
        Self {
            id,
            build: None,
            configure: Some(configure),
        }
    }
}

/// Registry of metric kinds keyed by their stable identifier
pub struct MetricRegistry {
    kinds: Vec<MetricKind>,
}

impl MetricRegistry {
    /// Create a registry with every built-in metric kind
    pub fn new() -> Self {
        let mut registry = Self { kinds: Vec::new() };

        registry.register(MetricKind::simple("Precision", || shared(Precision::unbounded())));
        registry.register(MetricKind::simple("PrecisionAtOne", || shared(Precision::at(1))));
        registry.register(MetricKind::simple("PrecisionAtTwo", || shared(Precision::at(2))));
        registry.register(MetricKind::simple("PrecisionAtThree", || shared(Precision::at(3))));
        registry.register(MetricKind::simple("PrecisionAtTen", || shared(Precision::at(10))));
        registry.register(MetricKind::simple("Recall", || shared(Recall::unbounded())));
        registry.register(MetricKind::simple("RecallAtOne", || shared(Recall::at(1))));
        registry.register(MetricKind::simple("RecallAtTwo", || shared(Recall::at(2))));
        registry.register(MetricKind::simple("RecallAtThree", || shared(Recall::at(3))));
        registry.register(MetricKind::simple("RecallAtTen", || shared(Recall::at(10))));
        registry.register(MetricKind::simple("F0_5", || {
            shared(FMeasure::unbounded(Decimal::new(5, 1)))
        }));
        registry.register(MetricKind::simple("F1", || shared(FMeasure::unbounded(Decimal::ONE))));
        registry.register(MetricKind::simple("F2", || {
            shared(FMeasure::unbounded(Decimal::from(2)))
        }));
        registry.register(MetricKind::simple("AveragePrecision", || shared(AveragePrecision::new())));
        registry.register(MetricKind::simple("ReciprocalRank", || shared(ReciprocalRank::at(10))));
        registry.register(MetricKind::simple("NDCG", || shared(Ndcg::unbounded())));
        registry.register(MetricKind::simple("NDCGAtTen", || shared(Ndcg::at(10))));
        registry.register(MetricKind::simple("ERRAtTen", || shared(ExpectedReciprocalRank::at(10))));

        registry.register(MetricKind::parameterized("PrecisionAtK", configure_precision));
        registry.register(MetricKind::parameterized("RecallAtK", configure_recall));
        registry.register(MetricKind::parameterized("FMeasureAtK", configure_f_measure));
        registry.register(MetricKind::parameterized("ReciprocalRankAtK", configure_reciprocal_rank));
        registry.register(MetricKind::parameterized("NDCGAtK", configure_ndcg));
        registry.register(MetricKind::parameterized("ERRAtK", configure_err));

        registry
    }

    /// Register a metric kind; a later registration shadows an earlier one with the same id
    pub fn register(&mut self, kind: MetricKind) {
        self.kinds.retain(|k| k.id != kind.id);
        self.kinds.push(kind);
    }

    /// Find the kind an identifier refers to
    pub fn find(&self, identifier: &str) -> Option<&MetricKind> {
        let id = kind_id(identifier);
        self.kinds.iter().find(|k| k.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().map(|k| k.id)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_id(identifier: &str) -> &str {
    let trimmed = identifier.trim();
    trimmed.rsplit('.').next().unwrap_or(trimmed)
}

fn shared<M: MetricDefinition + 'static>(metric: M) -> Arc<dyn MetricDefinition> {
    Arc::new(metric)
}

/// Instantiates metrics by identifier through their zero-argument constructor.
pub struct SimpleMetricFactory {
    registry: Arc<MetricRegistry>,
    resolved: Mutex<HashMap<String, Build>>,
}

impl SimpleMetricFactory {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    fn resolve(&self, identifier: &str) -> Result<Build> {
        if let Some(build) = self.cached(identifier) {
            return Ok(build);
        }
        let kind = self.registry.find(identifier).ok_or_else(|| {
            RankevalError::Config(format!("Unknown metric: {}", identifier))
        })?;
        let build = kind.build.ok_or_else(|| {
            RankevalError::Instantiation(format!(
                "Metric {} requires parameters; configure it as a parameterized metric",
                identifier
            ))
        })?;
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(identifier.to_string(), build);
        }
        Ok(build)
    }

    fn cached(&self, identifier: &str) -> Option<Build> {
        self.resolved
            .lock()
            .ok()
            .and_then(|resolved| resolved.get(identifier).copied())
    }
}

impl Default for SimpleMetricFactory {
    fn default() -> Self {
        Self::new(Arc::new(MetricRegistry::new()))
    }
}

impl MetricFactory for SimpleMetricFactory {
    fn create(&self, identifier: &str) -> Result<Arc<dyn MetricDefinition>> {
        let build = self.resolve(identifier)?;
        Ok(build())
    }
}

/// Configured alias: the kind it points to and the remaining parameters.
#[derive(Debug, Clone)]
struct AliasEntry {
    class: String,
    parameters: Map<String, Value>,
}

/// Adds alias -> `{ class, ...params }` entries on top of a simple factory.
pub struct ParameterizedMetricFactory {
    simple: SimpleMetricFactory,
    aliases: HashMap<String, AliasEntry>,
}

impl ParameterizedMetricFactory {
    /// Fails when any entry is not an object with a string `class` field.
    pub fn new(simple: SimpleMetricFactory, parameters: BTreeMap<String, Value>) -> Result<Self> {
        let mut aliases = HashMap::with_capacity(parameters.len());
        for (alias, value) in parameters {
            let Value::Object(mut object) = value else {
                return Err(RankevalError::Config(format!(
                    "Parameterized metric '{}' must be an object",
                    alias
                )));
            };
            let class = match object.remove("class") {
                Some(Value::String(class)) => class,
                _ => {
                    return Err(RankevalError::Config(format!(
                        "Parameterized metric '{}' has no class",
                        alias
                    )))
                }
            };
            aliases.insert(
                alias,
                AliasEntry {
                    class,
                    parameters: object,
                },
            );
        }
        Ok(Self { simple, aliases })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }
}

impl MetricFactory for ParameterizedMetricFactory {
    fn create(&self, identifier: &str) -> Result<Arc<dyn MetricDefinition>> {
        let Some(entry) = self.aliases.get(identifier) else {
            return self.simple.create(identifier);
        };
        let kind = self.simple.registry().find(&entry.class).ok_or_else(|| {
            RankevalError::Config(format!(
                "Unknown metric class {} for {}",
                entry.class, identifier
            ))
        })?;
        match kind.configure {
            Some(configure) => configure(Value::Object(entry.parameters.clone())),
            // Zero-argument kinds may be aliased as long as no parameters are given
            None if entry.parameters.is_empty() => self.simple.create(&entry.class),
            None => Err(RankevalError::Instantiation(format!(
                "Metric {} does not accept parameters ({})",
                entry.class, identifier
            ))),
        }
    }
}

/// Build the factory matching a configuration: parameterized when any
/// parameterized entry is present, simple otherwise.
pub fn factory_for(parameters: BTreeMap<String, Value>) -> Result<Box<dyn MetricFactory>> {
    let simple = SimpleMetricFactory::default();
    if parameters.is_empty() {
        Ok(Box::new(simple))
    } else {
        Ok(Box::new(ParameterizedMetricFactory::new(simple, parameters)?))
    }
}

fn decode<T: DeserializeOwned>(parameters: Value) -> Result<T> {
    serde_json::from_value(parameters)
        .map_err(|e| RankevalError::Instantiation(format!("Invalid metric parameters: {}", e)))
}

fn positive(k: usize) -> Result<usize> {
    if k == 0 {
        return Err(RankevalError::Instantiation(
            "Metric window k must be greater than 0".to_string(),
        ));
    }
    Ok(k)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowParameters {
    k: usize,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FMeasureParameters {
    k: usize,
    #[serde(default = "default_beta")]
    beta: Decimal,
    #[serde(default)]
    name: Option<String>,
}

fn default_beta() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GradedParameters {
    k: usize,
    #[serde(default = "default_max_grade")]
    maxgrade: Decimal,
    #[serde(default)]
    defaultgrade: Decimal,
    #[serde(default)]
    name: Option<String>,
}

fn default_max_grade() -> Decimal {
    Decimal::from(super::err::DEFAULT_MAX_GRADE)
}

fn configure_precision(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: WindowParameters = decode(parameters)?;
    let k = positive(p.k)?;
    let name = p.name.unwrap_or_else(|| format!("Precision@{}", k));
    Ok(shared(Precision::named(name, Some(k))))
}

fn configure_recall(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: WindowParameters = decode(parameters)?;
    let k = positive(p.k)?;
    let name = p.name.unwrap_or_else(|| format!("Recall@{}", k));
    Ok(shared(Recall::named(name, Some(k))))
}

fn configure_f_measure(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: FMeasureParameters = decode(parameters)?;
    let k = positive(p.k)?;
    if p.beta <= Decimal::ZERO {
        return Err(RankevalError::Instantiation(
            "F-measure beta must be greater than 0".to_string(),
        ));
    }
    let metric = match p.name {
        Some(name) => FMeasure::named(name, Some(k), p.beta),
        None => FMeasure::at(k, p.beta),
    };
    Ok(shared(metric))
}

fn configure_reciprocal_rank(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: WindowParameters = decode(parameters)?;
    let k = positive(p.k)?;
    let name = p.name.unwrap_or_else(|| format!("RR@{}", k));
    Ok(shared(ReciprocalRank::named(name, k)))
}

fn configure_ndcg(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: WindowParameters = decode(parameters)?;
    let k = positive(p.k)?;
    let name = p.name.unwrap_or_else(|| format!("NDCG@{}", k));
    Ok(shared(Ndcg::named(name, Some(k))))
}

fn configure_err(parameters: Value) -> Result<Arc<dyn MetricDefinition>> {
    let p: GradedParameters = decode(parameters)?;
    let k = positive(p.k)?;
    let limit = Decimal::from(MAX_GRADE);
    if p.maxgrade < Decimal::ZERO || p.maxgrade > limit {
        return Err(RankevalError::Instantiation(format!(
            "ERR maxgrade {} is outside [0, {}]",
            p.maxgrade, MAX_GRADE
        )));
    }
    if p.defaultgrade.abs() > limit {
        return Err(RankevalError::Instantiation(format!(
            "ERR defaultgrade {} is outside [-{}, {}]",
            p.defaultgrade, MAX_GRADE, MAX_GRADE
        )));
    }
    let name = p.name.unwrap_or_else(|| format!("ERR@{}", k));
    Ok(shared(ExpectedReciprocalRank::with_grades(
        name,
        k,
        p.maxgrade,
        p.defaultgrade,
    )))
}
