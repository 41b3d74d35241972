//! Compound metrics derived from other metrics' finalized values.
//!
//! Compound metrics are not bound to a query. They are built while an ancestor
//! node aggregates, fed the per-version values of the metrics their predicate
//! selects, and thrown away afterwards.

use super::average_precision::AP_NAME;
use super::{round_value, VersionValue};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub trait CompoundMetric {
    fn name(&self) -> &str;

    /// Feed the values of metric `metric_name` if this compound selects it.
    fn collect(&mut self, metric_name: &str, values: &BTreeMap<String, VersionValue>);

    /// Derived value for `version`; 0 when nothing was collected.
    fn value(&self, version: &str) -> Decimal;

    /// Derived value for every version that received at least one input.
    fn versions(&self) -> BTreeMap<String, VersionValue> {
        self.collected_versions()
            .into_iter()
            .map(|version| {
                let value = round_value(self.value(&version));
                (version, VersionValue::new(value, None))
            })
            .collect()
    }

    fn collected_versions(&self) -> Vec<String>;
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Values gathered per version from the metrics a predicate accepts.
struct Selection {
    name: String,
    predicate: Predicate,
    values: BTreeMap<String, Vec<Decimal>>,
}

impl Selection {
    fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
            values: BTreeMap::new(),
        }
    }

    fn collect(&mut self, metric_name: &str, values: &BTreeMap<String, VersionValue>) {
        if !(self.predicate)(metric_name) {
            return;
        }
        for (version, value) in values {
            self.values
                .entry(version.clone())
                .or_default()
                .push(value.value);
        }
    }

    fn get(&self, version: &str) -> &[Decimal] {
        self.values.get(version).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Arithmetic mean of the selected values (MAP over `AP` by default).
pub struct MeanAveragePrecision(Selection);

impl MeanAveragePrecision {
    pub fn new() -> Self {
        Self::selecting("MAP", Box::new(|name| name == AP_NAME))
    }

    pub fn selecting(name: impl Into<String>, predicate: Predicate) -> Self {
        Self(Selection::new(name, predicate))
    }
}

impl Default for MeanAveragePrecision {
    fn default() -> Self {
        Self::new()
    }
}

impl CompoundMetric for MeanAveragePrecision {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn collect(&mut self, metric_name: &str, values: &BTreeMap<String, VersionValue>) {
        self.0.collect(metric_name, values);
    }

    fn value(&self, version: &str) -> Decimal {
        mean(self.0.get(version))
    }

    fn collected_versions(&self) -> Vec<String> {
        self.0.values.keys().cloned().collect()
    }
}

/// Geometric mean of the selected values (GMAP over `AP` by default).
pub struct GeometricMeanAveragePrecision(Selection);

impl GeometricMeanAveragePrecision {
    pub fn new() -> Self {
        Self::selecting("GMAP", Box::new(|name| name == AP_NAME))
    }

    pub fn selecting(name: impl Into<String>, predicate: Predicate) -> Self {
        Self(Selection::new(name, predicate))
    }
}

impl Default for GeometricMeanAveragePrecision {
    fn default() -> Self {
        Self::new()
    }
}

impl CompoundMetric for GeometricMeanAveragePrecision {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn collect(&mut self, metric_name: &str, values: &BTreeMap<String, VersionValue>) {
        self.0.collect(metric_name, values);
    }

    fn value(&self, version: &str) -> Decimal {
        geometric_mean(self.0.get(version))
    }

    fn collected_versions(&self) -> Vec<String> {
        self.0.values.keys().cloned().collect()
    }
}

/// Fresh set of the compound metrics every ancestor node derives.
pub fn ancestor_compounds() -> Vec<Box<dyn CompoundMetric>> {
    vec![
        Box::new(MeanAveragePrecision::new()),
        Box::new(GeometricMeanAveragePrecision::new()),
    ]
}

/// Names reserved for compound metrics.
pub fn is_compound(name: &str) -> bool {
    matches!(name, "MAP" | "GMAP")
}

pub(crate) fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

/// n-th root of the product, computed in log space so long inputs do not
/// underflow the decimal range.
pub(crate) fn geometric_mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() || values.iter().any(|v| *v <= Decimal::ZERO) {
        return Decimal::ZERO;
    }
    let mut log_sum = 0.0_f64;
    for value in values {
        match value.to_f64() {
            Some(v) => log_sum += v.ln(),
            None => return Decimal::ZERO,
        }
    }
    let root = (log_sum / values.len() as f64).exp();
    Decimal::from_f64(root).unwrap_or(Decimal::ZERO)
}
