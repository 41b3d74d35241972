//! Versioned ranking metrics.
//!
//! A [`MetricDefinition`] is the stateless, configured shape of a metric
//! (`P@10`, `NDCG@10`, ...). Bound to one query it becomes a [`Metric`], which
//! owns one [`Accumulator`] per version. Accumulators consume the ranked hits of
//! their version in ascending rank order starting at 1, then the total hit count.
//!
//! Every metric follows the same empty-result convention: when the search
//! returned nothing, the value is 1 if nothing was expected and 0 otherwise.
//!
//! Accumulators work at full decimal precision. Values are rounded to
//! [`VALUE_SCALE`] places once, when a version is finalized or an ancestor
//! aggregates.

pub mod average_precision;
pub mod compound;
pub mod err;
pub mod factory;
pub mod ndcg;
pub mod precision;
pub mod reciprocal_rank;

pub use average_precision::AveragePrecision;
pub use compound::{CompoundMetric, GeometricMeanAveragePrecision, MeanAveragePrecision};
pub use err::ExpectedReciprocalRank;
pub use factory::{MetricFactory, ParameterizedMetricFactory, SimpleMetricFactory};
pub use ndcg::Ndcg;
pub use precision::{FMeasure, Precision, Recall};
pub use reciprocal_rank::ReciprocalRank;

use crate::judgment::{Judgment, JudgmentSet};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Decimal places kept in finalized and aggregated values.
pub const VALUE_SCALE: u32 = 4;

/// Round half away from zero to [`VALUE_SCALE`] places.
pub fn round_value(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(VALUE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A returned hit with its judgment (if any) already looked up.
#[derive(Debug, Clone, Copy)]
pub struct JudgedHit<'a> {
    pub doc_id: Option<&'a str>,
    pub judgment: Option<&'a Judgment>,
}

impl<'a> JudgedHit<'a> {
    pub fn new(doc_id: Option<&'a str>, judgment: Option<&'a Judgment>) -> Self {
        Self { doc_id, judgment }
    }

    pub fn judged(doc_id: &'a str, judgments: &'a JudgmentSet) -> Self {
        Self::new(Some(doc_id), judgments.get(doc_id))
    }

    /// A hit is relevant when it appears in the query's judgment set.
    pub fn is_relevant(&self) -> bool {
        self.judgment.is_some()
    }
}

/// Running state of one metric for one version.
pub trait Accumulator: Send {
    /// Consume the hit at `rank` (1-based). Ranks outside the metric window are ignored.
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize);

    /// Record the total number of hits the backend reported.
    fn set_total_hits(&mut self, total_hits: u64);

    /// Current value; valid before, during and after the hit stream.
    fn value(&self) -> Decimal;
}

/// A configured metric kind, able to create accumulators for a judgment set.
pub trait MetricDefinition: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator>;
}

/// Finalized value of a metric for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionValue {
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
    #[serde(rename = "totalHits", skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u64>,
}

impl VersionValue {
    pub fn new(value: Decimal, total_hits: Option<u64>) -> Self {
        Self { value, total_hits }
    }
}

/// Accumulator for one version plus the total hit count it was given.
pub struct VersionSlot {
    accumulator: Box<dyn Accumulator>,
    total_hits: Option<u64>,
}

impl VersionSlot {
    fn new(accumulator: Box<dyn Accumulator>) -> Self {
        Self {
            accumulator,
            total_hits: None,
        }
    }

    pub fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        self.accumulator.collect(hit, rank);
    }

    pub fn set_total_hits(&mut self, total_hits: u64) {
        self.total_hits = Some(total_hits);
        self.accumulator.set_total_hits(total_hits);
    }

    pub fn value(&self) -> Decimal {
        self.accumulator.value()
    }

    fn finish(self) -> VersionValue {
        VersionValue::new(round_value(self.accumulator.value()), self.total_hits)
    }
}

/// A metric bound to one query: one slot per version.
///
/// Slots are keyed by version and disjoint, so a slot can be taken out and
/// filled by whichever worker runs that version. Once finalized, a version's
/// value is frozen and its accumulator is dropped.
pub struct Metric {
    definition: Arc<dyn MetricDefinition>,
    pending: BTreeMap<String, VersionSlot>,
    values: BTreeMap<String, VersionValue>,
}

impl Metric {
    pub fn bind(
        definition: Arc<dyn MetricDefinition>,
        judgments: &JudgmentSet,
        versions: &[String],
    ) -> Self {
        let pending = versions
            .iter()
            .map(|version| {
                (
                    version.clone(),
                    VersionSlot::new(definition.accumulator(judgments)),
                )
            })
            .collect();
        Self {
            definition,
            pending,
            values: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Take the slot of `version` out for exclusive filling.
    pub fn take_slot(&mut self, version: &str) -> Option<VersionSlot> {
        self.pending.remove(version)
    }

    pub fn restore_slot(&mut self, version: String, slot: VersionSlot) {
        if self.values.contains_key(&version) {
            log::warn!(
                "Ignoring late data for finalized version {} of {}",
                version,
                self.name()
            );
            return;
        }
        self.pending.insert(version, slot);
    }

    /// Value for `version`: finalized if available, otherwise the running value.
    pub fn value(&self, version: &str) -> Option<Decimal> {
        self.values
            .get(version)
            .map(|v| v.value)
            .or_else(|| self.pending.get(version).map(VersionSlot::value))
    }

    /// Freeze every slot that is still held. Versions whose slot was never
    /// returned stay absent.
    pub fn finalize(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (version, slot) in pending {
            self.values.insert(version, slot.finish());
        }
    }

    pub fn values(&self) -> &BTreeMap<String, VersionValue> {
        &self.values
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name())
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("values", &self.values)
            .finish()
    }
}

/// Value of any metric when the search returned no hits at all.
pub(crate) fn empty_result_value(expected: usize) -> Decimal {
    if expected == 0 {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

/// `numerator / denominator`, zero when the denominator is zero.
pub(crate) fn ratio(numerator: u64, denominator: u64) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(numerator) / Decimal::from(denominator)
}

/// Whether `rank` falls inside an optional `@k` window.
pub(crate) fn within(k: Option<usize>, rank: usize) -> bool {
    rank >= 1 && k.map_or(true, |k| rank <= k)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_metric_slots_are_version_keyed() {
        let judgments = uniform(&["a", "b"], 1);
        let versions = vec!["v1".to_string(), "v2".to_string()];
        let mut metric = Metric::bind(Arc::new(Precision::at(10)), &judgments, &versions);
        assert_eq!(metric.name(), "P@10");

        let mut slot = metric.take_slot("v1").unwrap();
        assert!(metric.take_slot("v1").is_none());
        slot.collect(&JudgedHit::judged("a", &judgments), 1);
        slot.set_total_hits(1);
        metric.restore_slot("v1".to_string(), slot);

        assert_eq!(metric.value("v1"), Some(Decimal::ONE));
        metric.finalize();
        assert_eq!(
            metric.values().get("v1"),
            Some(&VersionValue::new(Decimal::ONE, Some(1)))
        );
        // v2 was never filled: it still finalizes (no hits, two expected -> 0)
        assert_eq!(metric.values().get("v2").map(|v| v.value), Some(Decimal::ZERO));
    }

    #[test]
    fn test_missing_slot_leaves_gap() {
        let judgments = uniform(&["a"], 1);
        let versions = vec!["v1".to_string(), "v2".to_string()];
        let mut metric = Metric::bind(Arc::new(Recall::unbounded()), &judgments, &versions);
        let _lost = metric.take_slot("v2");
        metric.finalize();
        assert!(metric.values().contains_key("v1"));
        assert!(!metric.values().contains_key("v2"));
        assert_eq!(metric.value("v2"), None);
    }

    #[test]
    fn test_finalized_values_are_rounded() {
        let judgments = uniform(&["a", "b", "c"], 1);
        let versions = vec!["v1".to_string()];
        let mut metric = Metric::bind(Arc::new(Precision::at(10)), &judgments, &versions);
        let mut slot = metric.take_slot("v1").unwrap();
        for (rank, id) in ["a", "b", "x"].iter().enumerate() {
            slot.collect(&JudgedHit::judged(id, &judgments), rank + 1);
        }
        slot.set_total_hits(3);
        // running value keeps full precision
        assert_eq!(slot.value(), Decimal::from(2) / Decimal::from(3));
        metric.restore_slot("v1".to_string(), slot);
        metric.finalize();

        let value = &metric.values()["v1"];
        assert_eq!(value.value, Decimal::new(6667, 4));
        assert_eq!(
            serde_json::to_string(value).unwrap(),
            r#"{"value":"0.6667","totalHits":3}"#
        );
    }

    #[test]
    fn test_round_value() {
        assert_eq!(round_value(Decimal::new(33335, 5)).to_string(), "0.3334");
        assert_eq!(round_value(Decimal::new(-33335, 5)).to_string(), "-0.3334");
        assert_eq!(round_value(Decimal::new(5, 1)).to_string(), "0.5");
        assert_eq!(round_value(Decimal::ONE).to_string(), "1");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(empty_result_value(0), Decimal::ONE);
        assert_eq!(empty_result_value(3), Decimal::ZERO);
        assert_eq!(ratio(1, 4), Decimal::new(25, 2));
        assert_eq!(ratio(1, 0), Decimal::ZERO);
        assert!(within(None, 500));
        assert!(within(Some(10), 10));
        assert!(!within(Some(10), 11));
        assert!(!within(Some(10), 0));
    }
}
