//! Rank-window Precision, Recall and F-measure.

use super::{empty_result_value, ratio, within, Accumulator, JudgedHit, MetricDefinition};
use crate::judgment::JudgmentSet;
use rust_decimal::Decimal;

/// Precision over the first `k` hits (or over every hit when unbounded).
#[derive(Debug, Clone)]
pub struct Precision {
    name: String,
    k: Option<usize>,
}

impl Precision {
    pub fn unbounded() -> Self {
        Self::named("P", None)
    }

    pub fn at(k: usize) -> Self {
        Self::named(format!("P@{}", k), Some(k))
    }

    pub fn named(name: impl Into<String>, k: Option<usize>) -> Self {
        Self {
            name: name.into(),
            k,
        }
    }
}

impl MetricDefinition for Precision {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(PrecisionAccumulator::new(self.k, judgments.len()))
    }
}

/// Recall over the first `k` hits (or over every hit when unbounded).
#[derive(Debug, Clone)]
pub struct Recall {
    name: String,
    k: Option<usize>,
}

impl Recall {
    pub fn unbounded() -> Self {
        Self::named("R", None)
    }

    pub fn at(k: usize) -> Self {
        Self::named(format!("R@{}", k), Some(k))
    }

    pub fn named(name: impl Into<String>, k: Option<usize>) -> Self {
        Self {
            name: name.into(),
            k,
        }
    }
}

impl MetricDefinition for Recall {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(RecallAccumulator::new(self.k, judgments.len()))
    }
}

/// Weighted harmonic mean of Precision and Recall over the same window.
#[derive(Debug, Clone)]
pub struct FMeasure {
    name: String,
    k: Option<usize>,
    beta: Decimal,
}

impl FMeasure {
    /// F-measure over every hit, named `F<beta>` (`F1`, `F0.5`, `F2`).
    pub fn unbounded(beta: Decimal) -> Self {
        let name = format!("F{}", beta.normalize());
        Self::named(name, None, beta)
    }

    pub fn at(k: usize, beta: Decimal) -> Self {
        let name = format!("F{}@{}", beta.normalize(), k);
        Self::named(name, Some(k), beta)
    }

    pub fn named(name: impl Into<String>, k: Option<usize>, beta: Decimal) -> Self {
        Self {
            name: name.into(),
            k,
            beta,
        }
    }
}

impl MetricDefinition for FMeasure {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(FMeasureAccumulator {
            precision: PrecisionAccumulator::new(self.k, judgments.len()),
            recall: RecallAccumulator::new(self.k, judgments.len()),
            beta: self.beta,
        })
    }
}

/// Counts judged hits inside the window.
#[derive(Debug, Clone)]
struct WindowCount {
    k: Option<usize>,
    expected: usize,
    relevant: u64,
    total_hits: u64,
}

impl WindowCount {
    fn new(k: Option<usize>, expected: usize) -> Self {
        Self {
            k,
            expected,
            relevant: 0,
            total_hits: 0,
        }
    }

    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        if within(self.k, rank) && hit.is_relevant() {
            self.relevant += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrecisionAccumulator(WindowCount);

impl PrecisionAccumulator {
    pub fn new(k: Option<usize>, expected: usize) -> Self {
        Self(WindowCount::new(k, expected))
    }
}

impl Accumulator for PrecisionAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        self.0.collect(hit, rank);
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.0.total_hits = total_hits;
    }

    fn value(&self) -> Decimal {
        let count = &self.0;
        if count.total_hits == 0 {
            return empty_result_value(count.expected);
        }
        if count.expected == 0 {
            return Decimal::ZERO;
        }
        let window = count
            .k
            .map_or(count.total_hits, |k| (k as u64).min(count.total_hits));
        ratio(count.relevant, window)
    }
}

#[derive(Debug, Clone)]
pub struct RecallAccumulator(WindowCount);

impl RecallAccumulator {
    pub fn new(k: Option<usize>, expected: usize) -> Self {
        Self(WindowCount::new(k, expected))
    }
}

impl Accumulator for RecallAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        self.0.collect(hit, rank);
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.0.total_hits = total_hits;
    }

    fn value(&self) -> Decimal {
        let count = &self.0;
        if count.total_hits == 0 {
            return empty_result_value(count.expected);
        }
        ratio(count.relevant, count.expected as u64)
    }
}

pub struct FMeasureAccumulator {
    precision: PrecisionAccumulator,
    recall: RecallAccumulator,
    beta: Decimal,
}

impl Accumulator for FMeasureAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        self.precision.collect(hit, rank);
        self.recall.collect(hit, rank);
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.precision.set_total_hits(total_hits);
        self.recall.set_total_hits(total_hits);
    }

    fn value(&self) -> Decimal {
        let p = self.precision.value();
        let r = self.recall.value();
        if p.is_zero() || r.is_zero() {
            return Decimal::ZERO;
        }
        let beta_squared = self.beta * self.beta;
        ((Decimal::ONE + beta_squared) * p * r) / (beta_squared * p + r)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn ids(v: &[String]) -> Vec<&str> {
        v.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_all_relevant_in_first_ranks() {
        // 10 relevant documents ranked 1-10 out of 15 hits
        let relevant = doc_ids("r", 10);
        let judgments = uniform(&ids(&relevant), 1);
        let mut hits = relevant.clone();
        hits.extend(doc_ids("x", 5));

        let p = run(&mut *Precision::unbounded().accumulator(&judgments), &judgments, &ids(&hits), 15);
        let r = run(&mut *Recall::unbounded().accumulator(&judgments), &judgments, &ids(&hits), 15);
        assert_eq!(p, Decimal::from(10) / Decimal::from(15));
        assert_eq!(r, Decimal::ONE);
    }

    #[test]
    fn test_half_of_judgments_found() {
        let relevant = doc_ids("r", 10);
        let judgments = uniform(&ids(&relevant), 1);
        let mut hits: Vec<String> = relevant[..5].to_vec();
        hits.extend(doc_ids("x", 10));

        let p = run(&mut *Precision::unbounded().accumulator(&judgments), &judgments, &ids(&hits), 15);
        let r = run(&mut *Recall::unbounded().accumulator(&judgments), &judgments, &ids(&hits), 15);
        assert_eq!(p, Decimal::from(5) / Decimal::from(15));
        assert_eq!(r, Decimal::new(5, 1));
    }

    #[test]
    fn test_precision_at_k_uses_smaller_of_k_and_total() {
        let judgments = uniform(&["a", "b"], 1);
        let value = run(&mut *Precision::at(10).accumulator(&judgments), &judgments, &["a", "x"], 2);
        assert_eq!(value, Decimal::new(5, 1));

        let value = run(&mut *Precision::at(1).accumulator(&judgments), &judgments, &["x", "a"], 2);
        assert_eq!(value, Decimal::ZERO);
    }

    #[test]
    fn test_hits_beyond_window_ignored() {
        let judgments = uniform(&["a", "b", "c"], 1);
        let value = run(&mut *Recall::at(2).accumulator(&judgments), &judgments, &["x", "a", "b", "c"], 4);
        assert_eq!(value, Decimal::ONE / Decimal::from(3));
    }

    #[test]
    fn test_empty_result_convention() {
        let none = JudgmentSet::default();
        let some = uniform(&["a"], 1);
        for def in [Precision::at(3), Precision::unbounded()] {
            assert_eq!(run(&mut *def.accumulator(&none), &none, &[], 0), Decimal::ONE);
            assert_eq!(run(&mut *def.accumulator(&some), &some, &[], 0), Decimal::ZERO);
            assert_eq!(run(&mut *def.accumulator(&none), &none, &["a"], 1), Decimal::ZERO);
        }
        let recall = Recall::at(3);
        assert_eq!(run(&mut *recall.accumulator(&none), &none, &[], 0), Decimal::ONE);
        assert_eq!(run(&mut *recall.accumulator(&none), &none, &["a"], 1), Decimal::ZERO);
    }

    #[test]
    fn test_f_measure() {
        let judgments = uniform(&["a", "b", "c", "d"], 1);
        // P = 2/4, R = 2/4 -> F1 = 0.5
        let f1 = FMeasure::unbounded(Decimal::ONE);
        assert_eq!(f1.name(), "F1");
        let value = run(&mut *f1.accumulator(&judgments), &judgments, &["a", "x", "b", "y"], 4);
        assert_eq!(value, Decimal::new(5, 1));

        // P = 1/2, R = 1/4: F2 = 5 * 1/8 / (4 * 1/2 + 1/4) = 0.625 / 2.25
        let f2 = FMeasure::unbounded(Decimal::from(2));
        let value = run(&mut *f2.accumulator(&judgments), &judgments, &["a", "x"], 2);
        assert_eq!(value, Decimal::new(625, 3) / Decimal::new(225, 2));

        assert_eq!(FMeasure::unbounded(Decimal::new(5, 1)).name(), "F0.5");
        assert_eq!(FMeasure::at(10, Decimal::ONE).name(), "F1@10");
    }

    #[test]
    fn test_f_measure_zero_component() {
        let judgments = uniform(&["a"], 1);
        let value = run(&mut *FMeasure::unbounded(Decimal::ONE).accumulator(&judgments), &judgments, &["x"], 1);
        assert_eq!(value, Decimal::ZERO);

        let none = JudgmentSet::default();
        let value = run(&mut *FMeasure::unbounded(Decimal::ONE).accumulator(&none), &none, &[], 0);
        assert_eq!(value, Decimal::ONE);
    }
}
