//! Average Precision (AP).

use super::{empty_result_value, ratio, Accumulator, JudgedHit, MetricDefinition};
use crate::judgment::JudgmentSet;
use rust_decimal::Decimal;

/// Name used by compound metrics to select AP values.
pub const AP_NAME: &str = "AP";

#[derive(Debug, Clone)]
pub struct AveragePrecision {
    name: String,
}

impl AveragePrecision {
    pub fn new() -> Self {
        Self {
            name: AP_NAME.to_string(),
        }
    }
}

impl Default for AveragePrecision {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricDefinition for AveragePrecision {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(AveragePrecisionAccumulator::new(judgments.len()))
    }
}

/// Sums precision times the recall gained at every relevant hit.
#[derive(Debug, Clone)]
pub struct AveragePrecisionAccumulator {
    expected: usize,
    total_hits: u64,
    relevant: u64,
    last_recall: Decimal,
    value: Decimal,
}

impl AveragePrecisionAccumulator {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            total_hits: 0,
            relevant: 0,
            last_recall: Decimal::ZERO,
            value: Decimal::ZERO,
        }
    }
}

impl Accumulator for AveragePrecisionAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        if rank == 0 || !hit.is_relevant() || self.expected == 0 {
            return;
        }
        self.relevant += 1;
        let precision = ratio(self.relevant, rank as u64);
        let recall = ratio(self.relevant, self.expected as u64);
        self.value += precision * (recall - self.last_recall);
        self.last_recall = recall;
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.total_hits = total_hits;
    }

    fn value(&self) -> Decimal {
        if self.total_hits == 0 {
            return empty_result_value(self.expected);
        }
        if self.expected == 0 {
            return Decimal::ZERO;
        }
        self.value
    }
}
