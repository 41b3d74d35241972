//! Reciprocal Rank of the best judged hit.

use super::{empty_result_value, ratio, within, Accumulator, JudgedHit, MetricDefinition};
use crate::judgment::JudgmentSet;
use rust_decimal::Decimal;

/// `1/rank` of the judged hit with the highest gain inside the window.
///
/// Unlike the textbook definition this does not stop at the first judged hit:
/// a later hit with a strictly higher gain takes over.
#[derive(Debug, Clone)]
pub struct ReciprocalRank {
    name: String,
    k: usize,
}

impl ReciprocalRank {
    pub fn at(k: usize) -> Self {
        Self::named(format!("RR@{}", k), k)
    }

    pub fn named(name: impl Into<String>, k: usize) -> Self {
        Self {
            name: name.into(),
            k,
        }
    }
}

impl Default for ReciprocalRank {
    fn default() -> Self {
        Self::at(10)
    }
}

impl MetricDefinition for ReciprocalRank {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(ReciprocalRankAccumulator {
            k: self.k,
            expected: judgments.len(),
            total_hits: 0,
            best: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReciprocalRankAccumulator {
    k: usize,
    expected: usize,
    total_hits: u64,
    /// (gain, rank) of the best hit so far
    best: Option<(Decimal, usize)>,
}

impl Accumulator for ReciprocalRankAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        if !within(Some(self.k), rank) {
            return;
        }
        let Some(judgment) = hit.judgment else {
            return;
        };
        let gain = judgment.gain();
        match self.best {
            Some((best_gain, _)) if gain <= best_gain => {}
            _ => self.best = Some((gain, rank)),
        }
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.total_hits = total_hits;
    }

    fn value(&self) -> Decimal {
        if self.total_hits == 0 {
            return empty_result_value(self.expected);
        }
        match self.best {
            Some((_, rank)) => ratio(1, rank as u64),
            None => Decimal::ZERO,
        }
    }
}
