//! Normalized Discounted Cumulative Gain.

use super::{empty_result_value, within, Accumulator, JudgedHit, MetricDefinition};
use crate::judgment::JudgmentSet;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

/// Decimal digits kept (rounded down) in reported NDCG values.
pub const NDCG_SCALE: u32 = 2;

/// NDCG over the first `k` hits, or over every hit when unbounded.
#[derive(Debug, Clone)]
pub struct Ndcg {
    name: String,
    k: Option<usize>,
}

impl Ndcg {
    pub fn unbounded() -> Self {
        Self::named("NDCG", None)
    }

    pub fn at(k: usize) -> Self {
        Self::named(format!("NDCG@{}", k), Some(k))
    }

    pub fn named(name: impl Into<String>, k: Option<usize>) -> Self {
        Self {
            name: name.into(),
            k,
        }
    }
}

impl MetricDefinition for Ndcg {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(NdcgAccumulator {
            k: self.k,
            expected: judgments.len(),
            total_hits: 0,
            dcg: Decimal::ZERO,
            ideal_dcg: ideal_dcg(judgments, self.k),
        })
    }
}

/// `log2(rank + 1)`; rank 1 is undiscounted.
fn discount(rank: usize) -> Decimal {
    if rank <= 1 {
        return Decimal::ONE;
    }
    Decimal::from(rank as u64 + 1).ln() / Decimal::from(2).ln()
}

/// DCG of the best possible ranking: judgment gains laid out from rank 1 in
/// descending order, cut at `min(k, |judgments|)` positions.
pub fn ideal_dcg(judgments: &JudgmentSet, k: Option<usize>) -> Decimal {
    let positions = k.map_or(judgments.len(), |k| k.min(judgments.len()));
    let mut rank = 1;
    let mut total = Decimal::ZERO;
    for (gain, count) in judgments.gains_descending() {
        for _ in 0..count {
            if rank > positions {
                return total;
            }
            total += gain / discount(rank);
            rank += 1;
        }
    }
    total
}

#[derive(Debug, Clone)]
pub struct NdcgAccumulator {
    k: Option<usize>,
    expected: usize,
    total_hits: u64,
    dcg: Decimal,
    ideal_dcg: Decimal,
}

impl NdcgAccumulator {
    pub fn dcg(&self) -> Decimal {
        self.dcg
    }

    pub fn ideal_dcg(&self) -> Decimal {
        self.ideal_dcg
    }
}

impl Accumulator for NdcgAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        if !within(self.k, rank) {
            return;
        }
        if let Some(judgment) = hit.judgment {
            self.dcg += judgment.gain() / discount(rank);
        }
    }

    fn set_total_hits(&mut self, total_hits: u64) {
        self.total_hits = total_hits;
    }

    fn value(&self) -> Decimal {
        if self.total_hits == 0 {
            return empty_result_value(self.expected);
        }
        if self.ideal_dcg.is_zero() {
            return Decimal::ZERO;
        }
        (self.dcg / self.ideal_dcg)
            .min(Decimal::ONE)
            .round_dp_with_strategy(NDCG_SCALE, RoundingStrategy::ToZero)
    }
}
