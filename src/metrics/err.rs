//! Expected Reciprocal Rank (cascade model).

use super::{empty_result_value, within, Accumulator, JudgedHit, MetricDefinition};
use crate::judgment::{exp2, JudgmentSet};
use rust_decimal::Decimal;

pub const DEFAULT_MAX_GRADE: i64 = 3;
pub const DEFAULT_GRADE: i64 = 0;

#[derive(Debug, Clone)]
pub struct ExpectedReciprocalRank {
    name: String,
    k: usize,
    max_grade: Decimal,
    default_grade: Decimal,
}

impl ExpectedReciprocalRank {
    pub fn at(k: usize) -> Self {
        Self::with_grades(
            format!("ERR@{}", k),
            k,
            Decimal::from(DEFAULT_MAX_GRADE),
            Decimal::from(DEFAULT_GRADE),
        )
    }

    /// `default_grade` is the grade assumed for hits without a judgment.
    pub fn with_grades(
        name: impl Into<String>,
        k: usize,
        max_grade: Decimal,
        default_grade: Decimal,
    ) -> Self {
        Self {
            name: name.into(),
            k,
            max_grade,
            default_grade,
        }
    }
}

impl MetricDefinition for ExpectedReciprocalRank {
    fn name(&self) -> &str {
        &self.name
    }

    fn accumulator(&self, judgments: &JudgmentSet) -> Box<dyn Accumulator> {
        Box::new(ErrAccumulator::new(
            self.k,
            judgments.len(),
            self.max_grade,
            self.default_grade,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ErrAccumulator {
    k: usize,
    expected: usize,
    total_hits: u64,
    max_grade: Decimal,
    default_grade: Decimal,
    max_gain: Decimal,
    /// Probability the user has not stopped before the current rank
    trust: Decimal,
    err: Decimal,
}

impl ErrAccumulator {
    pub fn new(k: usize, expected: usize, max_grade: Decimal, default_grade: Decimal) -> Self {
        let max_grade = max_grade.max(Decimal::ZERO);
        Self {
            k,
            expected,
            total_hits: 0,
            max_grade,
            default_grade,
            max_gain: exp2(max_grade).unwrap_or(Decimal::MAX),
            trust: Decimal::ONE,
            err: Decimal::ZERO,
        }
    }

    pub fn trust(&self) -> Decimal {
        self.trust
    }

    /// Satisfaction probability of a grade, `(2^g - 1) / 2^max`.
    fn stop_probability(&self, grade: Decimal) -> Decimal {
        let grade = grade.max(Decimal::ZERO).min(self.max_grade);
        (exp2(grade).unwrap_or(self.max_gain) - Decimal::ONE) / self.max_gain
    }
}

impl Accumulator for ErrAccumulator {
    fn collect(&mut self, hit: &JudgedHit<'_>, rank: usize) {
        if !within(Some(self.k), rank) {
            return;
        }
        let grade = hit.judgment.map_or(self.default_grade, |j| j.grade());
        let stop = self.stop_probability(grade);
        self.err += self.trust * stop / Decimal::from(rank as u64);
        self.trust *= Decimal::ONE - stop;
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
        self.err
    }
}
