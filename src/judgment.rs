//! Relevance judgments for a single query.

use crate::error::{RankevalError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::{BTreeMap, HashMap};

/// Largest grade magnitude accepted from ratings.
pub const MAX_GRADE: i64 = 64;

/// Human relevance judgment for one (query, document) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    grade: Decimal,
    gain: Option<Decimal>,
}

impl Judgment {
    /// Judgment whose gain is derived from the grade.
    pub fn new(grade: Decimal) -> Self {
        Self { grade, gain: None }
    }

    /// Judgment with an explicit gain overriding the grade-derived one.
    pub fn with_gain(grade: Decimal, gain: Decimal) -> Self {
        Self {
            grade,
            gain: Some(gain),
        }
    }

    pub fn grade(&self) -> Decimal {
        self.grade
    }

    /// Explicit gain, or `2^grade - 1` when none was supplied.
    pub fn gain(&self) -> Decimal {
        self.gain
            .unwrap_or_else(|| exp2(self.grade).unwrap_or(Decimal::MAX) - Decimal::ONE)
    }

    /// Rejects grades and gains whose magnitude exceeds [`MAX_GRADE`] (or `2^MAX_GRADE`).
    pub fn validate(&self) -> Result<()> {
        let limit = Decimal::from(MAX_GRADE);
        if self.grade.abs() > limit {
            return Err(RankevalError::Config(format!(
                "grade {} is outside [-{}, {}]",
                self.grade, MAX_GRADE, MAX_GRADE
            )));
        }
        if let Some(gain) = self.gain {
            let max_gain = exp2(limit).unwrap_or(Decimal::MAX);
            if gain.abs() > max_gain {
                return Err(RankevalError::Config(format!("gain {} is out of range", gain)));
            }
        }
        Ok(())
    }
}

/// `2^exponent`, exact for integral exponents; `None` on overflow.
pub(crate) fn exp2(exponent: Decimal) -> Option<Decimal> {
    let two = Decimal::from(2);
    if exponent.fract().is_zero() {
        if let Some(power) = exponent.to_i64() {
            return two.checked_powi(power);
        }
    }
    two.checked_powd(exponent)
}

/// Immutable document id -> judgment mapping scoped to one query.
#[derive(Debug, Clone, Default)]
pub struct JudgmentSet {
    judgments: HashMap<String, Judgment>,
}

impl JudgmentSet {
    pub fn new(judgments: HashMap<String, Judgment>) -> Self {
        Self { judgments }
    }

    pub fn get(&self, doc_id: &str) -> Option<&Judgment> {
        self.judgments.get(doc_id)
    }

    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Judgment)> {
        self.judgments.iter()
    }

    /// Gains grouped by value, highest first, with the number of documents per gain.
    ///
    /// This is the layout of the ideal ranking: which document carries a tied gain
    /// is irrelevant, only how many positions each gain occupies.
    pub fn gains_descending(&self) -> Vec<(Decimal, usize)> {
        let mut grouped: BTreeMap<Decimal, usize> = BTreeMap::new();
        for judgment in self.judgments.values() {
            *grouped.entry(judgment.gain()).or_insert(0) += 1;
        }
        grouped.into_iter().rev().collect()
    }
}

impl FromIterator<(String, Judgment)> for JudgmentSet {
    fn from_iter<I: IntoIterator<Item = (String, Judgment)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_defaults_from_grade() {
        assert_eq!(Judgment::new(Decimal::from(3)).gain(), Decimal::from(7));
        assert_eq!(Judgment::new(Decimal::ZERO).gain(), Decimal::ZERO);
        assert_eq!(Judgment::new(Decimal::ONE).gain(), Decimal::ONE);
    }

    #[test]
    fn test_explicit_gain_wins() {
        let judgment = Judgment::with_gain(Decimal::from(3), Decimal::from(2));
        assert_eq!(judgment.grade(), Decimal::from(3));
        assert_eq!(judgment.gain(), Decimal::from(2));
    }

    #[test]
    fn test_huge_grade_does_not_panic() {
        let judgment = Judgment::new(Decimal::from(100));
        assert_eq!(judgment.gain(), Decimal::MAX - Decimal::ONE);
        assert!(exp2(Decimal::from(200)).is_none());
        assert_eq!(exp2(Decimal::from(10)), Some(Decimal::from(1024)));

        let set: JudgmentSet = vec![("a".to_string(), judgment)].into_iter().collect();
        assert_eq!(set.gains_descending().len(), 1);
    }

    #[test]
    fn test_validate_grade_range() {
        assert!(Judgment::new(Decimal::from(MAX_GRADE)).validate().is_ok());
        assert!(Judgment::new(Decimal::from(-3)).validate().is_ok());
        let err = Judgment::new(Decimal::from(96)).validate().unwrap_err();
        assert!(matches!(err, RankevalError::Config(_)));
        let gain = Judgment::with_gain(Decimal::ONE, Decimal::MAX).validate();
        assert!(matches!(gain, Err(RankevalError::Config(_))));
        assert!(Judgment::with_gain(Decimal::ONE, Decimal::from(5)).validate().is_ok());
    }

    #[test]
    fn test_gains_grouped_descending() {
        let set: JudgmentSet = vec![
            ("a".to_string(), Judgment::new(Decimal::from(1))),
            ("b".to_string(), Judgment::new(Decimal::from(3))),
            ("c".to_string(), Judgment::new(Decimal::from(1))),
            ("d".to_string(), Judgment::new(Decimal::from(2))),
        ]
        .into_iter()
        .collect();

        let gains = set.gains_descending();
        assert_eq!(
            gains,
            vec![
                (Decimal::from(7), 1),
                (Decimal::from(3), 1),
                (Decimal::from(1), 2)
            ]
        );
        assert_eq!(set.len(), 4);
        assert!(set.get("b").is_some());
        assert!(set.get("z").is_none());
    }
}
