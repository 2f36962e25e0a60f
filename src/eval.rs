//! Compression metrics.
//!
//! A rule's usefulness is judged from three numbers: the facts it newly
//! entails (`pos`), the counter-evidence it entails (`neg`, a count or a
//! weight sum), and its length `len` (the storage cost of the rule itself).
//! Everything here is a pure function of those three numbers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scalar score used to rank candidate rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EvalMetric {
    /// `τ = pos / (neg + len)`.
    CompressionRatio,
    /// `δ = pos - neg - len`.
    #[default]
    CompressionCapacity,
    /// `h = pos * ln(1 + rate)`.
    InfoGain,
}

impl EvalMetric {
    /// Symbol used on the command line and in logs.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::CompressionRatio => "τ",
            Self::CompressionCapacity => "δ",
            Self::InfoGain => "h",
        }
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for EvalMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "τ" | "tau" | "ratio" => Ok(Self::CompressionRatio),
            "δ" | "delta" | "capacity" => Ok(Self::CompressionCapacity),
            "h" | "infogain" | "info-gain" => Ok(Self::InfoGain),
            other => Err(ConfigError::UnknownMetric {
                symbol: other.to_string(),
            }),
        }
    }
}

/// Evaluation of one rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eval {
    pos: usize,
    neg: f64,
    len: usize,
}

impl Eval {
    /// Creates an evaluation record. Negative values of `neg` are clamped to 0.
    #[must_use]
    pub fn new(pos: usize, neg: f64, len: usize) -> Self {
        let neg = if neg.is_finite() && neg > 0.0 { neg } else { 0.0 };
        Self { pos, neg, len }
    }

    /// Newly entailed positive facts.
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// Entailed counter-evidence (count, or weight sum in weighted mode).
    #[must_use]
    pub const fn neg(&self) -> f64 {
        self.neg
    }

    /// Rule length.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.len
    }

    #[allow(clippy::cast_precision_loss)]
    fn pos_f(&self) -> f64 {
        self.pos as f64
    }

    #[allow(clippy::cast_precision_loss)]
    fn len_f(&self) -> f64 {
        self.len as f64
    }

    /// `τ = pos / (neg + len)`; 0 when `pos` is 0 or the denominator vanishes.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let denom = self.neg + self.len_f();
        if self.pos == 0 || denom <= 0.0 {
            return 0.0;
        }
        self.pos_f() / denom
    }

    /// `pos / (pos + neg + len)`, in `[0, 1)`. Exceeds 0.5 exactly when `τ > 1`.
    /// 0 when `pos` or `len` is 0, like `τ`.
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.pos == 0 || self.len == 0 {
            return 0.0;
        }
        self.pos_f() / (self.pos_f() + self.neg + self.len_f())
    }

    /// `δ = pos - neg - len`: storage units saved by keeping the rule
    /// instead of the facts it entails.
    ///
    /// Never clamped: the length-0 most general rule is the beam root and
    /// its children must be ranked against it.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.pos_f() - self.neg - self.len_f()
    }

    /// `h = pos * ln(1 + rate)`; 0 whenever `rate` is.
    #[must_use]
    pub fn info_gain(&self) -> f64 {
        if self.pos == 0 {
            return 0.0;
        }
        self.pos_f() * self.rate().ln_1p()
    }

    /// Score under the given metric.
    #[must_use]
    pub fn score(&self, metric: EvalMetric) -> f64 {
        match metric {
            EvalMetric::CompressionRatio => self.ratio(),
            EvalMetric::CompressionCapacity => self.capacity(),
            EvalMetric::InfoGain => self.info_gain(),
        }
    }

    /// A rule is useful when it saves storage: `τ > 1`.
    ///
    /// Rules of length 0 or without positive entailments are never useful.
    #[must_use]
    pub fn is_useful(&self) -> bool {
        self.len > 0 && self.pos > 0 && self.ratio() > 1.0
    }
}

impl fmt::Display for Eval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(+){}; (-){}; |{}|; δ={:.2}; τ={:.2}; h={:.2}",
            self.pos,
            self.neg,
            self.len,
            self.capacity(),
            self.ratio(),
            self.info_gain()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formulas() {
        let eval = Eval::new(10, 2.0, 3);
        assert!((eval.ratio() - 2.0).abs() < 1e-12);
        assert!((eval.capacity() - 5.0).abs() < 1e-12);
        assert!((eval.rate() - 10.0 / 15.0).abs() < 1e-12);
        assert!((eval.info_gain() - 10.0 * (1.0 + 10.0 / 15.0_f64).ln()).abs() < 1e-12);
        assert!(eval.is_useful());
    }

    #[test]
    fn test_zero_pos_scores_zero() {
        let eval = Eval::new(0, 5.0, 2);
        assert_eq!(eval.ratio(), 0.0);
        assert_eq!(eval.rate(), 0.0);
        assert_eq!(eval.info_gain(), 0.0);
        assert!(!eval.is_useful());
    }

    #[test]
    fn test_zero_length_is_unusable() {
        let eval = Eval::new(7, 0.0, 0);
        assert_eq!(eval.ratio(), 0.0);
        assert_eq!(eval.rate(), 0.0);
        assert_eq!(eval.info_gain(), 0.0);
        assert!(!eval.is_useful());
        // Capacity stays comparable so the most general rule can be beaten.
        assert!((eval.capacity() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_is_not_clamped() {
        let eval = Eval::new(0, 3.0, 2);
        assert!((eval.capacity() + 5.0).abs() < 1e-12);
        assert_eq!(eval.rate(), 0.0);
        assert!(Eval::new(5, 40.0, 0).capacity() < Eval::new(30, 2.0, 2).capacity());
    }

    #[test]
    fn test_useful_threshold() {
        assert!(!Eval::new(3, 1.0, 2).is_useful());
        assert!(Eval::new(4, 1.0, 2).is_useful());
        assert!(Eval::new(4, 1.0, 2).rate() > 0.5);
        assert!(Eval::new(3, 1.0, 2).rate() <= 0.5);
    }

    #[test]
    fn test_negative_neg_is_clamped() {
        let eval = Eval::new(3, -4.0, 1);
        assert_eq!(eval.neg(), 0.0);
        let eval = Eval::new(3, f64::NAN, 1);
        assert_eq!(eval.neg(), 0.0);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("τ".parse::<EvalMetric>().unwrap(), EvalMetric::CompressionRatio);
        assert_eq!("δ".parse::<EvalMetric>().unwrap(), EvalMetric::CompressionCapacity);
        assert_eq!("h".parse::<EvalMetric>().unwrap(), EvalMetric::InfoGain);
        assert_eq!("delta".parse::<EvalMetric>().unwrap(), EvalMetric::CompressionCapacity);
        assert!("x".parse::<EvalMetric>().is_err());
        assert_eq!(EvalMetric::default(), EvalMetric::CompressionCapacity);
    }
}
