//! Matching and severity thresholds, tunable per tenant

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// Thresholds driving the matching pass and discrepancy severity. These are
/// a policy input rather than constants so each tenant can tune them;
/// `Default` gives the stock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    /// Absolute tolerance for a deterministic amount comparison, covering
    /// rounding noise in extracted amounts
    pub amount_epsilon: BigDecimal,
    /// Relative amount band (fraction of the item amount) inside which a
    /// candidate still qualifies for fuzzy matching
    pub fuzzy_amount_tolerance: BigDecimal,
    /// How far apart statement and invoice dates may be before date
    /// proximity stops contributing to fuzzy confidence
    pub date_window_days: i64,
    /// Minimum fuzzy confidence worth proposing for human review
    pub min_fuzzy_confidence: f64,
    /// Relative variance at or below which a discrepancy is low severity
    pub severity_low_ratio: BigDecimal,
    /// Relative variance above which a discrepancy is high severity
    pub severity_high_ratio: BigDecimal,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            amount_epsilon: BigDecimal::new(1.into(), 2), // 0.01
            fuzzy_amount_tolerance: BigDecimal::new(5.into(), 2), // 0.05
            date_window_days: 30,
            min_fuzzy_confidence: 0.75,
            severity_low_ratio: BigDecimal::new(1.into(), 2), // 0.01
            severity_high_ratio: BigDecimal::new(1.into(), 1), // 0.10
        }
    }
}

impl ReconciliationPolicy {
    /// Are two amounts equal within the deterministic epsilon?
    pub fn amounts_match(&self, a: &BigDecimal, b: &BigDecimal) -> bool {
        (a - b).abs() <= self.amount_epsilon
    }

    /// Is `candidate` close enough to `base` for fuzzy consideration?
    pub fn within_fuzzy_band(&self, base: &BigDecimal, candidate: &BigDecimal) -> bool {
        (base - candidate).abs() <= base.abs() * &self.fuzzy_amount_tolerance
    }

    /// Severity from the magnitude of the variance relative to the item
    /// amount. A zero base amount is structural and therefore high.
    pub fn severity_for(&self, difference: &BigDecimal, base: &BigDecimal) -> Severity {
        let base_abs = base.abs();
        if base_abs == BigDecimal::from(0) {
            return Severity::High;
        }
        let diff_abs = difference.abs();
        if diff_abs <= &base_abs * &self.severity_low_ratio {
            Severity::Low
        } else if diff_abs <= &base_abs * &self.severity_high_ratio {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}
