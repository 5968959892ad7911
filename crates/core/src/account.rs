//! Unit accounting for a single node.
//!
//! A [`UnitAccount`] only stores counts. It does no locking; the owning
//! node serializes access to it.

use serde::{Deserialize, Serialize};

/// Completed fraction of a node.
///
/// Determinate values are reported literally, so over-reporting past `1.0`
/// is visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Fraction {
    /// `completed / total`
    Determinate(f64),
    /// Total is unknown (non-positive)
    Indeterminate,
}

impl Fraction {
    /// The numeric value, if determinate.
    pub fn value(&self) -> Option<f64> {
        match self {
            Fraction::Determinate(value) => Some(*value),
            Fraction::Indeterminate => None,
        }
    }

    /// Whether the total is unknown.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Fraction::Indeterminate)
    }

    /// Whether the fraction has reached (or passed) `1.0`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Fraction::Determinate(value) if *value >= 1.0)
    }

    /// Whole percentage, rounded to the nearest integer.
    pub fn percent(&self) -> Option<i64> {
        self.value().map(|value| (value * 100.0).round() as i64)
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::Determinate(0.0)
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fraction::Determinate(value) => write!(f, "{value}"),
            Fraction::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Total and completed unit counts for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAccount {
    total: i64,
    completed: i64,
}

impl UnitAccount {
    /// Create an account with `total` units and nothing completed.
    pub fn new(total: i64) -> Self {
        Self { total, completed: 0 }
    }

    /// Total units.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Units completed directly on this account.
    pub fn completed(&self) -> i64 {
        self.completed
    }

    /// Re-estimate the total. The fraction follows the new total at once.
    pub fn set_total(&mut self, total: i64) {
        self.total = total;
    }

    /// Overwrite the completed count.
    pub fn set_completed(&mut self, completed: i64) {
        self.completed = completed;
    }

    /// Add `units` to the completed count.
    pub fn add_completed(&mut self, units: i64) {
        self.completed = self.completed.saturating_add(units);
    }

    /// Whether the total is non-positive.
    pub fn is_indeterminate(&self) -> bool {
        self.total <= 0
    }

    /// `completed / total`, or [`Fraction::Indeterminate`].
    pub fn fraction_completed(&self) -> Fraction {
        self.fraction_with_contribution(0.0)
    }

    /// Like [`fraction_completed`](Self::fraction_completed), with `extra`
    /// (possibly fractional) units counted as completed on top of the
    /// direct count. Attached children contribute through `extra`.
    pub fn fraction_with_contribution(&self, extra: f64) -> Fraction {
        if self.is_indeterminate() {
            return Fraction::Indeterminate;
        }
        Fraction::Determinate((self.completed as f64 + extra) / self.total as f64)
    }
}
