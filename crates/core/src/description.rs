//! Human-readable progress descriptions.

use crate::account::{Fraction, UnitAccount};

/// "N% completed", or "In progress" when the fraction is unknown.
pub fn describe_fraction(fraction: Fraction) -> String {
    match fraction.percent() {
        Some(percent) => format!("{percent}% completed"),
        None => "In progress".to_string(),
    }
}

/// "C of T" for the account's completed and total units.
pub fn describe_units(account: &UnitAccount) -> String {
    if account.is_indeterminate() {
        format!("{} of unknown", account.completed())
    } else {
        format!("{} of {}", account.completed(), account.total())
    }
}
