//! progtree core data models.
//!
//! Plain, lock-free building blocks shared by the progress tree: node
//! identities, unit accounting, human-readable descriptions and
//! serializable snapshots.

#![warn(missing_docs)]

// Identity
mod id;

// Unit arithmetic
mod account;
mod description;

// Reporting
mod snapshot;

// Re-exports
pub use id::NodeId;
pub use account::{Fraction, UnitAccount};
pub use description::{describe_fraction, describe_units};
pub use snapshot::{ChildSnapshot, ProgressSnapshot};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
