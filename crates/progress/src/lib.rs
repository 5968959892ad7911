//! Hierarchical progress tracking.
//!
//! Units of work report their own completion through a [`ProgressSource`].
//! A source constructed while another source is *current* on the same
//! thread attaches to it as a weighted child, so a parent's fraction is
//! derived from its children without either side knowing the other's
//! accounting. Consumers observe through a [`ProgressHandle`]: read the
//! fraction, subscribe to changes, cancel or pause.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handle;
pub mod scope;
pub mod source;
pub mod wait;

mod current;
mod node;
mod notify;

pub use config::{SourceConfig, DEFAULT_TOTAL_UNITS};
pub use current::pending_units;
pub use error::{ProgressError, Result};
pub use handle::ProgressHandle;
pub use scope::{capture, progress, progress_with};
pub use source::{CurrentGuard, ProgressSource};
pub use wait::Outcome;

pub use progtree_core::{ChildSnapshot, Fraction, NodeId, ProgressSnapshot};
