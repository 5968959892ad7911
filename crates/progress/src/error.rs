//! Errors for misuse of the progress tree.

use progtree_core::NodeId;

/// Error type for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Precondition violations.
///
/// The plain methods (`cancel`, `pause`, `resign_current`) treat these as
/// programmer errors and panic; the `try_*` variants hand them back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    /// Cancel or pause requested on a node that already reached 100%
    #[error("progress {0} is already complete")]
    AlreadyComplete(NodeId),

    /// Resign requested with an empty current-progress stack
    #[error("no current progress on this thread")]
    NoCurrentProgress,

    /// Resign requested by a node that is not on top of the stack
    #[error("progress {expected} is not current on this thread (current is {actual})")]
    NotCurrent {
        /// Node asking to resign
        expected: NodeId,
        /// Node actually on top of the stack
        actual: NodeId,
    },
}
