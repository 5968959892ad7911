//! Consumer-side view of a progress node.

use progtree_core::{describe_fraction, describe_units, Fraction, NodeId, ProgressSnapshot};
use serde_json::Value;
use std::sync::Arc;

use crate::current;
use crate::error::Result;
use crate::node::Node;

/// Read-only view of a progress node, plus the consumer controls
/// (subscribe, cancel, pause).
///
/// Cheap to clone; all clones observe the same node.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    pub(crate) node: Arc<Node>,
}

impl ProgressHandle {
    pub(crate) fn from_node(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// The progress that is current on the calling thread, if any.
    pub fn current() -> Option<ProgressHandle> {
        current::current_node().map(Self::from_node)
    }

    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The node this one was attached to, while it is still alive.
    pub fn parent(&self) -> Option<ProgressHandle> {
        self.node.parent().map(Self::from_node)
    }

    /// Total units.
    pub fn total_units(&self) -> i64 {
        self.node.state.lock().account.total()
    }

    /// Completed units, including the slices of completed children.
    pub fn completed_units(&self) -> i64 {
        self.node.state.lock().account.completed()
    }

    /// Completed fraction, including the in-flight share of children.
    pub fn fraction_completed(&self) -> Fraction {
        self.node.fraction()
    }

    /// Whether the total is unknown.
    pub fn is_indeterminate(&self) -> bool {
        self.node.state.lock().account.is_indeterminate()
    }

    /// Whether the node reached 100%.
    pub fn is_complete(&self) -> bool {
        self.fraction_completed().is_complete()
    }

    /// Whether the producer allows cancellation.
    pub fn is_cancellable(&self) -> bool {
        self.node.state.lock().cancellable
    }

    /// Whether the node was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.node.state.lock().cancelled
    }

    /// Whether the producer allows pausing.
    pub fn is_pausable(&self) -> bool {
        self.node.state.lock().pausable
    }

    /// Whether the node was paused.
    pub fn is_paused(&self) -> bool {
        self.node.state.lock().paused
    }

    /// Caller-defined kind.
    pub fn kind(&self) -> Option<String> {
        self.node.state.lock().kind.clone()
    }

    /// Caller-attached value for `key`.
    pub fn user_info(&self, key: &str) -> Option<Value> {
        self.node.state.lock().user_info.get(key).cloned()
    }

    /// "N% completed", unless the producer overrode it.
    pub fn localized_description(&self) -> String {
        let st = self.node.state.lock();
        st.description
            .clone()
            .unwrap_or_else(|| describe_fraction(st.fraction()))
    }

    /// "C of T", unless the producer overrode it.
    pub fn localized_additional_description(&self) -> String {
        let st = self.node.state.lock();
        st.additional_description
            .clone()
            .unwrap_or_else(|| describe_units(&st.account))
    }

    /// Cancel this node and all attached descendants.
    ///
    /// Repeated calls are no-ops.
    ///
    /// # Panics
    ///
    /// Panics if the node is already complete.
    pub fn cancel(&self) {
        if let Err(err) = self.try_cancel() {
            panic!("{err}");
        }
    }

    /// Like [`cancel`](Self::cancel), reporting a complete node as an error.
    pub fn try_cancel(&self) -> Result<()> {
        self.node.try_cancel()
    }

    /// Pause this node and its pausable descendants.
    ///
    /// Descent stops at the first non-pausable child. Repeated calls are
    /// no-ops.
    ///
    /// # Panics
    ///
    /// Panics if the node is already complete.
    pub fn pause(&self) {
        if let Err(err) = self.try_pause() {
            panic!("{err}");
        }
    }

    /// Like [`pause`](Self::pause), reporting a complete node as an error.
    pub fn try_pause(&self) -> Result<()> {
        self.node.try_pause()
    }

    /// Subscribe to fraction changes, up to and including completion.
    ///
    /// Subscribing to a node that is already complete does nothing.
    pub fn on_progress(&self, callback: impl Fn(Fraction) + Send + Sync + 'static) -> &Self {
        self.node.on_progress(Arc::new(callback));
        self
    }

    /// Serializable view of this node and its attached subtree.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.node.snapshot()
    }
}

impl PartialEq for ProgressHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ProgressHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ProgressSource;
    use crate::ProgressError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_init_with_total_units() {
        let source = ProgressSource::new(10);
        let progress = source.progress();
        assert_eq!(progress.total_units(), 10);
        assert_eq!(progress.completed_units(), 0);
        assert_eq!(progress.fraction_completed(), Fraction::Determinate(0.0));
    }

    #[test]
    fn test_localized_descriptions() {
        let source = ProgressSource::new(10);
        assert_eq!(source.progress().localized_description(), "0% completed");
        assert_eq!(source.progress().localized_additional_description(), "0 of 10");

        source.complete_unit();
        assert_eq!(source.progress().fraction_completed(), Fraction::Determinate(0.1));
        assert_eq!(source.progress().localized_description(), "10% completed");
        assert_eq!(source.progress().localized_additional_description(), "1 of 10");
    }

    #[test]
    fn test_description_override() {
        let source = ProgressSource::new(10);
        source.set_localized_description(Some("Copying files".to_string()));
        assert_eq!(source.progress().localized_description(), "Copying files");

        source.set_localized_description(None);
        assert_eq!(source.progress().localized_description(), "0% completed");
    }

    #[test]
    fn test_indeterminate() {
        let source = ProgressSource::new(0);
        assert!(source.progress().is_indeterminate());
        assert_eq!(source.progress().fraction_completed(), Fraction::Indeterminate);

        source.set_total_units(4);
        assert!(!source.progress().is_indeterminate());
    }

    #[test]
    fn test_cancel() {
        let source = ProgressSource::new(10);
        assert!(!source.progress().is_cancelled());
        source.progress().cancel();
        assert!(source.progress().is_cancelled());
    }

    #[test]
    fn test_cancel_twice_notifies_once() {
        let source = ProgressSource::new(10);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        source.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.progress().cancel();
        source.progress().cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_complete_node_is_an_error() {
        let source = ProgressSource::new(1);
        source.complete_unit();
        assert_eq!(
            source.progress().try_cancel(),
            Err(ProgressError::AlreadyComplete(source.id()))
        );
        assert!(!source.progress().is_cancelled());
    }

    #[test]
    #[should_panic(expected = "already complete")]
    fn test_cancel_complete_node_panics() {
        let source = ProgressSource::new(1);
        source.complete_unit();
        source.progress().cancel();
    }

    #[test]
    #[should_panic(expected = "already complete")]
    fn test_pause_complete_node_panics() {
        let source = ProgressSource::new(1);
        source.set_pausable(true);
        source.complete_unit();
        source.progress().pause();
    }

    #[test]
    fn test_pause() {
        let source = ProgressSource::new(10);
        source.set_pausable(true);
        assert!(!source.progress().is_paused());
        source.progress().pause();
        assert!(source.progress().is_paused());
    }

    #[test]
    fn test_on_progress_after_completion_is_ignored() {
        let source = ProgressSource::new(2);
        source.complete_unit();
        source.complete_unit();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        source.progress().on_progress(move |_: Fraction| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        source.set_total_units(2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_on_progress_reports_each_change() {
        let source = ProgressSource::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source
            .progress()
            .on_progress(move |fraction: Fraction| sink.lock().push(fraction));

        for _ in 0..4 {
            source.complete_unit();
        }
        let values: Vec<_> = seen.lock().iter().filter_map(Fraction::value).collect();
        assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_handles_compare_by_node() {
        let first = ProgressSource::new(1);
        let second = ProgressSource::new(1);
        assert_eq!(first.handle(), first.handle());
        assert_ne!(first.handle(), second.handle());
    }
}
