//! Producer-side view of a progress node.

use progtree_core::{Fraction, NodeId};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

use crate::config::{SourceConfig, DEFAULT_TOTAL_UNITS};
use crate::current;
use crate::error::Result;
use crate::handle::ProgressHandle;
use crate::node::Node;

/// Read-write view of a progress node, held by whoever performs the work.
///
/// Constructing a source on a thread whose current progress still has a
/// pending allocation attaches the new node as a child of it.
///
/// ```
/// use progtree_progress::{Fraction, ProgressSource};
///
/// let download = ProgressSource::new(100);
/// download.capture_progress(40, || {
///     let fetch = ProgressSource::new(2);
///     fetch.complete_unit();
/// });
/// assert_eq!(download.progress().fraction_completed(), Fraction::Determinate(0.2));
/// ```
#[derive(Debug)]
pub struct ProgressSource {
    handle: ProgressHandle,
}

impl ProgressSource {
    /// Create a source with `total_units` units of work.
    pub fn new(total_units: i64) -> Self {
        Self::with_config(SourceConfig::default().with_total_units(total_units))
    }

    /// Create a source from a full config.
    pub fn with_config(config: SourceConfig) -> Self {
        Self {
            handle: ProgressHandle::from_node(Node::new(&config)),
        }
    }

    /// Consumer view of this source.
    pub fn progress(&self) -> &ProgressHandle {
        &self.handle
    }

    /// Owned consumer view, for handing to another thread.
    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.handle.id()
    }

    fn node(&self) -> &Arc<Node> {
        &self.handle.node
    }

    /// Total units.
    pub fn total_units(&self) -> i64 {
        self.handle.total_units()
    }

    /// Re-estimate the total. The fraction follows immediately.
    pub fn set_total_units(&self, total_units: i64) {
        self.node()
            .update_units(|account| account.set_total(total_units));
    }

    /// Completed units.
    pub fn completed_units(&self) -> i64 {
        self.handle.completed_units()
    }

    /// Overwrite the completed count.
    pub fn set_completed_units(&self, completed_units: i64) {
        self.node()
            .update_units(|account| account.set_completed(completed_units));
    }

    /// Mark one more unit as done.
    pub fn complete_unit(&self) {
        self.node().update_units(|account| account.add_completed(1));
    }

    /// Completed fraction.
    pub fn fraction_completed(&self) -> Fraction {
        self.handle.fraction_completed()
    }

    /// Whether a consumer cancelled this work.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Whether a consumer paused this work.
    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// Whether consumers may cancel.
    pub fn cancellable(&self) -> bool {
        self.handle.is_cancellable()
    }

    /// Allow or forbid cancellation. Affects this node only.
    pub fn set_cancellable(&self, cancellable: bool) {
        self.node().state.lock().cancellable = cancellable;
    }

    /// Whether consumers may pause.
    pub fn pausable(&self) -> bool {
        self.handle.is_pausable()
    }

    /// Allow or forbid pausing. Affects this node only.
    pub fn set_pausable(&self, pausable: bool) {
        self.node().state.lock().pausable = pausable;
    }

    /// Set the caller-defined kind.
    pub fn set_kind(&self, kind: Option<String>) {
        self.node().state.lock().kind = kind;
    }

    /// Attach an arbitrary value under `key`; `Value::Null` removes it.
    pub fn set_user_info(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut st = self.node().state.lock();
        if value.is_null() {
            st.user_info.remove(&key);
        } else {
            st.user_info.insert(key, value);
        }
    }

    /// Replace the derived "N% completed" text; `None` restores it.
    pub fn set_localized_description(&self, description: Option<String>) {
        self.node().state.lock().description = description;
    }

    /// Replace the derived "C of T" text; `None` restores it.
    pub fn set_localized_additional_description(&self, description: Option<String>) {
        self.node().state.lock().additional_description = description;
    }

    /// Make this source the calling thread's current progress, reserving
    /// `pending_units` of its total for the next progress constructed on
    /// this thread.
    ///
    /// Must be balanced by [`resign_current`](Self::resign_current) on the
    /// same thread.
    pub fn become_current(&self, pending_units: i64) {
        current::push(Arc::clone(self.node()), pending_units);
    }

    /// Undo the matching [`become_current`](Self::become_current).
    ///
    /// # Panics
    ///
    /// Panics if this source is not the calling thread's current progress.
    pub fn resign_current(&self) {
        if let Err(err) = self.try_resign_current() {
            panic!("{err}");
        }
    }

    /// Like [`resign_current`](Self::resign_current), reporting an
    /// unbalanced call as an error.
    pub fn try_resign_current(&self) -> Result<()> {
        current::pop(self.id())
    }

    /// [`become_current`](Self::become_current) until the guard drops.
    pub fn become_current_scoped(&self, pending_units: i64) -> CurrentGuard {
        self.become_current(pending_units);
        CurrentGuard {
            node: self.id(),
            _thread_bound: PhantomData,
        }
    }

    /// Run `work` with this source current, reserving `pending_units` for
    /// whatever progress `work` constructs first. Resigns on every exit
    /// path, including unwinding.
    pub fn capture_progress<T>(&self, pending_units: i64, work: impl FnOnce() -> T) -> T {
        let _current = self.become_current_scoped(pending_units);
        work()
    }

    /// Run `callback` once when this work is cancelled, or right away if
    /// it already was.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        self.node().on_cancel(Box::new(callback));
        self
    }

    /// Run `callback` once when this work is paused, or right away if it
    /// already was.
    pub fn on_pause(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        self.node().on_pause(Box::new(callback));
        self
    }
}

impl Default for ProgressSource {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_UNITS)
    }
}

/// Keeps a source current on this thread; resigns when dropped.
#[derive(Debug)]
#[must_use = "the source resigns as soon as the guard is dropped"]
pub struct CurrentGuard {
    node: NodeId,
    // Frames belong to the thread that pushed them.
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        if let Err(err) = current::pop(self.node) {
            warn!(node = %self.node, error = %err, "failed to resign current progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgressError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let bump = Arc::clone(&count);
        (count, move || {
            bump.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_default_total_units() {
        let source = ProgressSource::default();
        assert_eq!(source.total_units(), 100);
    }

    #[test]
    fn test_total_units() {
        let source = ProgressSource::new(10);
        assert_eq!(source.progress().total_units(), 10);
        source.set_total_units(8);
        assert_eq!(source.progress().total_units(), 8);
    }

    #[test]
    fn test_fraction_completed() {
        let source = ProgressSource::new(10);
        source.complete_unit();
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.1));
        source.complete_unit();
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.2));
    }

    #[test]
    fn test_total_then_completed_gives_ratio() {
        let source = ProgressSource::new(1);
        source.set_total_units(8);
        source.set_completed_units(6);
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.75));

        source.set_total_units(-1);
        assert!(source.progress().is_indeterminate());
    }

    #[test]
    fn test_adapt_total_units_with_progress() {
        let source = ProgressSource::new(10);
        source.complete_unit();
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.1));
        source.set_total_units(5);
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.2));
    }

    #[test]
    fn test_cancellable() {
        let source = ProgressSource::new(10);
        assert!(source.progress().is_cancellable());
        source.set_cancellable(false);
        assert!(!source.progress().is_cancellable());
    }

    #[test]
    fn test_pausable() {
        let source = ProgressSource::new(10);
        assert!(!source.progress().is_pausable());
        source.set_pausable(true);
        assert!(source.progress().is_pausable());
    }

    #[test]
    fn test_config_is_applied() {
        let source = ProgressSource::with_config(
            SourceConfig::new()
                .with_total_units(3)
                .with_cancellable(false)
                .with_pausable(true)
                .with_kind("file"),
        );
        assert_eq!(source.total_units(), 3);
        assert!(!source.cancellable());
        assert!(source.pausable());
        assert_eq!(source.progress().kind().as_deref(), Some("file"));
    }

    #[test]
    fn test_user_info() {
        let source = ProgressSource::new(1);
        source.set_user_info("path", Value::from("/tmp/a"));
        assert_eq!(source.progress().user_info("path"), Some(Value::from("/tmp/a")));
        source.set_user_info("path", Value::Null);
        assert_eq!(source.progress().user_info("path"), None);
    }

    #[test]
    fn test_on_cancel_fires_on_cancellation() {
        let source = ProgressSource::new(10);
        let (fired, callback) = counter();
        source.on_cancel(callback);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        source.progress().cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation_fires_immediately() {
        let source = ProgressSource::new(10);
        source.progress().cancel();

        let (fired, callback) = counter();
        source.on_cancel(callback);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_pause_fires_once() {
        let source = ProgressSource::new(10);
        source.set_pausable(true);
        let (before, callback) = counter();
        source.on_pause(callback);

        source.progress().pause();
        source.progress().pause();
        assert_eq!(before.load(Ordering::SeqCst), 1);

        let (after, callback) = counter();
        source.on_pause(callback);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_composition_by_pending_units() {
        let parent = ProgressSource::new(100);

        parent.become_current(30);
        let a = ProgressSource::new(30);
        parent.resign_current();

        parent.become_current(70);
        let b = ProgressSource::new(70);
        parent.resign_current();

        a.set_completed_units(15);
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(0.15));

        a.set_completed_units(30);
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(0.3));
        assert_eq!(b.fraction_completed(), Fraction::Determinate(0.0));

        for _ in 0..70 {
            b.complete_unit();
        }
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(1.0));
        assert_eq!(parent.completed_units(), 100);
    }

    #[test]
    fn test_over_allocated_children_report_past_one() {
        let parent = ProgressSource::new(10);
        let first = parent.capture_progress(8, || ProgressSource::new(2));
        let second = parent.capture_progress(8, || ProgressSource::new(2));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        parent
            .progress()
            .on_progress(move |fraction: Fraction| sink.lock().push(fraction));

        first.set_completed_units(2);
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(0.8));
        second.complete_unit();
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(1.2));
        second.complete_unit();
        assert_eq!(parent.fraction_completed(), Fraction::Determinate(1.6));
        assert_eq!(parent.completed_units(), 16);

        // Subscribers are dropped at the first complete delivery
        assert_eq!(
            *seen.lock(),
            vec![Fraction::Determinate(0.8), Fraction::Determinate(1.2)]
        );
        assert_eq!(
            parent.progress().try_cancel(),
            Err(ProgressError::AlreadyComplete(parent.id()))
        );
    }

    #[test]
    fn test_cancel_reaches_completed_descendant() {
        let parent = ProgressSource::new(10);
        let done = parent.capture_progress(5, || ProgressSource::new(1));
        let (fired, callback) = counter();
        done.on_cancel(callback);
        done.complete_unit();

        parent.progress().cancel();
        assert!(done.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flags_do_not_bubble() {
        let parent = ProgressSource::new(10);
        parent.set_pausable(true);
        let first = parent.capture_progress(5, || ProgressSource::new(1));
        let second = parent.capture_progress(5, || ProgressSource::new(1));

        first.set_cancellable(false);
        second.set_cancellable(false);
        assert!(parent.cancellable());
        assert!(!second.pausable());
        assert!(parent.pausable());
    }

    #[test]
    fn test_cancel_reaches_every_descendant_once() {
        let parent = ProgressSource::new(10);
        let first = parent.capture_progress(5, || ProgressSource::new(4));
        let second = parent.capture_progress(5, || ProgressSource::new(4));
        let grandchild = second.capture_progress(2, || ProgressSource::new(2));

        let (count, _) = counter();
        for source in [&parent, &first, &second, &grandchild] {
            let count = Arc::clone(&count);
            source.on_cancel(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        parent.progress().cancel();
        parent.progress().cancel();
        first.progress().cancel();

        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(grandchild.is_cancelled());
        assert_eq!(first.fraction_completed(), Fraction::Determinate(0.0));
    }

    #[test]
    fn test_pause_skips_non_pausable_subtrees() {
        let parent = ProgressSource::new(10);
        parent.set_pausable(true);
        let pausable = parent.capture_progress(5, || {
            ProgressSource::with_config(SourceConfig::new().with_total_units(2).with_pausable(true))
        });
        let fixed = parent.capture_progress(5, || ProgressSource::new(2));
        let hidden = fixed.capture_progress(1, || {
            ProgressSource::with_config(SourceConfig::new().with_total_units(2).with_pausable(true))
        });

        parent.progress().pause();
        assert!(parent.is_paused());
        assert!(pausable.is_paused());
        assert!(!fixed.is_paused());
        assert!(!hidden.is_paused());
    }

    #[test]
    fn test_child_attached_to_cancelled_parent_is_cancelled() {
        let parent = ProgressSource::new(10);
        parent.progress().cancel();

        let child = parent.capture_progress(5, || ProgressSource::new(1));
        assert!(child.is_cancelled());
        let (fired, callback) = counter();
        child.on_cancel(callback);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_current_is_thread_bound() {
        let parent = ProgressSource::new(10);
        parent.become_current(5);

        let (had_current, orphan_parent) = std::thread::spawn(|| {
            let orphan = ProgressSource::new(3);
            (
                ProgressHandle::current().is_some(),
                orphan.progress().parent().is_some(),
            )
        })
        .join()
        .unwrap();
        assert!(!had_current);
        assert!(!orphan_parent);

        assert_eq!(ProgressHandle::current(), Some(parent.handle()));
        parent.resign_current();
        assert_eq!(ProgressHandle::current(), None);
    }

    #[test]
    fn test_nested_current_restores_outer() {
        let outer = ProgressSource::new(10);
        outer.become_current(5);
        let inner = ProgressSource::new(4);
        assert_eq!(inner.progress().parent(), Some(outer.handle()));
        assert_eq!(ProgressHandle::current(), Some(outer.handle()));

        inner.become_current(2);
        let leaf = ProgressSource::new(1);
        assert_eq!(leaf.progress().parent(), Some(inner.handle()));
        assert_eq!(ProgressHandle::current(), Some(inner.handle()));
        inner.resign_current();

        assert_eq!(ProgressHandle::current(), Some(outer.handle()));
        outer.resign_current();
        assert_eq!(ProgressHandle::current(), None);
    }

    #[test]
    fn test_second_child_in_consumed_frame_is_a_root() {
        let parent = ProgressSource::new(10);
        let (first, second) = parent.capture_progress(5, || {
            (ProgressSource::new(1), ProgressSource::new(1))
        });
        assert_eq!(first.progress().parent(), Some(parent.handle()));
        assert_eq!(second.progress().parent(), None);
    }

    #[test]
    fn test_unconsumed_capture_counts_as_done() {
        let source = ProgressSource::new(10);
        source.capture_progress(4, || ());
        assert_eq!(source.completed_units(), 4);
        assert_eq!(source.fraction_completed(), Fraction::Determinate(0.4));
    }

    #[test]
    fn test_capture_resigns_when_work_panics() {
        let source = ProgressSource::new(10);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            source.capture_progress(3, || panic!("work failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(ProgressHandle::current(), None);
    }

    #[test]
    fn test_resign_without_become_current() {
        let source = ProgressSource::new(1);
        assert_eq!(
            source.try_resign_current(),
            Err(ProgressError::NoCurrentProgress)
        );
    }

    #[test]
    #[should_panic(expected = "no current progress")]
    fn test_unbalanced_resign_panics() {
        ProgressSource::new(1).resign_current();
    }

    #[test]
    fn test_concurrent_completion_reports_monotonically() {
        let source = ProgressSource::new(800);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source
            .progress()
            .on_progress(move |fraction: Fraction| sink.lock().push(fraction));

        let source = Arc::new(source);
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        source.complete_unit();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(source.fraction_completed(), Fraction::Determinate(1.0));
        let values: Vec<f64> = seen.lock().iter().filter_map(Fraction::value).collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(values.iter().filter(|value| **value >= 1.0).count(), 1);
        assert_eq!(values.last(), Some(&1.0));
    }
}
