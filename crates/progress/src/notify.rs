//! Subscriber registries and delivery.
//!
//! Registries live inside the node's lock. Callbacks are always invoked
//! after the lock is released, so a subscriber may register more
//! subscribers or mutate the node it observes.
//!
//! Progress delivery is serialized per node without holding a lock: the
//! first thread to deliver keeps draining while the node is marked dirty;
//! everyone else only marks it dirty.

use progtree_core::{Fraction, NodeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::node::Node;

/// Invoked on every fraction change until completion.
pub(crate) type ProgressCallback = Arc<dyn Fn(Fraction) + Send + Sync>;

/// Invoked at most once, for cancellation or pause.
pub(crate) type SignalCallback = Box<dyn FnOnce() + Send>;

pub(crate) struct Registries {
    progress: Vec<ProgressCallback>,
    cancellation: Vec<SignalCallback>,
    pause: Vec<SignalCallback>,
    cancellation_reported: bool,
    pause_reported: bool,
    delivering: bool,
    dirty: bool,
    last_delivered: Fraction,
}

impl Registries {
    pub(crate) fn new(initial: Fraction) -> Self {
        Self {
            progress: Vec::new(),
            cancellation: Vec::new(),
            pause: Vec::new(),
            cancellation_reported: false,
            pause_reported: false,
            delivering: false,
            dirty: false,
            last_delivered: initial,
        }
    }

    /// Queue a progress subscriber. Rejected once `current` is complete.
    fn add_progress(&mut self, callback: ProgressCallback, current: Fraction) -> bool {
        if current.is_complete() {
            return false;
        }
        self.progress.push(callback);
        true
    }

    /// Subscribers to notify with `fraction`, or `None` when nothing moved.
    fn next_delivery(&mut self, fraction: Fraction) -> Option<Vec<ProgressCallback>> {
        if fraction == self.last_delivered {
            return None;
        }
        self.last_delivered = fraction;
        let callbacks = self.progress.clone();
        if fraction.is_complete() {
            self.progress.clear();
        }
        Some(callbacks)
    }

    /// Drain cancellation subscribers and mark the event reported.
    pub(crate) fn take_cancellation(&mut self) -> Vec<SignalCallback> {
        self.cancellation_reported = true;
        std::mem::take(&mut self.cancellation)
    }

    /// Drain pause subscribers and mark the event reported.
    pub(crate) fn take_pause(&mut self) -> Vec<SignalCallback> {
        self.pause_reported = true;
        std::mem::take(&mut self.pause)
    }

    #[cfg(test)]
    pub(crate) fn cancellation_subscribers(&self) -> usize {
        self.cancellation.len()
    }

    /// Queue `callback`, or hand it back for immediate replay when the event
    /// was already reported and `active` still holds.
    fn register_cancellation(
        &mut self,
        callback: SignalCallback,
        active: bool,
    ) -> Option<SignalCallback> {
        register_signal(
            &mut self.cancellation,
            self.cancellation_reported,
            callback,
            active,
        )
    }

    fn register_pause(&mut self, callback: SignalCallback, active: bool) -> Option<SignalCallback> {
        register_signal(&mut self.pause, self.pause_reported, callback, active)
    }
}

fn register_signal(
    queue: &mut Vec<SignalCallback>,
    reported: bool,
    callback: SignalCallback,
    active: bool,
) -> Option<SignalCallback> {
    if !reported {
        queue.push(callback);
        return None;
    }
    active.then_some(callback)
}

/// Run a subscriber, containing any panic it raises.
fn invoke(node: NodeId, event: &'static str, callback: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(node = %node, event, "progress subscriber panicked");
    }
}

impl Node {
    /// Subscribe to fraction changes. Returns `false` (and drops the
    /// callback) if the node is already complete.
    pub(crate) fn on_progress(&self, callback: ProgressCallback) -> bool {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let current = st.fraction();
        st.registries.add_progress(callback, current)
    }

    pub(crate) fn on_cancel(&self, callback: SignalCallback) {
        let immediate = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            st.registries.register_cancellation(callback, st.cancelled)
        };
        if let Some(callback) = immediate {
            invoke(self.id(), "cancellation", callback);
        }
    }

    pub(crate) fn on_pause(&self, callback: SignalCallback) {
        let immediate = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            st.registries.register_pause(callback, st.paused)
        };
        if let Some(callback) = immediate {
            invoke(self.id(), "pause", callback);
        }
    }

    /// Deliver the latest fraction to progress subscribers.
    pub(crate) fn deliver_progress(&self) {
        {
            let mut st = self.state.lock();
            st.registries.dirty = true;
            if st.registries.delivering {
                return;
            }
            st.registries.delivering = true;
        }

        loop {
            let (fraction, callbacks) = {
                let mut guard = self.state.lock();
                let st = &mut *guard;
                if !st.registries.dirty {
                    st.registries.delivering = false;
                    return;
                }
                st.registries.dirty = false;
                let fraction = st.fraction();
                match st.registries.next_delivery(fraction) {
                    Some(callbacks) => (fraction, callbacks),
                    None => continue,
                }
            };

            trace!(node = %self.id(), %fraction, subscribers = callbacks.len(), "delivering progress");
            for callback in callbacks {
                invoke(self.id(), "progress", || callback(fraction));
            }
        }
    }

    pub(crate) fn fire_once(&self, event: &'static str, callbacks: Vec<SignalCallback>) {
        for callback in callbacks {
            invoke(self.id(), event, callback);
        }
    }
}
