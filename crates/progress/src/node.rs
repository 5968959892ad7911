//! Progress tree nodes.
//!
//! A [`Node`] owns its unit account, its attached children and its
//! subscriber registries behind a single mutex. Changes cascade bottom-up:
//! a node recomputes its fraction, delivers it, then hands the new value to
//! its parent. At most one node's lock is held at any time.

use parking_lot::Mutex;
use progtree_core::{
    describe_fraction, describe_units, ChildSnapshot, Fraction, NodeId, ProgressSnapshot,
    UnitAccount,
};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::config::SourceConfig;
use crate::current;
use crate::error::{ProgressError, Result};
use crate::notify::{Registries, SignalCallback};

/// A single entity in the progress tree.
pub(crate) struct Node {
    id: NodeId,
    parent: Option<Weak<Node>>,
    pub(crate) state: Mutex<NodeState>,
}

/// Everything guarded by a node's lock.
pub(crate) struct NodeState {
    pub(crate) account: UnitAccount,
    pub(crate) children: Vec<ChildSlot>,
    /// Bumped on every change that can move the fraction
    pub(crate) revision: u64,
    pub(crate) cancellable: bool,
    pub(crate) cancelled: bool,
    pub(crate) pausable: bool,
    pub(crate) paused: bool,
    pub(crate) kind: Option<String>,
    pub(crate) user_info: BTreeMap<String, Value>,
    pub(crate) description: Option<String>,
    pub(crate) additional_description: Option<String>,
    pub(crate) registries: Registries,
}

/// A child as tracked by its parent.
pub(crate) struct ChildSlot {
    pub(crate) node: Arc<Node>,
    /// Parent units reserved for the child
    pub(crate) pending: i64,
    /// Last child fraction applied
    pub(crate) fraction: Fraction,
    /// Child revision `fraction` was read at
    pub(crate) revision: u64,
    /// Set once the child completed and `pending` moved into the account
    pub(crate) folded: bool,
}

/// A cancel or pause transition taken under the lock, fired after it.
struct Signal {
    callbacks: Vec<SignalCallback>,
    children: Vec<Arc<Node>>,
}

impl NodeState {
    /// Direct units plus the in-flight share of every unfolded child.
    pub(crate) fn fraction(&self) -> Fraction {
        let in_flight: f64 = self
            .children
            .iter()
            .filter(|slot| !slot.folded)
            .map(|slot| slot.pending as f64 * slot.fraction.value().unwrap_or(0.0))
            .sum();
        self.account.fraction_with_contribution(in_flight)
    }

    /// Set `cancelled`, unless it already was.
    fn begin_cancel(&mut self) -> Option<Signal> {
        if self.cancelled {
            return None;
        }
        self.cancelled = true;
        Some(Signal {
            callbacks: self.registries.take_cancellation(),
            children: self.child_nodes(),
        })
    }

    /// Set `paused`, unless it already was.
    fn begin_pause(&mut self) -> Option<Signal> {
        if self.paused {
            return None;
        }
        self.paused = true;
        Some(Signal {
            callbacks: self.registries.take_pause(),
            children: self.child_nodes(),
        })
    }

    fn child_nodes(&self) -> Vec<Arc<Node>> {
        self.children
            .iter()
            .map(|slot| Arc::clone(&slot.node))
            .collect()
    }
}

impl Node {
    /// Create a node, adopting the calling thread's current progress as
    /// parent when it still has an unconsumed allocation.
    pub(crate) fn new(config: &SourceConfig) -> Arc<Node> {
        let attachment = current::claim_pending();
        let account = UnitAccount::new(config.total_units);
        let initial = account.fraction_completed();

        let node = Arc::new(Node {
            id: NodeId::new(),
            parent: attachment
                .as_ref()
                .map(|(parent, _)| Arc::downgrade(parent)),
            state: Mutex::new(NodeState {
                account,
                children: Vec::new(),
                revision: 0,
                cancellable: config.cancellable,
                cancelled: false,
                pausable: config.pausable,
                paused: false,
                kind: config.kind.clone(),
                user_info: BTreeMap::new(),
                description: None,
                additional_description: None,
                registries: Registries::new(initial),
            }),
        });

        if let Some((parent, pending)) = attachment {
            parent.attach(&node, pending, initial);
        }
        node
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn parent(&self) -> Option<Arc<Node>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn fraction(&self) -> Fraction {
        self.state.lock().fraction()
    }

    fn attach(self: &Arc<Self>, child: &Arc<Node>, pending: i64, fraction: Fraction) {
        let (cancelled, paused) = {
            let mut st = self.state.lock();
            st.children.push(ChildSlot {
                node: Arc::clone(child),
                pending,
                fraction,
                revision: 0,
                folded: false,
            });
            st.revision += 1;
            (st.cancelled, st.paused)
        };
        debug!(parent = %self.id, child = %child.id, pending, "attached child progress");

        // A late child inherits the parent's terminal signals.
        if cancelled {
            Self::cascade_cancel(child.mark_cancelled());
        }
        if paused {
            Self::cascade_pause(child.mark_paused());
        }
        self.changed();
    }

    /// Apply `update` to the unit account and cascade the change.
    pub(crate) fn update_units(self: &Arc<Self>, update: impl FnOnce(&mut UnitAccount)) {
        {
            let mut st = self.state.lock();
            update(&mut st.account);
            st.revision += 1;
        }
        self.changed();
    }

    /// Deliver this node's fraction, then push it to the parent.
    pub(crate) fn changed(self: &Arc<Self>) {
        self.deliver_progress();

        let Some(parent) = self.parent() else {
            return;
        };
        let (fraction, revision) = {
            let st = self.state.lock();
            (st.fraction(), st.revision)
        };
        parent.child_changed(self.id, fraction, revision);
    }

    fn child_changed(self: &Arc<Self>, child: NodeId, fraction: Fraction, revision: u64) {
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let Some(slot) = st.children.iter_mut().find(|slot| slot.node.id == child) else {
                return;
            };
            if slot.folded || revision <= slot.revision {
                return;
            }
            slot.revision = revision;
            slot.fraction = fraction;
            if fraction.is_complete() {
                slot.folded = true;
                st.account.add_completed(slot.pending);
            }
            st.revision += 1;
        }
        self.changed();
    }

    /// Cancel this node and every attached descendant.
    pub(crate) fn try_cancel(&self) -> Result<()> {
        let signal = {
            let mut st = self.state.lock();
            if !st.cancelled && st.fraction().is_complete() {
                return Err(ProgressError::AlreadyComplete(self.id));
            }
            st.begin_cancel()
        };
        Self::cascade_cancel(self.fire_signal("cancellation", signal));
        Ok(())
    }

    fn cascade_cancel(children: Option<Vec<Arc<Node>>>) {
        let mut queue: VecDeque<Arc<Node>> = children.unwrap_or_default().into();
        while let Some(node) = queue.pop_front() {
            if let Some(grandchildren) = node.mark_cancelled() {
                queue.extend(grandchildren);
            }
        }
    }

    /// Cancel a descendant. Returns the children to visit next, or `None`
    /// if the node was already cancelled.
    fn mark_cancelled(&self) -> Option<Vec<Arc<Node>>> {
        let signal = self.state.lock().begin_cancel();
        self.fire_signal("cancellation", signal)
    }

    /// Pause this node and every pausable descendant reachable through
    /// pausable nodes.
    pub(crate) fn try_pause(&self) -> Result<()> {
        let signal = {
            let mut st = self.state.lock();
            if !st.paused && st.fraction().is_complete() {
                return Err(ProgressError::AlreadyComplete(self.id));
            }
            st.begin_pause()
        };
        Self::cascade_pause(self.fire_signal("pause", signal));
        Ok(())
    }

    fn cascade_pause(children: Option<Vec<Arc<Node>>>) {
        let mut queue: VecDeque<Arc<Node>> = children.unwrap_or_default().into();
        while let Some(node) = queue.pop_front() {
            if let Some(grandchildren) = node.mark_paused() {
                queue.extend(grandchildren);
            }
        }
    }

    /// Pause a descendant. Non-pausable nodes stop the descent.
    fn mark_paused(&self) -> Option<Vec<Arc<Node>>> {
        let signal = {
            let mut st = self.state.lock();
            if st.pausable {
                st.begin_pause()
            } else {
                None
            }
        };
        self.fire_signal("pause", signal)
    }

    /// Fire a transition's subscribers and hand back its children.
    fn fire_signal(&self, event: &'static str, signal: Option<Signal>) -> Option<Vec<Arc<Node>>> {
        let Signal { callbacks, children } = signal?;
        debug!(
            node = %self.id,
            event,
            subscribers = callbacks.len(),
            children = children.len(),
            "progress signalled"
        );
        self.fire_once(event, callbacks);
        Some(children)
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let (mut snapshot, children) = {
            let st = self.state.lock();
            let fraction = st.fraction();
            let snapshot = ProgressSnapshot {
                id: self.id,
                timestamp: chrono::Utc::now(),
                kind: st.kind.clone(),
                total_units: st.account.total(),
                completed_units: st.account.completed(),
                fraction,
                description: st
                    .description
                    .clone()
                    .unwrap_or_else(|| describe_fraction(fraction)),
                additional_description: st
                    .additional_description
                    .clone()
                    .unwrap_or_else(|| describe_units(&st.account)),
                cancellable: st.cancellable,
                cancelled: st.cancelled,
                pausable: st.pausable,
                paused: st.paused,
                user_info: st.user_info.clone(),
                children: Vec::new(),
            };
            let children: Vec<_> = st
                .children
                .iter()
                .map(|slot| (Arc::clone(&slot.node), slot.pending, slot.folded))
                .collect();
            (snapshot, children)
        };

        snapshot.children = children
            .into_iter()
            .map(|(node, pending_units, folded)| ChildSnapshot {
                pending_units,
                folded,
                progress: node.snapshot(),
            })
            .collect();
        snapshot
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("parent", &self.parent().map(|parent| parent.id))
            .finish_non_exhaustive()
    }
}
