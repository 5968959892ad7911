//! Thread-bound current progress.
//!
//! Each thread keeps its own stack of `(node, pending units)` frames. A node
//! constructed while the top frame still holds its allocation becomes a
//! child of that frame's node and consumes the allocation. The frame itself
//! stays until the matching resign.
//!
//! The stack is never shared: a thread spawned to do work on behalf of
//! another starts with an empty stack.

use progtree_core::NodeId;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ProgressError, Result};
use crate::node::Node;

struct Frame {
    node: Arc<Node>,
    pending: i64,
    consumed: bool,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn push(node: Arc<Node>, pending: i64) {
    debug!(node = %node.id(), pending, "became current progress");
    STACK.with(|stack| {
        stack.borrow_mut().push(Frame {
            node,
            pending,
            consumed: false,
        })
    });
}

/// Pop the top frame, which must belong to `expected`.
///
/// An allocation no child consumed counts as completed work on the node.
pub(crate) fn pop(expected: NodeId) -> Result<()> {
    let frame = STACK.with(|stack| -> Result<Option<Frame>> {
        let mut stack = stack.borrow_mut();
        let actual = stack
            .last()
            .map(|frame| frame.node.id())
            .ok_or(ProgressError::NoCurrentProgress)?;
        if actual != expected {
            return Err(ProgressError::NotCurrent { expected, actual });
        }
        Ok(stack.pop())
    })?;

    // The stack borrow is released before touching the node: subscribers
    // may become current themselves.
    if let Some(frame) = frame {
        if !frame.consumed && frame.pending != 0 {
            debug!(
                node = %frame.node.id(),
                pending = frame.pending,
                "unconsumed allocation counted as completed"
            );
            let pending = frame.pending;
            frame.node.update_units(|account| account.add_completed(pending));
        }
    }
    Ok(())
}

/// Take the top frame's allocation, if it is still available.
pub(crate) fn claim_pending() -> Option<(Arc<Node>, i64)> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let top = stack.last_mut()?;
        if top.consumed {
            return None;
        }
        top.consumed = true;
        Some((Arc::clone(&top.node), top.pending))
    })
}

/// Node on top of this thread's stack.
pub(crate) fn current_node() -> Option<Arc<Node>> {
    STACK.with(|stack| stack.borrow().last().map(|frame| Arc::clone(&frame.node)))
}

/// Units the next progress constructed on this thread would be attached
/// with, or `None` if it would become a root.
pub fn pending_units() -> Option<i64> {
    STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .filter(|frame| !frame.consumed)
            .map(|frame| frame.pending)
    })
}
