//! Waiting for a node to reach a terminal state.

use parking_lot::Mutex;
use progtree_core::Fraction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::handle::ProgressHandle;

/// How tracked work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reached 100%
    Completed,
    /// Cancelled before completing
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ProgressHandle {
    /// Resolve once the node completes or is cancelled, whichever is first.
    /// Resolves immediately if either already happened.
    pub async fn finished(&self) -> Outcome {
        let receiver = self.outcome_receiver();
        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => self.settled_outcome(),
        }
    }

    /// Blocking form of [`finished`](Self::finished).
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn finished_blocking(&self) -> Outcome {
        let receiver = self.outcome_receiver();
        match receiver.blocking_recv() {
            Ok(outcome) => outcome,
            Err(_) => self.settled_outcome(),
        }
    }

    fn settled_outcome(&self) -> Outcome {
        if self.is_complete() {
            Outcome::Completed
        } else {
            Outcome::Cancelled
        }
    }

    fn outcome_receiver(&self) -> oneshot::Receiver<Outcome> {
        let (sender, receiver) = oneshot::channel();
        let sender = Arc::new(Mutex::new(Some(sender)));
        let settle = move |outcome: Outcome| {
            if let Some(sender) = sender.lock().take() {
                let _ = sender.send(outcome);
            }
        };
        let settle = Arc::new(settle);

        let on_complete = Arc::clone(&settle);
        let subscribed = self.node.on_progress(Arc::new(move |fraction: Fraction| {
            if fraction.is_complete() {
                on_complete(Outcome::Completed);
            }
        }));
        if !subscribed {
            // Complete nodes reject cancellation, so there is nothing else to await
            settle(Outcome::Completed);
            return receiver;
        }

        let on_cancel = Arc::clone(&settle);
        self.node
            .on_cancel(Box::new(move || on_cancel(Outcome::Cancelled)));
        receiver
    }
}
