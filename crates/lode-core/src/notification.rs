//! Commit and size-limit notifications
//!
//! Every environment owns a [`Notifier`]. Subscribers receive an unbounded
//! channel; delivery is fire-and-forget and never affects data correctness.

use crate::error::ErrorKind;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A writable transaction committed with at least one mutation
    Committed {
        environment: PathBuf,
        databases: BTreeSet<String>,
    },

    /// A commit failed because the map or the transaction ran out of room
    SizeLimitReached {
        environment: PathBuf,
        kind: ErrorKind,
    },
}

impl Notification {
    pub fn environment(&self) -> &PathBuf {
        match self {
            Notification::Committed { environment, .. } => environment,
            Notification::SizeLimitReached { environment, .. } => environment,
        }
    }
}

/// Multi-subscriber broadcaster for [`Notification`]s
pub struct Notifier {
    subscribers: RwLock<Vec<Sender<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to all future notifications
    ///
    /// Dropping the receiver unsubscribes; the sender is pruned on the next emit.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    pub fn emit(&self, notification: Notification) {
        tracing::trace!(?notification, "emitting notification");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
