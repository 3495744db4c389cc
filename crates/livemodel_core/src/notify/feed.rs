//! Change feed distributing notifications to subscribers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let all = db.subscribe();
//! let people = db.subscribe_to("person");
//!
//! std::thread::spawn(move || {
//!     while let Ok(note) = people.recv() {
//!         println!("{:?} on {} instances", note.kind, note.instances.len());
//!     }
//! });
//! ```

use super::change::{ChangeKind, ChangeNotification};
use crate::instance::Instance;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

struct Subscriber {
    model: Option<String>,
    tx: Sender<ChangeNotification>,
}

/// Distributes change notifications to subscribers.
///
/// The feed:
/// - delivers in emission order to each subscriber
/// - supports any number of subscribers, filtered by model or not
/// - drops subscribers whose receiver is gone
/// - keeps no history, since notifications hold instances alive
pub(crate) struct ChangeFeed {
    subscribers: RwLock<Vec<Subscriber>>,
    sequence: AtomicU64,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to notifications for every model.
    pub(crate) fn subscribe(&self) -> Receiver<ChangeNotification> {
        self.add(None)
    }

    /// Subscribes to notifications for one model (exact name match).
    pub(crate) fn subscribe_to(&self, model: &str) -> Receiver<ChangeNotification> {
        self.add(Some(model.to_string()))
    }

    fn add(&self, model: Option<String>) -> Receiver<ChangeNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(Subscriber { model, tx });
        rx
    }

    /// Emits one notification. Returns its sequence number.
    pub(crate) fn emit(
        &self,
        model: &str,
        kind: ChangeKind,
        instances: Vec<Instance>,
        changed_fields: BTreeSet<String>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let note = ChangeNotification {
            sequence,
            model: model.to_string(),
            kind,
            instances,
            changed_fields,
        };

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|s| match &s.model {
            Some(m) if m != model => true,
            _ => s.tx.send(note.clone()).is_ok(),
        });
        sequence
    }

    /// Number of active subscribers.
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Disconnects every subscriber.
    pub(crate) fn close(&self) {
        self.subscribers.write().clear();
    }
}
