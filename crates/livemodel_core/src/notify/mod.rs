//! Change notifications: the feed, notification batches and delivery.

mod batch;
mod change;
mod feed;

pub use batch::Batch;
pub(crate) use batch::Delivery;
pub use change::{ChangeKind, ChangeNotification};
pub(crate) use feed::ChangeFeed;

use crate::database::Database;
use crate::instance::Instance;
use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use tracing::{debug, trace};

impl Database {
    /// Subscribes to change notifications for every model.
    ///
    /// Notifications hold their instances alive until received and dropped,
    /// so receivers should be drained regularly.
    pub fn subscribe(&self) -> Receiver<ChangeNotification> {
        self.feed.subscribe()
    }

    /// Subscribes to change notifications for one model.
    ///
    /// Only notifications for exactly this model are delivered; subtypes
    /// have their own notifications.
    pub fn subscribe_to(&self, model: &str) -> Receiver<ChangeNotification> {
        self.feed.subscribe_to(model)
    }

    /// Runs `f` with notifications batched.
    ///
    /// Operations performed through the [`Batch`] have their notifications
    /// merged per (model, kind). When `f` returns, the merged notifications
    /// are delivered if `deliver` is true and discarded otherwise. Operations
    /// performed directly on the database, including from other threads,
    /// are not affected.
    pub fn with_batched_notifications<R>(&self, deliver: bool, f: impl FnOnce(&Batch<'_>) -> R) -> R {
        let batch = Batch::new(self);
        let out = f(&batch);
        let pending = batch.into_pending();

        if deliver {
            let mut delivered = 0usize;
            for (model, kind, instances, fields) in pending.into_notifications() {
                self.feed.emit(&model, kind, instances, fields);
                self.stats.record_notification();
                delivered += 1;
            }
            debug!(delivered, "notification batch delivered");
        } else {
            debug!(discarded = pending.len(), "notification batch discarded");
        }
        out
    }

    /// Publishes a change and the matching `AnyChange`.
    pub(crate) fn publish(
        &self,
        delivery: &Delivery<'_>,
        model: &str,
        kind: ChangeKind,
        instances: Vec<Instance>,
        changed_fields: BTreeSet<String>,
    ) {
        match delivery {
            Delivery::Immediate => {
                trace!(model, ?kind, count = instances.len(), "notify");
                self.feed
                    .emit(model, kind, instances.clone(), changed_fields.clone());
                self.feed
                    .emit(model, ChangeKind::AnyChange, instances, changed_fields);
                self.stats.record_notification();
                self.stats.record_notification();
            }
            Delivery::Batched(pending) => {
                let mut pending = pending.borrow_mut();
                pending.add(model, kind, &instances, &changed_fields);
                pending.add(model, ChangeKind::AnyChange, &instances, &changed_fields);
            }
        }
    }
}
