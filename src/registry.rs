//! Subscription registry: which client wants which label.

use crate::backend::Backend;
use crate::delivery::DeliveryTracker;
use crate::error::Result;
use crate::sweep::{SweepStats, Sweeper};
use crate::types::{ClientId, Label, LabelSelector, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// What an unsubscribe removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unsubscribed {
    /// Subscription rows deleted.
    pub subscriptions: u64,
    /// Pending delivery markers dropped with them.
    pub markers: u64,
    /// The sweep that followed.
    pub sweep: SweepStats,
}

/// Tracks client interest in labels.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    backend: Arc<dyn Backend>,
    delivery: DeliveryTracker,
    sweeper: Sweeper,
}

impl SubscriptionRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            delivery: DeliveryTracker::new(Arc::clone(&backend)),
            sweeper: Sweeper::new(Arc::clone(&backend)),
            backend,
        }
    }

    /// Subscribe `client` to `label`. Idempotent: returns false if the
    /// subscription already existed.
    pub fn subscribe(&self, client: &ClientId, label: &Label) -> Result<bool> {
        let created = self
            .backend
            .insert_subscription(client, label, Timestamp::now())?;
        debug!(client = %client, label = %label, created, "subscribe");
        Ok(created)
    }

    /// Remove the selected subscriptions of `client`, drop its pending
    /// markers for them, then sweep.
    pub fn unsubscribe(&self, client: &ClientId, selector: &LabelSelector) -> Result<Unsubscribed> {
        let subscriptions = self.backend.delete_subscriptions(client, selector)?;
        let markers = self.delivery.discard(client, selector)?;
        debug!(client = %client, selector = %selector, subscriptions, markers, "unsubscribe");

        let sweep = self.sweeper.sweep()?;
        Ok(Unsubscribed {
            subscriptions,
            markers,
            sweep,
        })
    }

    /// Snapshot of the clients subscribed to `label`.
    ///
    /// Not a live view: a subscription committed right after this read is not
    /// reflected, and emit takes its own snapshot inside its transaction.
    pub fn subscribers_of(&self, label: &Label) -> Result<Vec<ClientId>> {
        self.backend.subscribers_of(label)
    }

    /// Labels `client` is subscribed to.
    pub fn labels_of(&self, client: &ClientId) -> Result<Vec<Label>> {
        self.backend.labels_of(client)
    }
}
