//! Post-commit event publication to consuming agents.

use chrono::{DateTime, Utc};
use ml2_driver_api::{Operation, ResourceKind};
use ml2_types::ResourceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One lifecycle event as seen by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonically increasing per notifier.
    pub sequence: u64,
    pub resource_kind: ResourceKind,
    pub operation: Operation,
    pub resource_id: ResourceId,
    /// Resulting state (the last known state for deletions).
    pub state: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

struct Subscriber {
    filter: Option<ResourceKind>,
    tx: mpsc::UnboundedSender<Notification>,
}

/// Fan-out of notifications to any number of subscribers.
///
/// Publishing never blocks; subscribers whose receiver was dropped are
/// removed on the next publish.
pub struct Notifier {
    sequence: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to every event, or only to events for `filter`.
    pub fn subscribe(&self, filter: Option<ResourceKind>) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber { filter, tx });
        debug!("Notifier subscriber added (filter={:?}), {} total", filter, subscribers.len());
        rx
    }

    /// Publishes one event. Returns the notification that was sent.
    pub fn publish(
        &self,
        resource_kind: ResourceKind,
        operation: Operation,
        resource_id: ResourceId,
        state: Value,
    ) -> Notification {
        let notification = Notification {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            resource_kind,
            operation,
            resource_id,
            state,
            timestamp: Utc::now(),
        };

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sub| {
            if sub.filter.is_some_and(|f| f != resource_kind) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(notification.clone()).is_ok()
        });
        trace!(
            "Published {}_{} {} (seq {}) to {} subscribers",
            operation,
            resource_kind,
            resource_id,
            notification.sequence,
            subscribers.len()
        );
        notification
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_sequence_and_delivery() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe(None);
        let id = ResourceId::new_v4();

        notifier.publish(ResourceKind::Network, Operation::Create, id, json!({"name": "a"}));
        notifier.publish(ResourceKind::Network, Operation::Delete, id, json!({"name": "a"}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.operation, Operation::Delete);
        assert_eq!(first.resource_id, id);
    }

    #[tokio::test]
    async fn test_filter() {
        let notifier = Notifier::new();
        let mut ports = notifier.subscribe(Some(ResourceKind::Port));
        notifier.publish(ResourceKind::Network, Operation::Create, ResourceId::new_v4(), json!({}));
        let port_id = ResourceId::new_v4();
        notifier.publish(ResourceKind::Port, Operation::Create, port_id, json!({}));

        let got = ports.recv().await.unwrap();
        assert_eq!(got.resource_id, port_id);
        assert!(ports.try_recv().is_err());
    }

    #[test]
    fn test_closed_subscribers_dropped() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe(None);
        let _kept = notifier.subscribe(None);
        assert_eq!(notifier.subscriber_count(), 2);

        drop(rx);
        notifier.publish(ResourceKind::Subnet, Operation::Update, ResourceId::new_v4(), json!({}));
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = Notifier::new();
        let n = notifier.publish(ResourceKind::Port, Operation::Delete, ResourceId::new_v4(), json!(null));
        let value: Value = serde_json::from_str(&n.to_json()).unwrap();
        assert_eq!(value["resource_kind"], "port");
        assert_eq!(value["operation"], "delete");
    }
}
