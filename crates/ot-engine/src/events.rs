/// Outbound notifications for transports and observers
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{DocumentId, Operation, Revision, UserId};

/// Event emitted by the engine, in per-document revision order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    OperationApplied {
        document_id: DocumentId,
        operation: Operation,
        revision: Revision,
        user_id: UserId,
    },

    UserJoined {
        document_id: DocumentId,
        user_id: UserId,
        active_users: Vec<UserId>,
    },

    UserLeft {
        document_id: DocumentId,
        user_id: UserId,
        active_users: Vec<UserId>,
    },
}

impl EngineEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            EngineEvent::OperationApplied { document_id, .. }
            | EngineEvent::UserJoined { document_id, .. }
            | EngineEvent::UserLeft { document_id, .. } => document_id,
        }
    }
}

/// Fan-out of engine events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_event_bus_fan_out() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::UserJoined {
            document_id: DocumentId::from("doc"),
            user_id: UserId::from("alice"),
            active_users: vec![UserId::from("alice")],
        });

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.document_id(), &DocumentId::from("doc"));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(EngineEvent::UserLeft {
            document_id: DocumentId::from("doc"),
            user_id: UserId::from("alice"),
            active_users: vec![],
        });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::UserLeft {
            document_id: DocumentId::from("doc"),
            user_id: UserId::from("bob"),
            active_users: vec![],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "user_left", "document_id": "doc", "user_id": "bob", "active_users": []})
        );
    }
}
