//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when ingestion commits, memory changes, or a turn
//! moves between orchestrator phases. Subscribers react without the
//! publishers knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::conversation::TurnState;
use crate::persona::PersonaMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// All chunks of a document became visible.
    DocumentIngested {
        job_id: String,
        source_ref: String,
        chunk_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A document was rejected or failed; nothing was stored.
    IngestionFailed {
        job_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A curation or store mutation happened.
    MemoryMutated {
        entry_id: String,
        operation: String, // "confirm", "correct", "delete", "report_stale"
        actor: String,
        timestamp: DateTime<Utc>,
    },

    TurnStateChanged {
        conversation_id: String,
        from: TurnState,
        to: TurnState,
        timestamp: DateTime<Utc>,
    },

    PersonaSwitched {
        conversation_id: String,
        from: PersonaMode,
        to: PersonaMode,
        timestamp: DateTime<Utc>,
    },

    ConversationDeleted {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::DocumentIngested {
            job_id: "j1".into(),
            source_ref: "notes.txt".into(),
            chunk_count: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::DocumentIngested { job_id, chunk_count, .. } => {
                assert_eq!(job_id, "j1");
                assert_eq!(*chunk_count, 3);
            }
            _ => panic!("Expected DocumentIngested event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
