//! Domain event system: decoupled notification of life-cycle changes.
//!
//! Events are published when agents register, links complete, and
//! operations start or finish. Subscribers filter for what they need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::operation::Access;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new agent beaconed in for the first time
    AgentAdded {
        paw: String,
        host: String,
        group: String,
        contact: String,
        timestamp: DateTime<Utc>,
    },

    /// A link reached a terminal status
    LinkCompleted {
        paw: String,
        link_id: String,
        pid: i64,
        status: i32,
        access: Access,
        timestamp: DateTime<Utc>,
    },

    /// An operation's run loop started
    OperationStarted {
        operation_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// An operation's run loop exited and the operation was closed
    OperationFinished {
        operation_id: String,
        name: String,
        links: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Exchange the event is published on.
    pub fn exchange(&self) -> &'static str {
        match self {
            DomainEvent::AgentAdded { .. } => "agent",
            DomainEvent::LinkCompleted { .. } => "link",
            DomainEvent::OperationStarted { .. } | DomainEvent::OperationFinished { .. } => {
                "operation"
            }
        }
    }

    /// Queue within the exchange.
    pub fn queue(&self) -> &'static str {
        match self {
            DomainEvent::AgentAdded { .. } => "added",
            DomainEvent::LinkCompleted { .. } => "completed",
            DomainEvent::OperationStarted { .. } => "started",
            DomainEvent::OperationFinished { .. } => "finished",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn fire_event(&self, event: DomainEvent) {
        tracing::debug!(exchange = event.exchange(), queue = event.queue(), "Event fired");
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
