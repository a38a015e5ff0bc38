//! Task graph events and the in-process event bus.
//!
//! The bus pushes scheduler facts to live subscribers. Subscribers receive
//! on their own channels; a failing or lagging subscriber can never reach
//! back into the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::task::TaskResult;

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskGraphEvent {
    TaskPending {
        key: String,
        added_at: DateTime<Utc>,
    },
    TaskProcessing {
        key: String,
        version: String,
        started_at: DateTime<Utc>,
    },
    TaskComplete {
        result: TaskResult,
    },
    TaskError {
        result: TaskResult,
    },
    TaskGraphProcessing {
        started_at: DateTime<Utc>,
    },
    TaskGraphComplete {
        completed_at: DateTime<Utc>,
    },
}

impl TaskGraphEvent {
    /// The task key this event concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            TaskGraphEvent::TaskPending { key, .. }
            | TaskGraphEvent::TaskProcessing { key, .. } => Some(key),
            TaskGraphEvent::TaskComplete { result } | TaskGraphEvent::TaskError { result } => {
                Some(&result.key)
            }
            _ => None,
        }
    }
}

/// In-process event bus based on tokio broadcast channels.
#[derive(Clone)]
pub struct TaskEventBus {
    tx: broadcast::Sender<TaskGraphEvent>,
}

impl TaskEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all active subscribers. Having no subscribers is
    /// not an error.
    pub fn publish(&self, event: TaskGraphEvent) {
        match self.tx.send(event) {
            Ok(_) => {}
            Err(broadcast::error::SendError(_)) => {}
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskGraphEvent> {
        self.tx.subscribe()
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        // Default capacity for local realtime consumers.
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_delivers_events() {
        tokio_test::block_on(async {
            let bus = TaskEventBus::new(16);
            let mut rx = bus.subscribe();

            bus.publish(TaskGraphEvent::TaskGraphProcessing {
                started_at: Utc::now(),
            });

            let event = rx.recv().await.expect("event");
            assert!(matches!(event, TaskGraphEvent::TaskGraphProcessing { .. }));
        });
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = TaskEventBus::new(4);
        bus.publish(TaskGraphEvent::TaskGraphComplete {
            completed_at: Utc::now(),
        });
    }
}
