//! Event types for the Ensemble event system
//!
//! The queue controller broadcasts typed events via the `EventBus`
//! (tokio broadcast channel); subscribers (SSE clients, other controllers)
//! drain them in emission order. Emission is lossy by design: a queue must
//! never block on a slow subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the queue engine
///
/// Serialized (tagged with `type`) for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnsembleEvent {
    /// A player queue was registered
    QueueAdded {
        queue_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue state changed (state, current item, settings, ...)
    QueueUpdated {
        queue_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue item list changed (load, move, delete, shuffle, radio refill)
    QueueItemsUpdated {
        queue_id: Uuid,
        item_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Lightweight per-second elapsed time tick
    ///
    /// Sent instead of a full QueueUpdated when nothing but the clock moved;
    /// never triggers a persistence write.
    QueueTimeUpdated {
        queue_id: Uuid,
        elapsed_time: u64,
    },

    /// A media item finished playing (or crossed the progress threshold)
    MediaItemPlayed {
        queue_id: Uuid,
        uri: String,
        seconds_played: u64,
        fully_played: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EnsembleEvent {
    /// Queue this event belongs to
    pub fn queue_id(&self) -> Uuid {
        match self {
            EnsembleEvent::QueueAdded { queue_id, .. }
            | EnsembleEvent::QueueUpdated { queue_id, .. }
            | EnsembleEvent::QueueItemsUpdated { queue_id, .. }
            | EnsembleEvent::QueueTimeUpdated { queue_id, .. }
            | EnsembleEvent::MediaItemPlayed { queue_id, .. } => *queue_id,
        }
    }

    /// Event type string used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            EnsembleEvent::QueueAdded { .. } => "queue_added",
            EnsembleEvent::QueueUpdated { .. } => "queue_updated",
            EnsembleEvent::QueueItemsUpdated { .. } => "queue_items_updated",
            EnsembleEvent::QueueTimeUpdated { .. } => "queue_time_updated",
            EnsembleEvent::MediaItemPlayed { .. } => "media_item_played",
        }
    }
}

/// Broadcast bus for `EnsembleEvent`
pub struct EventBus {
    tx: broadcast::Sender<EnsembleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EnsembleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscribers case
    pub fn emit(&self, event: EnsembleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
