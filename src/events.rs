//! Status-message channel for the relay
//!
//! Control-surface calls are fire-and-forget; callers observe outcomes
//! through this broadcast bus, exposed to UIs as an SSE endpoint.
//! One-to-many broadcasting via `tokio::sync::broadcast`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Relay event types
///
/// Serialized to JSON for SSE transmission; timestamps are UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// A track has been handed to the playback daemon
    TrackStarted {
        title: String,
        artist: String,
        /// 1-based position in the queue
        position: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A resolution is in flight for the focused entry
    Resolving {
        query: String,
        timestamp: DateTime<Utc>,
    },

    /// Resolution failed, fallback included
    ResolveFailed {
        query: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A background preload item failed; queue and playback are unaffected
    PreloadFailed {
        query: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// `next()` past the last entry
    EndOfQueue { timestamp: DateTime<Utc> },

    /// `previous()` before the first entry
    TopOfQueue { timestamp: DateTime<Utc> },

    /// Queue contents or cursor changed
    QueueChanged {
        len: usize,
        cursor: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// An advance call was dropped because a transition is in flight
    TransitionBusy {
        op: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback stopped on user request
    StreamStopped { timestamp: DateTime<Utc> },

    /// The active profile resolved to a bare codec descriptor; playback
    /// proceeds but the transcoder input may be unreliable
    FormatWarning {
        profile: String,
        descriptor: String,
        timestamp: DateTime<Utc>,
    },

    /// A higher-priority audio source took the output; the relay yielded
    RendererPreempted { timestamp: DateTime<Utc> },

    /// Playback daemon handoff failed
    PlayerError {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus carrying [`RelayEvent`]s to all subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_counts_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.capacity(), 16);
    }

    #[tokio::test]
    async fn emit_lossy_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit_lossy(RelayEvent::EndOfQueue {
            timestamp: Utc::now(),
        });
        match rx.recv().await.unwrap() {
            RelayEvent::EndOfQueue { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_lossy_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.emit_lossy(RelayEvent::StreamStopped {
            timestamp: Utc::now(),
        });
    }
}
