//! Session event bus
//!
//! Detectors and the session controller publish here; downstream consumers
//! (UI, persistence, transcription) subscribe without coupling to pipeline
//! internals. Emission is best-effort: with no live subscriber, events are
//! dropped silently.

use tokio::sync::broadcast;

use crate::session::SessionState;
use crate::wake::DetectionScore;

/// Buffered events per subscriber before lagging
const CHANNEL_CAPACITY: usize = 256;

/// Events published by the pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    /// Session controller moved between states
    StateChanged {
        /// State before the transition
        old: SessionState,
        /// State after the transition
        new: SessionState,
    },
    /// A wake score was produced (every processed frame)
    WakeScore(DetectionScore),
    /// A wake score crossed the detection threshold
    WakeDetected {
        /// The triggering score
        score: DetectionScore,
    },
    /// Debounced voice activity began
    SpeechStart,
    /// Debounced voice activity ended
    SpeechEnd,
}

/// Broadcast channel for [`SessionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; silently dropped when nobody listens
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Open a new subscription
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::SpeechStart);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::SpeechStart);
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::SpeechEnd);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
