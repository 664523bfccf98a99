//! Session state machine
//!
//! Three states drive the always-listening loop: `Initialization` (models
//! loading, nothing scanned), `Idle` (wake word scanning), and `Listening`
//! (voice activity tracking after a wake trigger). Transitions are guarded
//! by a post-detection cooldown and an optional silence timer; every
//! transition publishes exactly one `StateChanged` event.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::events::{EventBus, SessionEvent};

/// Session controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Entry-only; reachable again via explicit [`SessionController::stop`]
    Initialization,
    /// Scanning for the wake word
    Idle,
    /// Active listening after a wake trigger
    Listening,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialization => "initialization",
            Self::Idle => "idle",
            Self::Listening => "listening",
        };
        write!(f, "{name}")
    }
}

/// Session controller configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Post-detection window during which further detections are ignored
    pub cooldown_ms: u64,
    /// Listening ends after this long without voice activity
    pub silence_timeout_ms: u64,
    /// End listening automatically on sustained silence
    pub auto_end: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 2000,
            silence_timeout_ms: 1800,
            auto_end: true,
        }
    }
}

impl SessionConfig {
    /// Cooldown window as a [`Duration`]
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Silence timeout as a [`Duration`]
    #[must_use]
    pub const fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}

/// Finite state machine coordinating wake detection and active listening
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    bus: EventBus,
    cooldown_until: Option<Instant>,
    silence_deadline: Option<Instant>,
    heard_speech: bool,
}

impl SessionController {
    /// Create a controller in `Initialization`
    #[must_use]
    pub fn new(config: SessionConfig, bus: EventBus) -> Self {
        Self {
            config,
            state: SessionState::Initialization,
            bus,
            cooldown_until: None,
            silence_deadline: None,
            heard_speech: false,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the wake pipeline should be scanning frames
    #[must_use]
    pub fn wake_scanning_active(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Whether the voice activity detector should be consuming frames
    #[must_use]
    pub fn vad_active(&self) -> bool {
        self.state == SessionState::Listening
    }

    /// Initialization → Idle; returns whether the transition happened
    pub fn start(&mut self) -> bool {
        if self.state != SessionState::Initialization {
            return false;
        }
        self.transition(SessionState::Idle);
        true
    }

    /// Any state → Initialization
    pub fn stop(&mut self) -> bool {
        if self.state == SessionState::Initialization {
            return false;
        }
        self.cooldown_until = None;
        self.silence_deadline = None;
        self.heard_speech = false;
        self.transition(SessionState::Initialization);
        true
    }

    /// Manual Idle → Listening, bypassing wake detection
    pub fn manual_start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.enter_listening();
        true
    }

    /// Manual Listening → Idle; the only path back when auto-end is disabled
    pub fn manual_stop(&mut self) -> bool {
        if self.state != SessionState::Listening {
            return false;
        }
        self.transition(SessionState::Idle);
        true
    }

    /// Wake detection while Idle; ignored during cooldown
    pub fn on_wake_detection(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        let now = Instant::now();
        if self.cooldown_until.is_some_and(|until| now < until) {
            tracing::debug!("wake detection ignored during cooldown");
            return false;
        }
        self.cooldown_until = Some(now + self.config.cooldown());
        self.enter_listening();
        true
    }

    /// Voice activity began; rearms the silence timer
    pub fn on_speech_start(&mut self) {
        if self.state != SessionState::Listening {
            return;
        }
        self.heard_speech = true;
        // Timer resumes from speech-end, not while speech is ongoing
        self.silence_deadline = None;
    }

    /// Sustained silence after speech; ends listening when auto-end is on
    pub fn on_speech_end(&mut self) -> bool {
        if self.state != SessionState::Listening {
            return false;
        }
        if !self.config.auto_end || !self.heard_speech {
            return false;
        }
        self.transition(SessionState::Idle);
        true
    }

    /// Check the silence timer; Listening → Idle on expiry
    pub fn tick(&mut self) -> bool {
        if self.state != SessionState::Listening || !self.config.auto_end {
            return false;
        }
        let expired = self
            .silence_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if !expired {
            return false;
        }
        tracing::debug!("silence timer expired, ending session");
        self.transition(SessionState::Idle);
        true
    }

    fn enter_listening(&mut self) {
        self.heard_speech = false;
        self.silence_deadline = if self.config.auto_end {
            Some(Instant::now() + self.config.silence_timeout())
        } else {
            None
        };
        self.transition(SessionState::Listening);
    }

    fn transition(&mut self, new: SessionState) {
        let old = self.state;
        self.state = new;
        if new != SessionState::Listening {
            self.silence_deadline = None;
        }
        tracing::info!(%old, %new, "session state changed");
        self.bus.emit(SessionEvent::StateChanged { old, new });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn controller(config: SessionConfig) -> (SessionController, tokio::sync::broadcast::Receiver<SessionEvent>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (SessionController::new(config, bus), rx)
    }

    fn drain_transitions(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<(SessionState, SessionState)> {
        let mut transitions = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(SessionEvent::StateChanged { old, new }) => transitions.push((old, new)),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
        transitions
    }

    #[tokio::test]
    async fn start_only_leaves_initialization() {
        let (mut session, mut rx) = controller(SessionConfig::default());
        assert!(session.start());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.start());
        assert_eq!(
            drain_transitions(&mut rx),
            vec![(SessionState::Initialization, SessionState::Idle)]
        );
    }

    #[tokio::test]
    async fn detections_within_cooldown_transition_once() {
        let (mut session, mut rx) = controller(SessionConfig::default());
        session.start();

        assert!(session.on_wake_detection());
        assert_eq!(session.state(), SessionState::Listening);
        session.manual_stop();

        // Second detection lands inside the cooldown window
        assert!(!session.on_wake_detection());
        assert_eq!(session.state(), SessionState::Idle);

        let to_listening = drain_transitions(&mut rx)
            .into_iter()
            .filter(|&(_, new)| new == SessionState::Listening)
            .count();
        assert_eq!(to_listening, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detection_fires_again_after_cooldown_expires() {
        let (mut session, _rx) = controller(SessionConfig::default());
        session.start();
        assert!(session.on_wake_detection());
        session.manual_stop();

        tokio::time::advance(Duration::from_millis(2100)).await;
        assert!(session.on_wake_detection());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_timer_ends_listening_exactly_once() {
        let (mut session, mut rx) = controller(SessionConfig::default());
        session.start();
        session.on_wake_detection();
        drain_transitions(&mut rx);

        tokio::time::advance(Duration::from_millis(1900)).await;
        assert!(session.tick());
        assert!(!session.tick());
        assert_eq!(
            drain_transitions(&mut rx),
            vec![(SessionState::Listening, SessionState::Idle)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn speech_suspends_the_silence_timer() {
        let (mut session, _rx) = controller(SessionConfig::default());
        session.start();
        session.on_wake_detection();
        session.on_speech_start();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!session.tick());
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn speech_end_requires_heard_speech() {
        let (mut session, _rx) = controller(SessionConfig::default());
        session.start();
        session.on_wake_detection();

        assert!(!session.on_speech_end());
        session.on_speech_start();
        assert!(session.on_speech_end());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_end_disabled_leaves_manual_stop_as_the_only_exit() {
        let config = SessionConfig {
            auto_end: false,
            ..SessionConfig::default()
        };
        let (mut session, _rx) = controller(config);
        session.start();
        session.on_wake_detection();
        session.on_speech_start();
        assert!(!session.on_speech_end());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!session.tick());
        assert_eq!(session.state(), SessionState::Listening);

        assert!(session.manual_stop());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stop_returns_to_initialization_from_any_state() {
        let (mut session, _rx) = controller(SessionConfig::default());
        session.start();
        session.on_wake_detection();
        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Initialization);
        assert!(!session.stop());
    }

    #[tokio::test]
    async fn manual_start_only_from_idle() {
        let (mut session, _rx) = controller(SessionConfig::default());
        assert!(!session.manual_start());
        session.start();
        assert!(session.manual_start());
        assert!(!session.manual_start());
    }
}
