//! Wakeline - Always-listening wake word and voice activity pipeline
//!
//! This library provides the core of a local voice trigger:
//! - Cascading wake word detection (mel features → embeddings → classifier)
//! - Stateful voice activity detection with hangover debounce
//! - Capability-aware execution planning with worker fallback
//! - A session state machine coordinating scanning and listening
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Frame Source                       │
//! │        microphone capture (one frame at a time)      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Session Controller                     │
//! │   Idle: wake scanning  │  Listening: voice activity  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Worker Orchestrator                     │
//! │   capability probe  │  execution chain  │  workers   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Inference Backend (ONNX)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod exec;
pub mod inference;
pub mod session;
pub mod vad;
pub mod wake;

pub use app::App;
pub use audio::AudioFrame;
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, SessionEvent};
pub use exec::{
    CapabilityProbe, CapabilitySnapshot, ExecutionMode, ExecutionPlanner, ExecutionProfile,
    WorkerOrchestrator,
};
pub use inference::{InferenceBackend, NamedTensors, TensorValue};
pub use session::{SessionConfig, SessionController, SessionState};
pub use vad::{VadConfig, VadEdge, VadReport, VoiceActivityDetector};
pub use wake::{DetectionScore, WakeConfig, WakeWordPipeline};
