//! Stateful voice activity detection
//!
//! Wraps a recurrent speech/silence model behind a debounced activity
//! signal. Raw per-frame probabilities are too jittery to gate a session
//! on, so activity transitions require a run of consecutive speech frames
//! and silence is absorbed through a hangover window before the detector
//! reports inactive. When the model cannot be loaded the detector degrades
//! to an energy heuristic with the same external contract.

use std::path::Path;
use std::time::Duration;

use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;

use crate::audio::AudioFrame;
use crate::exec::{
    InferenceRequest, InferenceResponse, LONG_DISPATCH_TIMEOUT, WorkerHandle, WorkerOrchestrator,
};
use crate::inference::{NamedTensors, TensorValue};
use crate::{Error, Result};

/// Recurrent state tensor shape used by the reference model family
const STATE_SHAPE: [usize; 3] = [2, 1, 64];

/// Voice activity detector configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Model file name
    pub model: String,
    /// Speech probability threshold
    pub threshold: f32,
    /// Consecutive speech frames required before activating
    pub min_speech_frames: u32,
    /// Consecutive silence frames required before deactivating
    pub min_silence_frames: u32,
    /// Silence frames absorbed after speech before silence counting starts
    pub hangover_frames: u32,
    /// RMS amplitude mapped to probability 1.0 by the energy fallback
    pub energy_ceiling: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            model: "silero_vad.onnx".to_string(),
            threshold: 0.5,
            min_speech_frames: 3,
            min_silence_frames: 30,
            hangover_frames: 12,
            energy_ceiling: 0.1,
        }
    }
}

/// Activity transition produced by a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    /// Debounced transition into active speech
    SpeechStart,
    /// Debounced transition out of active speech
    SpeechEnd,
}

/// Per-frame detection result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadReport {
    /// Raw speech probability for this frame
    pub probability: f32,
    /// Whether this frame individually crossed the threshold
    pub is_speech: bool,
    /// Debounced activity state after this frame
    pub is_active: bool,
    /// Set only on the frame where `is_active` flipped
    pub edge: Option<VadEdge>,
}

enum Engine {
    /// Recurrent model with hidden/cell state carried across frames
    Model {
        model_id: String,
        hidden: ArrayD<f32>,
        cell: ArrayD<f32>,
    },
    /// RMS amplitude against a fixed ceiling
    Energy { ceiling: f32 },
    Uninitialized,
}

/// Debounced speech/silence classifier
pub struct VoiceActivityDetector {
    orchestrator: WorkerOrchestrator,
    handle: WorkerHandle,
    config: VadConfig,
    engine: Engine,
    speech_frames: u32,
    silence_frames: u32,
    hangover: u32,
    active: bool,
    timeout: Duration,
}

impl VoiceActivityDetector {
    /// Create an uninitialized detector; call [`Self::init`] before use
    #[must_use]
    pub fn new(
        orchestrator: WorkerOrchestrator,
        handle: WorkerHandle,
        config: VadConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            handle,
            config,
            engine: Engine::Uninitialized,
            speech_frames: 0,
            silence_frames: 0,
            hangover: 0,
            active: false,
            timeout,
        }
    }

    /// Load the recurrent model, falling back to the energy engine on failure
    ///
    /// Never fails: degradation to the energy heuristic is transparent to
    /// callers and preserves the debounce contract
    pub async fn init(&mut self, model_dir: &Path) {
        let model_id = "vad".to_string();
        let path = model_dir.join(&self.config.model);
        let request = InferenceRequest::LoadModel {
            id: model_id.clone(),
            path: path.clone(),
        };
        match self
            .orchestrator
            .dispatch(&self.handle, request, LONG_DISPATCH_TIMEOUT)
            .await
        {
            Ok(InferenceResponse::Loaded(_)) => {
                self.engine = Engine::Model {
                    model_id,
                    hidden: ArrayD::zeros(IxDyn(&STATE_SHAPE)),
                    cell: ArrayD::zeros(IxDyn(&STATE_SHAPE)),
                };
                tracing::info!(path = %path.display(), "voice activity model loaded");
            }
            Ok(other) => {
                tracing::warn!(
                    ?other,
                    "unexpected response loading voice activity model, using energy fallback"
                );
                self.engine = Engine::Energy {
                    ceiling: self.config.energy_ceiling,
                };
            }
            Err(error) => {
                tracing::warn!(%error, "voice activity model unavailable, using energy fallback");
                self.engine = Engine::Energy {
                    ceiling: self.config.energy_ceiling,
                };
            }
        }
    }

    /// Whether the recurrent model is active (false means energy fallback)
    #[must_use]
    pub const fn uses_model(&self) -> bool {
        matches!(self.engine, Engine::Model { .. })
    }

    /// Replace the dispatch handle after an execution profile change
    pub fn set_handle(&mut self, handle: WorkerHandle) {
        self.handle = handle;
    }

    /// Classify one frame and update the debounced activity state
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before [`Self::init`] was called
    /// - worker failure, timeout, or cancellation from the dispatch layer;
    ///   transient inference failures degrade this detector to the energy
    ///   engine instead of propagating
    pub async fn process_frame(&mut self, frame: &AudioFrame) -> Result<VadReport> {
        // Decide the path without holding a borrow across the dispatch
        let route: std::result::Result<String, f32> = match &self.engine {
            Engine::Uninitialized => {
                return Err(Error::NotInitialized(
                    "voice activity detector has no engine".to_string(),
                ));
            }
            Engine::Energy { ceiling } => Err(*ceiling),
            Engine::Model { model_id, .. } => Ok(model_id.clone()),
        };

        let probability = match route {
            Err(ceiling) => energy_probability(frame, ceiling),
            Ok(model_id) => match self.run_model(&model_id, frame).await {
                Ok(probability) => probability,
                Err(Error::Inference(message)) => {
                    tracing::warn!(
                        %message,
                        "voice activity inference failed, degrading to energy fallback"
                    );
                    self.engine = Engine::Energy {
                        ceiling: self.config.energy_ceiling,
                    };
                    energy_probability(frame, self.config.energy_ceiling)
                }
                Err(other) => return Err(other),
            },
        };

        let is_speech = probability > self.config.threshold;
        let edge = self.debounce(is_speech);
        Ok(VadReport {
            probability,
            is_speech,
            is_active: self.active,
            edge,
        })
    }

    /// Apply the hangover debounce and return an edge on transitions
    fn debounce(&mut self, is_speech: bool) -> Option<VadEdge> {
        if is_speech {
            self.speech_frames += 1;
            self.silence_frames = 0;
            self.hangover = self.config.hangover_frames;
            if !self.active && self.speech_frames >= self.config.min_speech_frames {
                self.active = true;
                return Some(VadEdge::SpeechStart);
            }
            return None;
        }

        self.speech_frames = 0;
        if self.hangover > 0 {
            // Brief dropout mid-word; hold the current activity state
            self.hangover -= 1;
            return None;
        }
        self.silence_frames += 1;
        if self.active && self.silence_frames >= self.config.min_silence_frames {
            self.active = false;
            return Some(VadEdge::SpeechEnd);
        }
        None
    }

    async fn run_model(&mut self, model_id: &str, frame: &AudioFrame) -> Result<f32> {
        let Engine::Model { hidden, cell, .. } = &self.engine else {
            return Err(Error::Inference("model engine not active".to_string()));
        };

        let len = frame.len();
        let audio = ArrayD::from_shape_vec(IxDyn(&[1, len]), frame.samples().to_vec())
            .map_err(|e| Error::Inference(e.to_string()))?;
        let sample_rate = ArrayD::from_shape_vec(
            IxDyn(&[1]),
            vec![i64::from(frame.sample_rate())],
        )
        .map_err(|e| Error::Inference(e.to_string()))?;

        let inputs: NamedTensors = vec![
            ("input".to_string(), TensorValue::F32(audio)),
            ("sr".to_string(), TensorValue::I64(sample_rate)),
            ("h".to_string(), TensorValue::F32(hidden.clone())),
            ("c".to_string(), TensorValue::F32(cell.clone())),
        ];

        let response = self
            .orchestrator
            .dispatch(
                &self.handle,
                InferenceRequest::Run {
                    model: model_id.to_string(),
                    inputs,
                },
                self.timeout,
            )
            .await?;
        let InferenceResponse::Outputs(outputs) = response else {
            return Err(Error::Inference("unexpected worker response".to_string()));
        };

        // Output layout: [probability, next hidden, next cell]
        let probability = outputs
            .first()
            .and_then(|(_, t)| t.first_f32())
            .ok_or_else(|| Error::Inference("missing probability output".to_string()))?;

        if let (Some((_, TensorValue::F32(next_hidden))), Some((_, TensorValue::F32(next_cell)))) =
            (outputs.get(1), outputs.get(2))
        {
            if let Engine::Model { hidden, cell, .. } = &mut self.engine {
                *hidden = next_hidden.clone();
                *cell = next_cell.clone();
            }
        } else {
            tracing::debug!("model returned no recurrent state, keeping previous");
        }

        Ok(probability.clamp(0.0, 1.0))
    }

    /// Whether the detector currently reports active speech
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Zero recurrent state and all debounce counters
    ///
    /// Idempotent; safe to call between sessions
    pub fn reset(&mut self) {
        if let Engine::Model { hidden, cell, .. } = &mut self.engine {
            hidden.fill(0.0);
            cell.fill(0.0);
        }
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.hangover = 0;
        self.active = false;
    }
}

/// Map RMS amplitude to a pseudo-probability against a fixed ceiling
fn energy_probability(frame: &AudioFrame, ceiling: f32) -> f32 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    (frame.rms() / ceiling).clamp(0.0, 1.0)
}
