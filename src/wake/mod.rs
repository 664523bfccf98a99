//! Wake word detection pipeline
//!
//! Three-stage cascade: feature extractor (audio → mel frames), embedder
//! (mel window → embedding vector), classifier (embedding history → score).
//! Buffering follows the sliding-window discipline: each processed window
//! evicts a fixed stride of mel frames, keeping consecutive windows heavily
//! overlapped while bounding compute.

pub mod embedding;
pub mod mel;

pub use embedding::EmbeddingHistory;
pub use mel::{MEL_BINS, MelBuffer, MelFrame};

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;

use crate::audio::AudioFrame;
use crate::exec::{
    InferenceRequest, InferenceResponse, LONG_DISPATCH_TIMEOUT, WorkerHandle, WorkerOrchestrator,
};
use crate::inference::{ModelInfo, NamedTensors, TensorValue};
use crate::{Error, Result};

/// Sentinel score returned while the mel buffer is still filling
pub const BUFFERING_SCORE: f32 = 0.0;

/// Rolling detection score history length
const SCORE_HISTORY: usize = 50;

/// Mel frames produced per feature-extractor call
const FRAMES_PER_CHUNK: usize = 5;

/// A detection confidence with a monotonically increasing sequence id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionScore {
    /// Sequence id, monotonic across the pipeline's lifetime
    pub seq: u64,
    /// Confidence in [0, 1]
    pub value: f32,
}

/// Wake word pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Feature extractor model file name
    pub melspec_model: String,
    /// Embedder model file name
    pub embedding_model: String,
    /// Classifier model file name
    pub classifier_model: String,
    /// Detection threshold
    pub threshold: f32,
    /// Index of the wake class in the classifier output; `None` uses index 1
    /// for multi-class outputs and 0 for single-class outputs
    pub positive_class: Option<usize>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            melspec_model: "melspectrogram.onnx".to_string(),
            embedding_model: "embedding_model.onnx".to_string(),
            classifier_model: "hey_jarvis.onnx".to_string(),
            threshold: 0.5,
            positive_class: None,
        }
    }
}

/// Buffer geometry, negotiated from the loaded models
///
/// The reference model family uses a 76-frame window with a stride of 8 and
/// a 16-deep embedding history; these are defaults, not universal constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeModelDims {
    /// Mel frames per embedder window
    pub window: usize,
    /// Mel bins per frame
    pub mel_bins: usize,
    /// Embedding vector width
    pub embedding_dim: usize,
    /// Classifier temporal depth
    pub depth: usize,
    /// Mel frames evicted per processed window
    pub stride: usize,
}

impl Default for WakeModelDims {
    fn default() -> Self {
        Self {
            window: 76,
            mel_bins: MEL_BINS,
            embedding_dim: 96,
            depth: 16,
            stride: 8,
        }
    }
}

fn derive_dims(last_good: WakeModelDims, embedder: &ModelInfo, classifier: &ModelInfo) -> WakeModelDims {
    let mut dims = last_good;

    // Embedder input: [batch, window, mel_bins, 1]
    if let Some(spec) = embedder.inputs.first() {
        if let Some(window) = spec.static_dim(1) {
            dims.window = window;
        }
        if let Some(bins) = spec.static_dim(2) {
            dims.mel_bins = bins;
        }
    }

    // Classifier input: [batch, depth, embedding_dim]
    match classifier.inputs.first() {
        Some(spec) => {
            if let Some(depth) = spec.static_dim(1) {
                dims.depth = depth;
            } else {
                tracing::warn!(
                    model = %classifier.id,
                    "classifier temporal depth is dynamic, keeping {}",
                    dims.depth
                );
            }
            if let Some(dim) = spec.static_dim(2) {
                dims.embedding_dim = dim;
            }
        }
        None => {
            tracing::warn!(
                model = %classifier.id,
                "classifier declares no inputs, keeping last-known-good dimensions"
            );
        }
    }

    dims
}

/// The cascading wake word inference pipeline
pub struct WakeWordPipeline {
    orchestrator: WorkerOrchestrator,
    handle: WorkerHandle,
    config: WakeConfig,
    dims: WakeModelDims,
    mel: MelBuffer,
    history: EmbeddingHistory,
    scores: VecDeque<DetectionScore>,
    seq: u64,
    melspec_id: String,
    embedding_id: String,
    classifier_id: String,
    timeout: Duration,
    initialized: bool,
}

impl WakeWordPipeline {
    /// Create an uninitialized pipeline; call [`Self::init`] before
    /// processing frames
    #[must_use]
    pub fn new(
        orchestrator: WorkerOrchestrator,
        handle: WorkerHandle,
        config: WakeConfig,
        timeout: Duration,
    ) -> Self {
        let dims = WakeModelDims::default();
        Self {
            orchestrator,
            handle,
            config,
            dims,
            mel: MelBuffer::new(),
            history: EmbeddingHistory::new(dims.depth, dims.embedding_dim),
            scores: VecDeque::with_capacity(SCORE_HISTORY),
            seq: 0,
            melspec_id: "wake-melspec".to_string(),
            embedding_id: "wake-embedding".to_string(),
            classifier_id: "wake-classifier".to_string(),
            timeout,
            initialized: false,
        }
    }

    /// Load the three cascade models and negotiate buffer geometry
    ///
    /// # Errors
    ///
    /// Model load failure is fatal to this pipeline; it stays uninitialized
    /// and refuses `process_frame`
    pub async fn init(&mut self, model_dir: &Path) -> Result<()> {
        let melspec_id = self.melspec_id.clone();
        let embedding_id = self.embedding_id.clone();
        let classifier_id = self.classifier_id.clone();
        self.load_model(&melspec_id, &model_dir.join(&self.config.melspec_model))
            .await?;
        let embedder = self
            .load_model(&embedding_id, &model_dir.join(&self.config.embedding_model))
            .await?;
        let classifier = self
            .load_model(&classifier_id, &model_dir.join(&self.config.classifier_model))
            .await?;

        self.apply_dims(derive_dims(self.dims, &embedder, &classifier));
        self.initialized = true;

        tracing::info!(
            window = self.dims.window,
            depth = self.dims.depth,
            embedding_dim = self.dims.embedding_dim,
            stride = self.dims.stride,
            "wake word pipeline initialized"
        );
        Ok(())
    }

    /// Swap in a different classifier model
    ///
    /// Re-derives depth and embedding width from the new model's declared
    /// input shape, reinitializes the embedding history with zeros, and
    /// clears the mel buffer. Dimension-detection failure keeps the
    /// last-known-good geometry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] if the new classifier cannot be loaded; the
    /// previous classifier remains active in that case
    pub async fn switch_model(&mut self, id: &str, path: &Path) -> Result<()> {
        let info = self.load_model(id, path).await?;
        self.classifier_id = id.to_string();

        // The embedder is unchanged; an empty ModelInfo keeps its geometry
        // at the last-known-good values while the classifier's is re-derived.
        let embedder = ModelInfo {
            id: self.embedding_id.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        self.apply_dims(derive_dims(self.dims, &embedder, &info));
        self.mel.clear();

        tracing::info!(model = id, depth = self.dims.depth, "classifier switched");
        Ok(())
    }

    fn apply_dims(&mut self, dims: WakeModelDims) {
        self.dims = dims;
        self.history = EmbeddingHistory::new(dims.depth, dims.embedding_dim);
    }

    /// Negotiated buffer geometry
    #[must_use]
    pub const fn dims(&self) -> WakeModelDims {
        self.dims
    }

    /// Process one audio frame through the cascade
    ///
    /// Returns the maximum classifier score across the windows this call
    /// completed, or the buffering sentinel while the mel buffer is still
    /// below one window. Transient stage failures drop the current window
    /// and never propagate.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before [`Self::init`] succeeds
    /// - worker failure, timeout, or cancellation from the dispatch layer
    pub async fn process_frame(&mut self, frame: &AudioFrame) -> Result<DetectionScore> {
        if !self.initialized {
            return Err(Error::NotInitialized(
                "wake word pipeline has no models loaded".to_string(),
            ));
        }

        self.extract_mel(frame).await?;

        let mut best: Option<f32> = None;
        while self.mel.len() >= self.dims.window {
            match self.process_window().await {
                Ok(score) => {
                    best = Some(best.map_or(score, |b: f32| b.max(score)));
                    self.mel.evict(self.dims.stride);
                }
                Err(Error::ShapeMismatch { expected, actual }) => {
                    tracing::warn!(
                        expected,
                        actual,
                        "classifier depth mismatch, resizing embedding history"
                    );
                    self.history.resize_depth(expected);
                    self.dims.depth = expected;
                    self.mel.evict(self.dims.stride);
                    break;
                }
                Err(Error::Inference(message)) => {
                    tracing::warn!(%message, "stage failure, dropping current window");
                    self.mel.evict(self.dims.stride);
                    break;
                }
                Err(other) => return Err(other),
            }
        }

        self.seq += 1;
        let score = DetectionScore {
            seq: self.seq,
            value: best.unwrap_or(BUFFERING_SCORE),
        };
        if self.scores.len() >= SCORE_HISTORY {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
        Ok(score)
    }

    /// Run the feature extractor and append its mel frames
    async fn extract_mel(&mut self, frame: &AudioFrame) -> Result<()> {
        // The extractor expects 16-bit amplitude range, not normalized floats
        let samples: Vec<f32> = frame.samples().iter().map(|&s| s * 32768.0).collect();
        let len = samples.len();
        let input = ArrayD::from_shape_vec(IxDyn(&[1, len]), samples)
            .map_err(|e| Error::Inference(e.to_string()))?;

        let melspec_id = self.melspec_id.clone();
        let outputs = match self
            .run_model(&melspec_id, vec![("input".to_string(), TensorValue::F32(input))])
            .await
        {
            Ok(outputs) => outputs,
            Err(Error::Inference(message)) => {
                tracing::warn!(%message, "feature extraction failed, skipping frame");
                self.mel.evict(self.dims.stride);
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        let Some(mel) = outputs.first().and_then(|(_, t)| t.as_f32()) else {
            tracing::warn!("feature extractor returned no tensor, skipping frame");
            return Ok(());
        };

        // Expected layout [1, frames, mel_bins]
        let shape = mel.shape();
        if shape.len() != 3 || shape[2] != self.dims.mel_bins {
            tracing::warn!(?shape, "unexpected mel output shape, skipping frame");
            return Ok(());
        }
        let produced = shape[1];
        if produced != FRAMES_PER_CHUNK {
            tracing::debug!(produced, expected = FRAMES_PER_CHUNK, "unusual mel frame count");
        }

        for frame_index in 0..produced {
            let mut mel_frame = [0.0f32; MEL_BINS];
            for (bin, slot) in mel_frame.iter_mut().enumerate().take(self.dims.mel_bins) {
                // Reference-family scaling applied by the extractor contract
                *slot = mel[[0, frame_index, bin]] / 10.0 + 2.0;
            }
            self.mel.push(mel_frame);
        }
        Ok(())
    }

    /// Embed the oldest window and classify the updated history
    async fn process_window(&mut self) -> Result<f32> {
        let window = self
            .mel
            .window(self.dims.window)
            .ok_or_else(|| Error::Inference("window underflow".to_string()))?;

        let embed_input = ArrayD::from_shape_vec(
            IxDyn(&[1, self.dims.window, self.dims.mel_bins, 1]),
            window,
        )
        .map_err(|e| Error::Inference(e.to_string()))?;

        let embedding_id = self.embedding_id.clone();
        let outputs = self
            .run_model(&embedding_id, vec![("input".to_string(), TensorValue::F32(embed_input))])
            .await?;
        let embedding = outputs
            .first()
            .and_then(|(_, t)| t.as_f32())
            .ok_or_else(|| Error::Inference("embedder returned no tensor".to_string()))?;
        self.history.push(embedding.iter().copied().collect());

        let classifier_input = ArrayD::from_shape_vec(
            IxDyn(&[1, self.history.depth(), self.history.dim()]),
            self.history.flatten(),
        )
        .map_err(|e| Error::Inference(e.to_string()))?;

        let classifier_id = self.classifier_id.clone();
        let outputs = self
            .run_model(
                &classifier_id,
                vec![("input".to_string(), TensorValue::F32(classifier_input))],
            )
            .await?;
        let scores = outputs
            .first()
            .and_then(|(_, t)| t.as_f32())
            .ok_or_else(|| Error::Inference("classifier returned no tensor".to_string()))?;

        let flat: Vec<f32> = scores.iter().copied().collect();
        let index = self
            .config
            .positive_class
            .unwrap_or(usize::from(flat.len() > 1));
        let value = flat.get(index).copied().ok_or_else(|| {
            Error::Inference(format!(
                "positive class {index} out of range for {} outputs",
                flat.len()
            ))
        })?;
        Ok(value.clamp(0.0, 1.0))
    }

    async fn run_model(&self, model: &str, inputs: NamedTensors) -> Result<NamedTensors> {
        let response = self
            .orchestrator
            .dispatch(
                &self.handle,
                InferenceRequest::Run {
                    model: model.to_string(),
                    inputs,
                },
                self.timeout,
            )
            .await?;
        match response {
            InferenceResponse::Outputs(outputs) => Ok(outputs),
            other => Err(Error::Inference(format!(
                "unexpected worker response: {other:?}"
            ))),
        }
    }

    async fn load_model(&self, id: &str, path: &Path) -> Result<ModelInfo> {
        let response = self
            .orchestrator
            .dispatch(
                &self.handle,
                InferenceRequest::LoadModel {
                    id: id.to_string(),
                    path: path.to_path_buf(),
                },
                // Loading reads and compiles a whole graph; per-frame
                // inference budgets do not apply
                LONG_DISPATCH_TIMEOUT,
            )
            .await?;
        match response {
            InferenceResponse::Loaded(info) => Ok(info),
            other => Err(Error::Model(format!(
                "unexpected worker response: {other:?}"
            ))),
        }
    }

    /// Whether a score crosses the detection threshold
    #[must_use]
    pub fn is_detection(&self, score: DetectionScore) -> bool {
        score.value > self.config.threshold
    }

    /// Current detection threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.config.threshold
    }

    /// Change the detection threshold
    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.threshold = threshold.clamp(0.0, 1.0);
    }

    /// Rolling detection score history, oldest first
    #[must_use]
    pub fn score_history(&self) -> Vec<DetectionScore> {
        self.scores.iter().copied().collect()
    }

    /// Number of buffered mel frames (test and diagnostics hook)
    #[must_use]
    pub fn mel_len(&self) -> usize {
        self.mel.len()
    }

    /// Clear mel and embedding buffers so a stale detection cannot re-fire
    pub fn reset_buffers(&mut self) {
        self.mel.clear();
        self.history.reset();
    }

    /// Full reset: buffers and score history
    ///
    /// Idempotent; the sequence counter stays monotonic.
    pub fn reset(&mut self) {
        self.reset_buffers();
        self.scores.clear();
    }

    /// Replace the dispatch handle after an execution profile change
    pub fn set_handle(&mut self, handle: WorkerHandle) {
        self.handle = handle;
    }
}
