//! Shared test fixtures: a scriptable inference backend and frame generators
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ndarray::{ArrayD, IxDyn};
use wakeline::audio::{AudioFrame, SAMPLE_RATE, WAKE_FRAME_SAMPLES};
use wakeline::inference::{InferenceBackend, ModelInfo, NamedTensors, TensorSpec, TensorValue};
use wakeline::{Error, Result};

pub const WINDOW: usize = 76;
pub const MEL_BINS: usize = 32;
pub const EMBEDDING_DIM: usize = 96;
pub const DEPTH: usize = 16;

/// Backend that fabricates tensors without touching a real runtime
///
/// Classifier outputs come from a script queue; when the queue is empty a
/// non-detection `[0.9, 0.1]` is returned. Failure injection covers one-shot
/// stage errors, a configurable expected classifier depth (for shape
/// mismatch recovery), panics (worker death), and slow responses (timeouts).
pub struct FakeBackend {
    classifier_scores: Mutex<VecDeque<Vec<f32>>>,
    classifier_depth: AtomicUsize,
    classifier_calls: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    vad_model_available: AtomicBool,
    slow_models: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            classifier_scores: Mutex::new(VecDeque::new()),
            classifier_depth: AtomicUsize::new(DEPTH),
            classifier_calls: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            vad_model_available: AtomicBool::new(false),
            slow_models: Mutex::new(Vec::new()),
        }
    }

    /// Queue one classifier output vector
    pub fn script_score(&self, scores: Vec<f32>) {
        self.classifier_scores.lock().unwrap().push_back(scores);
    }

    /// Fail the next run of the named model with a transient error
    pub fn fail_next(&self, model: &str) {
        *self.fail_next.lock().unwrap() = Some(model.to_string());
    }

    /// Change the temporal depth the classifier claims to expect
    pub fn set_classifier_depth(&self, depth: usize) {
        self.classifier_depth.store(depth, Ordering::SeqCst);
    }

    /// Make the voice activity model loadable
    pub fn enable_vad_model(&self) {
        self.vad_model_available.store(true, Ordering::SeqCst);
    }

    /// Make runs of the named model block for 200ms
    pub fn make_slow(&self, model: &str) {
        self.slow_models.lock().unwrap().push(model.to_string());
    }

    pub fn classifier_calls(&self) -> usize {
        self.classifier_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self, model: &str) -> bool {
        let mut fail = self.fail_next.lock().unwrap();
        if fail.as_deref() == Some(model) {
            *fail = None;
            return true;
        }
        false
    }

    #[allow(clippy::cast_possible_wrap)]
    fn info_for(&self, id: &str) -> Option<ModelInfo> {
        let spec = |name: &str, shape: Vec<i64>| TensorSpec {
            name: name.to_string(),
            shape,
        };
        let (inputs, outputs) = match id {
            "wake-melspec" => (
                vec![spec("input", vec![-1, -1])],
                vec![spec("output", vec![1, 5, MEL_BINS as i64])],
            ),
            "wake-embedding" => (
                vec![spec("input", vec![-1, WINDOW as i64, MEL_BINS as i64, 1])],
                vec![spec("output", vec![1, EMBEDDING_DIM as i64])],
            ),
            "vad" => {
                if !self.vad_model_available.load(Ordering::SeqCst) {
                    return None;
                }
                (
                    vec![spec("input", vec![1, -1])],
                    vec![spec("output", vec![1, 1])],
                )
            }
            id if id.contains("classifier") => {
                let depth = self.classifier_depth.load(Ordering::SeqCst) as i64;
                (
                    vec![spec("input", vec![-1, depth, EMBEDDING_DIM as i64])],
                    vec![spec("output", vec![1, 2])],
                )
            }
            _ => return None,
        };
        Some(ModelInfo {
            id: id.to_string(),
            inputs,
            outputs,
        })
    }
}

impl InferenceBackend for FakeBackend {
    fn load(&self, id: &str, _path: &Path) -> Result<ModelInfo> {
        self.info_for(id)
            .ok_or_else(|| Error::Model(format!("no such model '{id}'")))
    }

    fn model_info(&self, id: &str) -> Option<ModelInfo> {
        self.info_for(id)
    }

    fn run(&self, id: &str, inputs: NamedTensors) -> Result<NamedTensors> {
        if id == "panic" {
            panic!("injected worker failure");
        }
        if self.slow_models.lock().unwrap().iter().any(|m| m == id) {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        if self.take_failure(id) {
            return Err(Error::Inference(format!("injected failure in '{id}'")));
        }

        let tensor = |shape: &[usize], data: Vec<f32>| {
            TensorValue::F32(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap())
        };

        match id {
            "wake-melspec" => {
                // Five mel frames per call regardless of content
                let data = vec![0.0; 5 * MEL_BINS];
                Ok(vec![("output".to_string(), tensor(&[1, 5, MEL_BINS], data))])
            }
            "wake-embedding" => {
                let supplied = inputs[0].1.shape().to_vec();
                if supplied != [1, WINDOW, MEL_BINS, 1] {
                    return Err(Error::Inference(format!(
                        "unexpected embedder input shape {supplied:?}"
                    )));
                }
                Ok(vec![(
                    "output".to_string(),
                    tensor(&[1, EMBEDDING_DIM], vec![0.0; EMBEDDING_DIM]),
                )])
            }
            "vad" => {
                // Probability follows signal energy so tests can shape speech
                let energy = inputs[0]
                    .1
                    .as_f32()
                    .map_or(0.0, |a| a.iter().map(|v| v.abs()).sum::<f32>() / a.len() as f32);
                let probability = if energy > 0.05 { 0.95 } else { 0.02 };
                Ok(vec![("output".to_string(), tensor(&[1, 1], vec![probability]))])
            }
            id if id.contains("classifier") => {
                let expected = self.classifier_depth.load(Ordering::SeqCst);
                let supplied = inputs[0].1.shape().to_vec();
                if supplied.len() == 3 && supplied[1] != expected {
                    return Err(Error::ShapeMismatch {
                        expected,
                        actual: supplied[1],
                    });
                }
                self.classifier_calls.fetch_add(1, Ordering::SeqCst);
                let scores = self
                    .classifier_scores
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| vec![0.9, 0.1]);
                let shape = vec![1, scores.len()];
                Ok(vec![("output".to_string(), tensor(&shape, scores))])
            }
            other => Err(Error::NotInitialized(format!("model '{other}' not loaded"))),
        }
    }
}

/// A frame of silence sized for the wake pipeline
pub fn silence_frame() -> AudioFrame {
    AudioFrame::new(vec![0.0; WAKE_FRAME_SAMPLES], SAMPLE_RATE).unwrap()
}

/// A frame of the given level, sized for the voice activity detector
pub fn vad_frame(level: f32) -> AudioFrame {
    AudioFrame::new(vec![level; wakeline::audio::VAD_FRAME_SAMPLES], SAMPLE_RATE).unwrap()
}

/// A 440Hz sine frame at the given amplitude
#[allow(clippy::cast_precision_loss)]
pub fn sine_frame(samples: usize, amplitude: f32) -> AudioFrame {
    let data: Vec<f32> = (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioFrame::new(data, SAMPLE_RATE).unwrap()
}
