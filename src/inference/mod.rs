//! Inference backend abstraction
//!
//! A backend loads opaque model blobs by identifier and runs them with named
//! tensors. How a graph executes is the backend's business; the pipeline only
//! negotiates shapes through [`ModelInfo`] at load time.

pub mod onnx;

pub use onnx::OnnxBackend;

use std::path::Path;

use ndarray::ArrayD;

use crate::Result;

/// A named tensor batch passed to and returned from a model
pub type NamedTensors = Vec<(String, TensorValue)>;

/// A tensor value crossing the backend boundary
#[derive(Debug, Clone)]
pub enum TensorValue {
    /// 32-bit float tensor
    F32(ArrayD<f32>),
    /// 64-bit integer tensor (sample rates, lengths)
    I64(ArrayD<i64>),
}

impl TensorValue {
    /// Shape of the underlying tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::I64(a) => a.shape(),
        }
    }

    /// Borrow as an f32 array, if this is one
    #[must_use]
    pub const fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::F32(a) => Some(a),
            Self::I64(_) => None,
        }
    }

    /// First element of an f32 tensor, if present
    #[must_use]
    pub fn first_f32(&self) -> Option<f32> {
        self.as_f32().and_then(|a| a.iter().next().copied())
    }
}

/// Declared shape of one model input or output (-1 marks a dynamic dimension)
#[derive(Debug, Clone)]
pub struct TensorSpec {
    /// Tensor name as declared by the model
    pub name: String,
    /// Declared dimensions; negative values are dynamic
    pub shape: Vec<i64>,
}

impl TensorSpec {
    /// Static dimension at `index`, if declared and non-dynamic
    #[must_use]
    pub fn static_dim(&self, index: usize) -> Option<usize> {
        self.shape.get(index).and_then(|&d| usize::try_from(d).ok())
    }
}

/// Capability negotiation record produced when a model is loaded
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Declared inputs in graph order
    pub inputs: Vec<TensorSpec>,
    /// Declared outputs in graph order
    pub outputs: Vec<TensorSpec>,
}

/// An opaque "run this model with these named inputs" capability
///
/// Implementations must be safe to share across worker tasks.
pub trait InferenceBackend: Send + Sync {
    /// Load a model blob and return its declared tensor shapes
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Model`] if the blob cannot be loaded
    fn load(&self, id: &str, path: &Path) -> Result<ModelInfo>;

    /// Negotiated info for a previously loaded model
    fn model_info(&self, id: &str) -> Option<ModelInfo>;

    /// Run a loaded model with named inputs
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotInitialized`] for unknown models,
    /// [`crate::Error::ShapeMismatch`] when a supplied tensor disagrees with
    /// the model's declared temporal depth, and [`crate::Error::Inference`]
    /// for other failures
    fn run(&self, id: &str, inputs: NamedTensors) -> Result<NamedTensors>;
}

/// Validate supplied tensors against declared input specs
///
/// Dynamic dimensions (negative) accept anything. A static mismatch on the
/// temporal axis of a rank-3 input surfaces as a structured
/// [`crate::Error::ShapeMismatch`] so callers can resize their buffers.
pub(crate) fn validate_inputs(specs: &[TensorSpec], inputs: &NamedTensors) -> Result<()> {
    for ((_, value), spec) in inputs.iter().zip(specs) {
        let supplied = value.shape();
        for (axis, &declared) in spec.shape.iter().enumerate() {
            let Ok(declared) = usize::try_from(declared) else {
                continue; // dynamic
            };
            let Some(&actual) = supplied.get(axis) else {
                continue;
            };
            if declared != actual {
                if spec.shape.len() == 3 && axis == 1 {
                    return Err(crate::Error::ShapeMismatch {
                        expected: declared,
                        actual,
                    });
                }
                return Err(crate::Error::Inference(format!(
                    "input '{}' axis {axis}: expected {declared}, got {actual}",
                    spec.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn f32_tensor(shape: &[usize]) -> TensorValue {
        TensorValue::F32(ArrayD::zeros(shape.to_vec()))
    }

    #[test]
    fn validation_accepts_matching_shapes() {
        let specs = vec![TensorSpec {
            name: "input".to_string(),
            shape: vec![1, 16, 96],
        }];
        let inputs = vec![("input".to_string(), f32_tensor(&[1, 16, 96]))];
        assert!(validate_inputs(&specs, &inputs).is_ok());
    }

    #[test]
    fn validation_accepts_dynamic_dims() {
        let specs = vec![TensorSpec {
            name: "input".to_string(),
            shape: vec![-1, 1280],
        }];
        let inputs = vec![("input".to_string(), f32_tensor(&[1, 1280]))];
        assert!(validate_inputs(&specs, &inputs).is_ok());
    }

    #[test]
    fn temporal_mismatch_is_structured() {
        let specs = vec![TensorSpec {
            name: "input".to_string(),
            shape: vec![1, 28, 96],
        }];
        let inputs = vec![("input".to_string(), f32_tensor(&[1, 16, 96]))];
        match validate_inputs(&specs, &inputs) {
            Err(crate::Error::ShapeMismatch { expected, actual }) => {
                assert_eq!(expected, 28);
                assert_eq!(actual, 16);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn non_temporal_mismatch_is_plain_inference_error() {
        let specs = vec![TensorSpec {
            name: "input".to_string(),
            shape: vec![1, 1280],
        }];
        let inputs = vec![("input".to_string(), f32_tensor(&[1, 640]))];
        assert!(matches!(
            validate_inputs(&specs, &inputs),
            Err(crate::Error::Inference(_))
        ));
    }
}
