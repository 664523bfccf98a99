//! ONNX Runtime inference backend

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, input::SessionInputValue};
use ort::value::{Tensor, ValueType};

use super::{InferenceBackend, ModelInfo, NamedTensors, TensorSpec, TensorValue, validate_inputs};
use crate::{Error, Result};

/// Inference backend backed by ONNX Runtime sessions
///
/// Sessions are created single-threaded; parallelism comes from the worker
/// layer, not from intra-op threads.
pub struct OnnxBackend {
    sessions: Mutex<HashMap<String, Session>>,
    infos: Mutex<HashMap<String, ModelInfo>>,
}

impl OnnxBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            infos: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for OnnxBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn dims_of(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
        _ => Vec::new(),
    }
}

fn describe(id: &str, session: &Session) -> ModelInfo {
    let inputs = session
        .inputs
        .iter()
        .map(|i| TensorSpec {
            name: i.name.clone(),
            shape: dims_of(&i.input_type),
        })
        .collect();
    let outputs = session
        .outputs
        .iter()
        .map(|o| TensorSpec {
            name: o.name.clone(),
            shape: dims_of(&o.output_type),
        })
        .collect();
    ModelInfo {
        id: id.to_string(),
        inputs,
        outputs,
    }
}

impl InferenceBackend for OnnxBackend {
    fn load(&self, id: &str, path: &Path) -> Result<ModelInfo> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| Error::Model(format!("failed to load '{id}': {e}")))?;

        let info = describe(id, &session);
        tracing::debug!(
            model = id,
            inputs = info.inputs.len(),
            outputs = info.outputs.len(),
            "model loaded"
        );

        self.sessions
            .lock()
            .map_err(|_| Error::Model("session lock poisoned".to_string()))?
            .insert(id.to_string(), session);
        self.infos
            .lock()
            .map_err(|_| Error::Model("info lock poisoned".to_string()))?
            .insert(id.to_string(), info.clone());

        Ok(info)
    }

    fn model_info(&self, id: &str) -> Option<ModelInfo> {
        self.infos.lock().ok()?.get(id).cloned()
    }

    fn run(&self, id: &str, inputs: NamedTensors) -> Result<NamedTensors> {
        let info = self
            .model_info(id)
            .ok_or_else(|| Error::NotInitialized(format!("model '{id}' not loaded")))?;

        validate_inputs(&info.inputs, &inputs)?;

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| Error::Inference("session lock poisoned".to_string()))?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotInitialized(format!("model '{id}' not loaded")))?;

        let mut values: Vec<SessionInputValue<'_>> = Vec::with_capacity(inputs.len());
        for (_, tensor) in inputs {
            let value = match tensor {
                TensorValue::F32(array) => Tensor::from_array(array)
                    .map_err(|e| Error::Inference(e.to_string()))?
                    .into_dyn(),
                TensorValue::I64(array) => Tensor::from_array(array)
                    .map_err(|e| Error::Inference(e.to_string()))?
                    .into_dyn(),
            };
            values.push(SessionInputValue::Owned(value));
        }

        let outputs = session
            .run(&values[..])
            .map_err(|e| Error::Inference(format!("'{id}' run failed: {e}")))?;

        let mut named = Vec::with_capacity(info.outputs.len());
        for (index, spec) in info.outputs.iter().enumerate() {
            let array: ndarray::ArrayViewD<'_, f32> = outputs[index]
                .try_extract_array()
                .map_err(|e| Error::Inference(format!("'{id}' output extract failed: {e}")))?;
            named.push((spec.name.clone(), TensorValue::F32(array.to_owned())));
        }

        Ok(named)
    }
}
