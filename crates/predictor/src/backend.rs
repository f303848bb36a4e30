//! Inference runtimes

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info};

use crate::PredictorError;

/// Model weights file inside a model directory
pub const MODEL_FILE: &str = "model.onnx";

/// Which runtime executes the ONNX graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Tract,
    OnnxRuntime,
}

/// An opaque tensor-in, tensor-out model
pub trait InferenceBackend: Send {
    /// Model input names, in input order
    fn input_names(&self) -> &[String];

    /// Run the graph; `inputs` follows [`input_names`](Self::input_names) order
    fn run(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, PredictorError>;
}

/// A loaded backend behind a lock, so one model runs one request at a time
pub struct ModelRunner {
    backend: Mutex<Box<dyn InferenceBackend>>,
    input_names: Vec<String>,
}

impl ModelRunner {
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        let input_names = backend.input_names().to_vec();
        Self {
            backend: Mutex::new(backend),
            input_names,
        }
    }

    /// Load `model.onnx` from a model directory with the chosen runtime
    pub fn load(kind: BackendKind, model_dir: &Path) -> Result<Self, PredictorError> {
        let path = model_dir.join(MODEL_FILE);
        if !path.is_file() {
            error!("Model weights not found: {}", path.display());
            return Err(PredictorError::ModelLoad(format!(
                "model weights not found: {}",
                path.display()
            )));
        }

        info!("Loading {:?} model from {}", kind, path.display());
        let backend: Box<dyn InferenceBackend> = match kind {
            BackendKind::Tract => Box::new(crate::tract_backend::TractBackend::load(&path)?),
            #[cfg(feature = "onnxruntime")]
            BackendKind::OnnxRuntime => Box::new(crate::ort_backend::OrtBackend::load(&path)?),
            #[cfg(not(feature = "onnxruntime"))]
            BackendKind::OnnxRuntime => {
                return Err(PredictorError::ModelLoad(
                    "built without the onnxruntime feature".to_string(),
                ))
            }
        };

        info!("Model inputs: {:?}", backend.input_names());
        Ok(Self::new(backend))
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn run(&self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, PredictorError> {
        if inputs.len() != self.input_names.len() {
            return Err(PredictorError::InvalidInput(format!(
                "model expects {} inputs, got {}",
                self.input_names.len(),
                inputs.len()
            )));
        }

        let mut backend = self
            .backend
            .lock()
            .map_err(|_| PredictorError::Inference("model lock poisoned".to_string()))?;
        backend.run(inputs)
    }
}
