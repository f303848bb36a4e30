//! Model Predictors
//!
//! One preprocess / infer / postprocess contract over the exported
//! remote-sensing models:
//! - object detection (`Preprocess` op list + `label_list` descriptors)
//! - semantic segmentation (`Deploy.transforms` or `Transforms` descriptors)
//! - bi-temporal change detection
//!
//! Inference runs on tract by default; the `onnxruntime` feature adds an
//! ONNX Runtime backend.

mod backend;
mod change;
mod config;
mod detection;
mod label_map;
#[cfg(feature = "onnxruntime")]
mod ort_backend;
mod preprocess;
mod segmentation;
mod tract_backend;

pub use backend::{BackendKind, InferenceBackend, ModelRunner, MODEL_FILE};
pub use change::ChangePredictor;
pub use crate::config::{
    DetectionConfig, DetectionOp, ModelConfig, Normalization, SegmentationConfig,
    SegmentationDialect, DESCRIPTOR_FILE,
};
pub use detection::{Detection, DetectionPredictor, DEFAULT_SCORE_THRESHOLD};
pub use label_map::LabelMap;
pub use segmentation::SegmentationPredictor;

use image::RgbImage;
use metrics::histogram;
use ndarray::ArrayD;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Errors while reading a model descriptor
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Model descriptor not found: {0}")]
    NotFound(String),
    #[error("Failed to parse model descriptor: {0}")]
    Parse(String),
    #[error("Unrecognized model descriptor: expected Preprocess, Deploy.transforms or Transforms")]
    UnknownSchema,
    #[error("Model descriptor is missing {0}")]
    MissingField(&'static str),
    #[error("Invalid normalization: {0}")]
    InvalidNormalization(String),
    #[error("Invalid operation order: {0}")]
    InvalidOrder(String),
    #[error("Expected a {expected} descriptor, found {found}")]
    WrongFamily {
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors during model loading and prediction
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Model family a predictor adapts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    Detection,
    Segmentation,
    ChangeDetection,
}

impl PredictorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorKind::Detection => "detection",
            PredictorKind::Segmentation => "segmentation",
            PredictorKind::ChangeDetection => "change_detection",
        }
    }
}

/// Raw image(s) handed to a predictor
#[derive(Debug, Clone)]
pub enum PredictorInput {
    Single(RgbImage),
    /// Before / after acquisitions of the same area
    Pair(RgbImage, RgbImage),
}

impl PredictorInput {
    /// Size of the (first) image, (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PredictorInput::Single(image) | PredictorInput::Pair(image, _) => image.dimensions(),
        }
    }
}

/// Preprocessed model inputs plus what postprocessing needs to map back
#[derive(Debug, Clone)]
pub struct Prepared {
    /// One tensor per model input, in model input order
    pub inputs: Vec<ArrayD<f32>>,
    /// Source image size (width, height)
    pub original_size: (u32, u32),
    /// Size actually fed to the model (width, height)
    pub input_size: (u32, u32),
}

/// Output of one prediction
#[derive(Debug, Clone)]
pub enum PredictionResult {
    Detections(Vec<Detection>),
    LabelMap(LabelMap),
}

impl PredictionResult {
    pub fn into_detections(self) -> Result<Vec<Detection>, PredictorError> {
        match self {
            PredictionResult::Detections(detections) => Ok(detections),
            PredictionResult::LabelMap(_) => Err(PredictorError::UnexpectedOutput(
                "expected detections, got a label map".to_string(),
            )),
        }
    }

    pub fn into_label_map(self) -> Result<LabelMap, PredictorError> {
        match self {
            PredictionResult::LabelMap(map) => Ok(map),
            PredictionResult::Detections(_) => Err(PredictorError::UnexpectedOutput(
                "expected a label map, got detections".to_string(),
            )),
        }
    }
}

/// Common contract of every model adapter.
///
/// Implementations serialize `infer` internally, so one instance can be shared
/// between request handlers.
pub trait Predictor: Send + Sync {
    /// Name used in logs and metrics (usually the task)
    fn name(&self) -> &str;

    fn kind(&self) -> PredictorKind;

    fn preprocess(&self, input: &PredictorInput) -> Result<Prepared, PredictorError>;

    fn infer(&self, prepared: &Prepared) -> Result<Vec<ArrayD<f32>>, PredictorError>;

    fn postprocess(
        &self,
        outputs: Vec<ArrayD<f32>>,
        prepared: &Prepared,
    ) -> Result<PredictionResult, PredictorError>;

    /// Run the full pipeline
    fn predict(&self, input: &PredictorInput) -> Result<PredictionResult, PredictorError> {
        let prepared = self.preprocess(input)?;

        let start = Instant::now();
        let outputs = self.infer(&prepared)?;
        let elapsed = start.elapsed();
        histogram!("inference_duration_seconds", "model" => self.name().to_string())
            .record(elapsed.as_secs_f64());
        debug!("{} inference completed in {}ms", self.name(), elapsed.as_millis());

        self.postprocess(outputs, &prepared)
    }
}
