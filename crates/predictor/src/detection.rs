//! Object detection adapter

use ndarray::{arr2, ArrayD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::backend::{BackendKind, ModelRunner};
use crate::config::{DetectionConfig, DetectionOp, ModelConfig};
use crate::preprocess::{normalize_image, resize, to_bgr, to_nchw};
use crate::{
    PredictionResult, Predictor, PredictorError, PredictorInput, PredictorKind, Prepared,
};

/// Boxes scoring below this are discarded
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

const IM_SHAPE_INPUT: &str = "im_shape";
const SCALE_FACTOR_INPUT: &str = "scale_factor";

/// Values per row of the detection output: class, score, x1, y1, x2, y2
const ROW_LEN: usize = 6;

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "category_id")]
    pub class_id: i64,
    #[serde(rename = "category")]
    pub class_name: String,
    pub score: f32,
    /// `[x, y, width, height]` in source image pixels
    pub bbox: [f32; 4],
}

/// Detector driven by a `Preprocess` op list and a label list
pub struct DetectionPredictor {
    name: String,
    config: DetectionConfig,
    runner: ModelRunner,
    score_threshold: f32,
}

impl DetectionPredictor {
    pub fn new(name: &str, config: DetectionConfig, runner: ModelRunner) -> Self {
        Self {
            name: name.to_string(),
            config,
            runner,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }

    /// Load `model.yml` + `model.onnx` from a model directory
    pub fn from_dir(name: &str, model_dir: &Path, backend: BackendKind) -> Result<Self, PredictorError> {
        let config = ModelConfig::load(model_dir)?.into_detection()?;
        let runner = ModelRunner::load(backend, model_dir)?;
        info!(
            "Detection model '{}' ready: {} classes, {} preprocessing ops",
            name,
            config.label_list.len(),
            config.ops.len()
        );
        Ok(Self::new(name, config, runner))
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.config.label_list
    }

    fn class_name(&self, class_id: i64) -> String {
        usize::try_from(class_id)
            .ok()
            .and_then(|i| self.config.label_list.get(i))
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl Predictor for DetectionPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Detection
    }

    fn preprocess(&self, input: &PredictorInput) -> Result<Prepared, PredictorError> {
        let PredictorInput::Single(image) = input else {
            return Err(PredictorError::InvalidInput(
                "detection takes a single image".to_string(),
            ));
        };
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(PredictorError::InvalidInput("image is empty".to_string()));
        }

        let mut working = to_bgr(image);
        for op in &self.config.ops {
            match op {
                DetectionOp::Resize { height, width } => {
                    working = resize(&working, *width, *height);
                }
                DetectionOp::NormalizeImage {
                    mean,
                    std,
                    is_scale,
                } => normalize_image(&mut working, mean, std, *is_scale),
                // Layout is always converted to CHW below
                DetectionOp::Permute => {}
            }
        }

        let (in_w, in_h) = working.dimensions();
        let image_tensor = to_nchw(&working);
        let im_shape = arr2(&[[in_h as f32, in_w as f32]]).into_dyn();
        let scale_factor = arr2(&[[
            in_h as f32 / orig_h as f32,
            in_w as f32 / orig_w as f32,
        ]])
        .into_dyn();

        let inputs = self
            .runner
            .input_names()
            .iter()
            .map(|name| match name.as_str() {
                IM_SHAPE_INPUT => im_shape.clone(),
                SCALE_FACTOR_INPUT => scale_factor.clone(),
                _ => image_tensor.clone(),
            })
            .collect();

        Ok(Prepared {
            inputs,
            original_size: (orig_w, orig_h),
            input_size: (in_w, in_h),
        })
    }

    fn infer(&self, prepared: &Prepared) -> Result<Vec<ArrayD<f32>>, PredictorError> {
        self.runner.run(&prepared.inputs)
    }

    fn postprocess(
        &self,
        outputs: Vec<ArrayD<f32>>,
        _prepared: &Prepared,
    ) -> Result<PredictionResult, PredictorError> {
        let boxes = outputs
            .into_iter()
            .next()
            .ok_or_else(|| PredictorError::UnexpectedOutput("model produced no outputs".to_string()))?;

        if boxes.is_empty() {
            return Ok(PredictionResult::Detections(Vec::new()));
        }
        if boxes.shape().last() != Some(&ROW_LEN) {
            return Err(PredictorError::UnexpectedOutput(format!(
                "detection output must end in {} values per box, got shape {:?}",
                ROW_LEN,
                boxes.shape()
            )));
        }

        let values: Vec<f32> = boxes.iter().copied().collect();
        let mut detections = Vec::new();
        for row in values.chunks_exact(ROW_LEN) {
            let class_id = row[0].round() as i64;
            // Fixed-size NMS outputs pad with class -1
            if class_id < 0 {
                continue;
            }
            let score = row[1];
            if !(score >= self.score_threshold) {
                continue;
            }

            let (x1, y1, x2, y2) = (row[2], row[3], row[4], row[5]);
            detections.push(Detection {
                class_id,
                class_name: self.class_name(class_id),
                score,
                bbox: [x1, y1, x2 - x1, y2 - y1],
            });
        }

        debug!(
            "{}: kept {} of {} boxes",
            self.name,
            detections.len(),
            values.len() / ROW_LEN
        );
        Ok(PredictionResult::Detections(detections))
    }
}
