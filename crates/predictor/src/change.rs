//! Bi-temporal change detection adapter

use image::imageops::{self, FilterType};
use ndarray::{concatenate, ArrayD, Axis};
use std::path::Path;
use tracing::{debug, info};

use crate::backend::{BackendKind, ModelRunner};
use crate::config::{ModelConfig, SegmentationConfig};
use crate::preprocess::segmentation_tensor;
use crate::{
    LabelMap, PredictionResult, Predictor, PredictorError, PredictorInput, PredictorKind, Prepared,
};

/// Takes a before/after pair and yields a binary change map (1 = changed)
pub struct ChangePredictor {
    name: String,
    config: SegmentationConfig,
    runner: ModelRunner,
}

impl ChangePredictor {
    pub fn new(name: &str, config: SegmentationConfig, runner: ModelRunner) -> Self {
        Self {
            name: name.to_string(),
            config,
            runner,
        }
    }

    pub fn from_dir(name: &str, model_dir: &Path, backend: BackendKind) -> Result<Self, PredictorError> {
        let config = ModelConfig::load(model_dir)?.into_segmentation()?;
        let runner = ModelRunner::load(backend, model_dir)?;
        info!(
            "Change detection model '{}' ready ({} inputs)",
            name,
            runner.input_names().len()
        );
        Ok(Self::new(name, config, runner))
    }
}

impl Predictor for ChangePredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::ChangeDetection
    }

    fn preprocess(&self, input: &PredictorInput) -> Result<Prepared, PredictorError> {
        let PredictorInput::Pair(before, after) = input else {
            return Err(PredictorError::InvalidInput(
                "change detection takes an image pair".to_string(),
            ));
        };
        let (width, height) = before.dimensions();
        if width == 0 || height == 0 || after.width() == 0 || after.height() == 0 {
            return Err(PredictorError::InvalidInput("image is empty".to_string()));
        }

        let resized;
        let after = if after.dimensions() != (width, height) {
            debug!(
                "Resizing second image {:?} to {}x{}",
                after.dimensions(),
                width,
                height
            );
            resized = imageops::resize(after, width, height, FilterType::Triangle);
            &resized
        } else {
            after
        };

        let first = segmentation_tensor(before, &self.config.normalize);
        let second = segmentation_tensor(after, &self.config.normalize);

        let inputs = if self.runner.input_names().len() >= 2 {
            vec![first, second]
        } else {
            // Single-input models take both acquisitions stacked on the channel axis
            let stacked = concatenate(Axis(1), &[first.view(), second.view()])
                .map_err(|e| PredictorError::InvalidInput(e.to_string()))?;
            vec![stacked]
        };

        Ok(Prepared {
            inputs,
            original_size: (width, height),
            input_size: (width, height),
        })
    }

    fn infer(&self, prepared: &Prepared) -> Result<Vec<ArrayD<f32>>, PredictorError> {
        self.runner.run(&prepared.inputs)
    }

    fn postprocess(
        &self,
        outputs: Vec<ArrayD<f32>>,
        prepared: &Prepared,
    ) -> Result<PredictionResult, PredictorError> {
        let output = outputs
            .first()
            .ok_or_else(|| PredictorError::UnexpectedOutput("model produced no outputs".to_string()))?;

        let (width, height) = prepared.original_size;
        let changes = LabelMap::from_output(output)?
            .resize_nearest(width, height)
            .binarize();
        Ok(PredictionResult::LabelMap(changes))
    }
}
