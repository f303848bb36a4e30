//! Semantic segmentation adapter

use ndarray::ArrayD;
use std::path::Path;
use tracing::info;

use crate::backend::{BackendKind, ModelRunner};
use crate::config::{ModelConfig, SegmentationConfig};
use crate::preprocess::segmentation_tensor;
use crate::{
    LabelMap, PredictionResult, Predictor, PredictorError, PredictorInput, PredictorKind, Prepared,
};

/// Per-pixel classifier for either segmentation descriptor dialect
pub struct SegmentationPredictor {
    name: String,
    config: SegmentationConfig,
    runner: ModelRunner,
}

impl SegmentationPredictor {
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
            "Segmentation model '{}' ready ({:?} descriptor)",
            name, config.dialect
        );
        Ok(Self::new(name, config, runner))
    }
}

impl Predictor for SegmentationPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Segmentation
    }

    fn preprocess(&self, input: &PredictorInput) -> Result<Prepared, PredictorError> {
        let PredictorInput::Single(image) = input else {
            return Err(PredictorError::InvalidInput(
                "segmentation takes a single image".to_string(),
            ));
        };
        if image.width() == 0 || image.height() == 0 {
            return Err(PredictorError::InvalidInput("image is empty".to_string()));
        }

        Ok(Prepared {
            inputs: vec![segmentation_tensor(image, &self.config.normalize)],
            original_size: image.dimensions(),
            input_size: image.dimensions(),
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
        let labels = LabelMap::from_output(output)?.resize_nearest(width, height);
        Ok(PredictionResult::LabelMap(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FnBackend;
    use crate::config::{Normalization, SegmentationDialect};
    use image::{Rgb, RgbImage};
    use ndarray::IxDyn;

    fn config() -> SegmentationConfig {
        SegmentationConfig {
            dialect: SegmentationDialect::Deploy,
            normalize: vec![Normalization::default()],
        }
    }

    /// Model that labels every pixel of a half-resolution map by its column
    fn half_res_backend() -> FnBackend {
        FnBackend::new(&["x"], |inputs| {
            let shape = inputs[0].shape();
            let (h, w) = (shape[2] / 2, shape[3] / 2);
            let labels = ArrayD::from_shape_fn(IxDyn(&[1, h, w]), |idx| (idx[2] % 3) as f32);
            vec![labels]
        })
    }

    #[test]
    fn test_label_map_resized_to_original() {
        let predictor =
            SegmentationPredictor::new("land_segmentation", config(), ModelRunner::new(Box::new(half_res_backend())));
        let input = PredictorInput::Single(RgbImage::from_pixel(64, 40, Rgb([1, 2, 3])));

        let labels = predictor.predict(&input).unwrap().into_label_map().unwrap();

        assert_eq!(labels.dimensions(), (64, 40));
        assert!(labels.labels().iter().all(|l| *l < 3));
        assert_eq!(labels.get(0, 0), 0);
        assert_eq!(labels.get(2, 0), 1);
        assert_eq!(labels.get(4, 39), 2);
    }

    #[test]
    fn test_logit_output() {
        let backend = FnBackend::new(&["x"], |inputs| {
            let shape = inputs[0].shape();
            let (h, w) = (shape[2], shape[3]);
            // class 2 wins everywhere
            let logits = ArrayD::from_shape_fn(IxDyn(&[1, 4, h, w]), |idx| {
                if idx[1] == 2 {
                    5.0
                } else {
                    0.0
                }
            });
            vec![logits]
        });
        let predictor =
            SegmentationPredictor::new("road_extraction", config(), ModelRunner::new(Box::new(backend)));

        let input = PredictorInput::Single(RgbImage::new(8, 8));
        let labels = predictor.predict(&input).unwrap().into_label_map().unwrap();
        assert_eq!(labels.count(2), 64);
    }

    #[test]
    fn test_input_tensor_layout() {
        let predictor =
            SegmentationPredictor::new("land_segmentation", config(), ModelRunner::new(Box::new(half_res_backend())));
        let prepared = predictor
            .preprocess(&PredictorInput::Single(RgbImage::new(10, 6)))
            .unwrap();

        assert_eq!(prepared.inputs.len(), 1);
        assert_eq!(prepared.inputs[0].shape(), &[1, 3, 6, 10]);
        assert!(prepared.inputs[0].iter().all(|v| (*v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_from_dir_requires_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let result = SegmentationPredictor::from_dir("land_segmentation", dir.path(), BackendKind::Tract);
        assert!(matches!(result, Err(PredictorError::Config(_))));
    }

    #[test]
    fn test_from_dir_rejects_detection_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(crate::DESCRIPTOR_FILE),
            "Preprocess:\n- type: Permute\nlabel_list: [car]\n",
        )
        .unwrap();
        let result = SegmentationPredictor::from_dir("land_segmentation", dir.path(), BackendKind::Tract);
        assert!(matches!(
            result,
            Err(PredictorError::Config(crate::ConfigError::WrongFamily { .. }))
        ));
    }
}
