//! Analysis Orchestration
//!
//! Composes a predictor with the per-task metric computation and result
//! rendering, then records the run in the history store:
//! - object detection: box counts per class, annotated image
//! - road extraction: network length, segment count, coverage, binary mask
//! - land segmentation: per-class area and share, colorized overlay
//! - change detection: changed area and rate, binary change mask
//!
//! Also computes the descriptive statistics shown for uploaded images.

pub mod image_stats;
pub mod metrics;
pub mod render;
pub mod service;
pub mod skeleton;
pub mod task;

pub use image_stats::{image_stats, pair_stats, DifferenceMetrics, ImageStats, PairStats};
pub use crate::metrics::{
    ChangeMetrics, DetectionMetrics, LandCoverClass, LandCoverEntry, RoadMetrics, TaskMetrics,
    GROUND_SAMPLE_DISTANCE_M, LAND_COVER_CLASSES, PIXEL_AREA_M2,
};
pub use service::{AnalysisOutcome, AnalysisService, ModelsConfig, OutputPaths, Predictors};
pub use task::TaskType;

use predictor::PredictorError;
use thiserror::Error;

/// Analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("The {0} model is not loaded")]
    ModelUnavailable(TaskType),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Task {task} cannot run on {input}")]
    UnsupportedInput { task: TaskType, input: &'static str },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Prediction(#[from] PredictorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Analysis worker failed: {0}")]
    Worker(String),
}
