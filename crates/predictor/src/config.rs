//! Model descriptor (`model.yml`) loading
//!
//! Exported models ship with one of three descriptor shapes:
//!
//! ```text
//! detection          Preprocess: [{type: Resize, ...}, ...]   label_list: [...]
//! segmentation (a)   Deploy: {transforms: [{type: Normalize, ...}]}
//! segmentation (b)   Transforms: [{type: Normalize, ...}]
//! ```
//!
//! The descriptor is parsed into a raw form, classified by shape and validated
//! eagerly into [`ModelConfig`].

use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::ConfigError;

/// Descriptor file name inside a model directory
pub const DESCRIPTOR_FILE: &str = "model.yml";

const DEFAULT_SEG_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const DEFAULT_SEG_STD: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(rename = "Preprocess", alias = "preprocess", default)]
    preprocess: Option<Vec<RawOp>>,
    #[serde(default)]
    label_list: Option<Vec<String>>,
    #[serde(rename = "Deploy", alias = "deploy", default)]
    deploy: Option<RawDeploy>,
    #[serde(rename = "Transforms", alias = "transforms", default)]
    transforms: Option<Vec<RawOp>>,
}

#[derive(Debug, Deserialize)]
struct RawDeploy {
    #[serde(default)]
    transforms: Vec<RawOp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTargetSize {
    Square(u32),
    Sized(Vec<u32>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawOp {
    Resize {
        target_size: RawTargetSize,
    },
    NormalizeImage {
        mean: Vec<f32>,
        std: Vec<f32>,
        #[serde(default = "default_true")]
        is_scale: bool,
    },
    Permute,
    Normalize {
        #[serde(default)]
        mean: Option<Vec<f32>>,
        #[serde(default)]
        std: Option<Vec<f32>>,
        #[serde(default)]
        to_rgb: bool,
    },
    #[serde(other)]
    Unsupported,
}

fn default_true() -> bool {
    true
}

/// Validated detection preprocessing step
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOp {
    /// Bilinear resize to `height x width`
    Resize { height: u32, width: u32 },
    /// Optional `/255`, then `(v - mean) / std` per channel
    NormalizeImage {
        mean: [f32; 3],
        std: [f32; 3],
        is_scale: bool,
    },
    /// HWC to CHW
    Permute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub label_list: Vec<String>,
    /// Applied in descriptor order
    pub ops: Vec<DetectionOp>,
}

/// Which descriptor shape a segmentation model came with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationDialect {
    Deploy,
    Transforms,
}

/// `(v / 255 - mean) / std`, with an optional BGR to RGB swap first
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub to_rgb: bool,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: DEFAULT_SEG_MEAN,
            std: DEFAULT_SEG_STD,
            to_rgb: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    pub dialect: SegmentationDialect,
    /// Applied in descriptor order; never empty
    pub normalize: Vec<Normalization>,
}

/// A validated model descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ModelConfig {
    Detection(DetectionConfig),
    Segmentation(SegmentationConfig),
}

impl ModelConfig {
    /// Read `model.yml` from a model directory
    pub fn load(model_dir: &Path) -> Result<Self, ConfigError> {
        let path = model_dir.join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        info!("Loading model descriptor: {}", path.display());
        let raw = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize::<RawDescriptor>())
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        Self::from_raw(raw)
    }

    /// Parse a descriptor held in memory
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize::<RawDescriptor>())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        Self::from_raw(raw)
    }

    pub fn family(&self) -> &'static str {
        match self {
            ModelConfig::Detection(_) => "detection",
            ModelConfig::Segmentation(_) => "segmentation",
        }
    }

    pub fn into_detection(self) -> Result<DetectionConfig, ConfigError> {
        match self {
            ModelConfig::Detection(config) => Ok(config),
            other => Err(ConfigError::WrongFamily {
                expected: "detection",
                found: other.family(),
            }),
        }
    }

    pub fn into_segmentation(self) -> Result<SegmentationConfig, ConfigError> {
        match self {
            ModelConfig::Segmentation(config) => Ok(config),
            other => Err(ConfigError::WrongFamily {
                expected: "segmentation",
                found: other.family(),
            }),
        }
    }

    fn from_raw(raw: RawDescriptor) -> Result<Self, ConfigError> {
        if let Some(ops) = raw.preprocess {
            let label_list = raw
                .label_list
                .filter(|labels| !labels.is_empty())
                .ok_or(ConfigError::MissingField("label_list"))?;
            return Ok(ModelConfig::Detection(DetectionConfig {
                label_list,
                ops: detection_ops(ops)?,
            }));
        }

        if let Some(deploy) = raw.deploy {
            let mut normalize = segmentation_ops(deploy.transforms, SegmentationDialect::Deploy)?;
            if normalize.is_empty() {
                debug!("Deploy descriptor has no Normalize op, using defaults");
                normalize.push(Normalization::default());
            }
            return Ok(ModelConfig::Segmentation(SegmentationConfig {
                dialect: SegmentationDialect::Deploy,
                normalize,
            }));
        }

        if let Some(transforms) = raw.transforms {
            let normalize = segmentation_ops(transforms, SegmentationDialect::Transforms)?;
            if normalize.is_empty() {
                return Err(ConfigError::MissingField("Transforms Normalize op"));
            }
            return Ok(ModelConfig::Segmentation(SegmentationConfig {
                dialect: SegmentationDialect::Transforms,
                normalize,
            }));
        }

        Err(ConfigError::UnknownSchema)
    }
}

fn detection_ops(raw: Vec<RawOp>) -> Result<Vec<DetectionOp>, ConfigError> {
    let mut ops = Vec::with_capacity(raw.len());

    for op in raw {
        if ops.last() == Some(&DetectionOp::Permute) && !matches!(op, RawOp::Unsupported) {
            return Err(ConfigError::InvalidOrder(
                "Permute must be the last preprocessing step".to_string(),
            ));
        }

        match op {
            RawOp::Resize { target_size } => {
                let (height, width) = match target_size {
                    RawTargetSize::Square(side) => (side, side),
                    RawTargetSize::Sized(dims) if dims.len() == 2 => (dims[0], dims[1]),
                    RawTargetSize::Sized(dims) => {
                        return Err(ConfigError::Parse(format!(
                            "Resize target_size must be an integer or [h, w], got {:?}",
                            dims
                        )))
                    }
                };
                if height == 0 || width == 0 {
                    return Err(ConfigError::Parse("Resize target_size must be positive".to_string()));
                }
                ops.push(DetectionOp::Resize { height, width });
            }
            RawOp::NormalizeImage {
                mean,
                std,
                is_scale,
            } => {
                let (mean, std) = channel_stats(&mean, &std)?;
                ops.push(DetectionOp::NormalizeImage {
                    mean,
                    std,
                    is_scale,
                });
            }
            RawOp::Permute => ops.push(DetectionOp::Permute),
            RawOp::Normalize { .. } | RawOp::Unsupported => {
                debug!("Skipping unsupported detection preprocessing op");
            }
        }
    }

    Ok(ops)
}

fn segmentation_ops(
    raw: Vec<RawOp>,
    dialect: SegmentationDialect,
) -> Result<Vec<Normalization>, ConfigError> {
    let mut normalize = Vec::new();

    for op in raw {
        let RawOp::Normalize { mean, std, to_rgb } = op else {
            debug!("Skipping non-Normalize segmentation transform");
            continue;
        };

        let (mean, std) = match (dialect, mean, std) {
            (_, Some(mean), Some(std)) => channel_stats(&mean, &std)?,
            (SegmentationDialect::Deploy, mean, std) => channel_stats(
                &mean.unwrap_or_else(|| DEFAULT_SEG_MEAN.to_vec()),
                &std.unwrap_or_else(|| DEFAULT_SEG_STD.to_vec()),
            )?,
            (SegmentationDialect::Transforms, _, _) => {
                return Err(ConfigError::MissingField("Transforms Normalize mean/std"))
            }
        };
        normalize.push(Normalization { mean, std, to_rgb });
    }

    Ok(normalize)
}

fn channel_stats(mean: &[f32], std: &[f32]) -> Result<([f32; 3], [f32; 3]), ConfigError> {
    let mean: [f32; 3] = mean.try_into().map_err(|_| {
        ConfigError::InvalidNormalization(format!("mean needs 3 channels, got {}", mean.len()))
    })?;
    let std: [f32; 3] = std.try_into().map_err(|_| {
        ConfigError::InvalidNormalization(format!("std needs 3 channels, got {}", std.len()))
    })?;
    if std.iter().any(|s| *s == 0.0) {
        return Err(ConfigError::InvalidNormalization("std must be non-zero".to_string()));
    }
    Ok((mean, std))
}
