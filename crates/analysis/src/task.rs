//! Analysis task kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four analyses the service offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ObjectDetection,
    RoadExtraction,
    LandSegmentation,
    ChangeDetection,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::ObjectDetection,
        TaskType::RoadExtraction,
        TaskType::LandSegmentation,
        TaskType::ChangeDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ObjectDetection => "object_detection",
            TaskType::RoadExtraction => "road_extraction",
            TaskType::LandSegmentation => "land_segmentation",
            TaskType::ChangeDetection => "change_detection",
        }
    }

    /// Whether the task takes a before/after image pair
    pub fn is_pair(&self) -> bool {
        matches!(self, TaskType::ChangeDetection)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|task| task.as_str() == s)
            .ok_or_else(|| format!("unknown task type '{}'", s))
    }
}
