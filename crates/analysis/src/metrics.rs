//! Per-task metrics derived from prediction results
//!
//! All areas assume a fixed ground-sample distance. This is a known accuracy
//! limitation: the real pixel footprint depends on the tile zoom level or the
//! sensor resolution, neither of which is calibrated here.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use predictor::{Detection, LabelMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::skeleton;

/// Assumed ground-sample distance, metres per pixel side
pub const GROUND_SAMPLE_DISTANCE_M: f64 = 0.5;

/// Ground area covered by one pixel, square metres
pub const PIXEL_AREA_M2: f64 = GROUND_SAMPLE_DISTANCE_M * GROUND_SAMPLE_DISTANCE_M;

const M2_PER_KM2: f64 = 1_000_000.0;

/// A land-cover class of the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandCoverClass {
    pub id: u8,
    pub name: &'static str,
    /// Overlay colour, RGB
    pub color: [u8; 3],
}

/// Classes reported by land segmentation; label 0 is background
pub const LAND_COVER_CLASSES: [LandCoverClass; 6] = [
    LandCoverClass { id: 1, name: "Building", color: [255, 0, 0] },
    LandCoverClass { id: 2, name: "Road", color: [128, 128, 128] },
    LandCoverClass { id: 3, name: "Water", color: [0, 0, 255] },
    LandCoverClass { id: 4, name: "Vegetation", color: [0, 255, 0] },
    LandCoverClass { id: 5, name: "Farmland", color: [255, 255, 0] },
    LandCoverClass { id: 6, name: "Other", color: [255, 0, 255] },
];

/// Round half away from zero to `places` decimals
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(part as f64 / total as f64 * 100.0, 2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub total_detections: usize,
    pub count_by_class: BTreeMap<String, usize>,
}

impl DetectionMetrics {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut count_by_class = BTreeMap::new();
        for detection in detections {
            *count_by_class.entry(detection.class_name.clone()).or_insert(0) += 1;
        }
        Self {
            total_detections: detections.len(),
            count_by_class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadMetrics {
    /// Skeleton length, km (4 dp)
    pub road_length_km: f64,
    /// 8-connected road regions
    pub road_segment_count: u32,
    /// Share of road pixels, % (2 dp)
    pub road_coverage_percent: f64,
}

impl RoadMetrics {
    pub fn from_label_map(labels: &LabelMap) -> Self {
        let mask = road_mask(labels);

        let skeleton_px = skeleton::foreground_count(&skeleton::thin(&mask));
        let road_length_km = round_to(skeleton_px as f64 * GROUND_SAMPLE_DISTANCE_M / 1000.0, 4);

        let components = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let road_segment_count = components.pixels().map(|p| p[0]).max().unwrap_or(0);

        let road_px = skeleton::foreground_count(&mask);

        Self {
            road_length_km,
            road_segment_count,
            road_coverage_percent: percent(road_px, labels.len() as u64),
        }
    }
}

/// Any non-background label is road
pub(crate) fn road_mask(labels: &LabelMap) -> GrayImage {
    GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
        if labels.get(x, y) > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCoverEntry {
    pub class_id: u8,
    pub class_name: String,
    pub pixel_count: u64,
    /// m² (2 dp)
    pub area_m2: f64,
    /// Share of all pixels, % (2 dp)
    pub percentage: f64,
}

/// One entry per land-cover class, background excluded
pub fn land_cover(labels: &LabelMap) -> Vec<LandCoverEntry> {
    let histogram = labels.histogram();
    let total = labels.len() as u64;

    LAND_COVER_CLASSES
        .iter()
        .map(|class| {
            let pixel_count = histogram[class.id as usize];
            LandCoverEntry {
                class_id: class.id,
                class_name: class.name.to_string(),
                pixel_count,
                area_m2: round_to(pixel_count as f64 * PIXEL_AREA_M2, 2),
                percentage: percent(pixel_count, total),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMetrics {
    /// km² (4 dp)
    pub change_area_km2: f64,
    /// % (2 dp)
    pub change_rate_percent: f64,
}

impl ChangeMetrics {
    /// From a binary change map (1 = changed)
    pub fn from_change_map(changes: &LabelMap) -> Self {
        let changed = changes.count(1);
        Self {
            change_area_km2: round_to(changed as f64 * PIXEL_AREA_M2 / M2_PER_KM2, 4),
            change_rate_percent: percent(changed, changes.len() as u64),
        }
    }
}

/// Metrics of any task, serialized without a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskMetrics {
    Detection(DetectionMetrics),
    Road(RoadMetrics),
    LandCover(Vec<LandCoverEntry>),
    Change(ChangeMetrics),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detection(name: &str) -> Detection {
        Detection {
            class_id: 0,
            class_name: name.to_string(),
            score: 0.9,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }
    }

    #[test]
    fn test_detection_counts() {
        let metrics = DetectionMetrics::from_detections(&[
            detection("aircraft"),
            detection("oiltank"),
            detection("aircraft"),
        ]);
        assert_eq!(metrics.total_detections, 3);
        assert_eq!(metrics.count_by_class["aircraft"], 2);
        assert_eq!(metrics.count_by_class["oiltank"], 1);
    }

    #[test]
    fn test_road_metrics_two_segments() {
        // Two separate horizontal roads, 1 px wide, 100 px long, on a 100x10 map
        let labels = LabelMap::from_fn(100, 10, |_, y| u8::from(y == 2 || y == 7));
        let metrics = RoadMetrics::from_label_map(&labels);

        assert_eq!(metrics.road_segment_count, 2);
        assert_eq!(metrics.road_coverage_percent, 20.0);
        // 200 skeleton px * 0.5 m
        assert_eq!(metrics.road_length_km, 0.1);
    }

    #[test]
    fn test_diagonal_road_is_one_segment() {
        let labels = LabelMap::from_fn(10, 10, |x, y| u8::from(x == y));
        let metrics = RoadMetrics::from_label_map(&labels);
        assert_eq!(metrics.road_segment_count, 1);
    }

    #[test]
    fn test_no_roads() {
        let metrics = RoadMetrics::from_label_map(&LabelMap::from_fn(4, 4, |_, _| 0));
        assert_eq!(metrics.road_segment_count, 0);
        assert_eq!(metrics.road_length_km, 0.0);
        assert_eq!(metrics.road_coverage_percent, 0.0);
    }

    #[test]
    fn test_land_cover_entries() {
        // 10x10: 40 px building, 20 px water, 40 px background
        let labels = LabelMap::from_fn(10, 10, |x, _| match x {
            0..=3 => 1,
            4..=5 => 3,
            _ => 0,
        });
        let entries = land_cover(&labels);

        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].class_name, "Building");
        assert_eq!(entries[0].pixel_count, 40);
        assert_eq!(entries[0].area_m2, 10.0);
        assert_eq!(entries[0].percentage, 40.0);
        assert_eq!(entries[2].class_name, "Water");
        assert_eq!(entries[2].percentage, 20.0);
        assert_eq!(entries[5].pixel_count, 0);
    }

    #[test]
    fn test_change_metrics() {
        // 4000 x 1000 px = 1 km² total at 0.25 m²/px, a quarter changed
        let changes = LabelMap::from_fn(4000, 1000, |x, _| u8::from(x < 1000));
        let metrics = ChangeMetrics::from_change_map(&changes);
        assert_eq!(metrics.change_area_km2, 0.25);
        assert_eq!(metrics.change_rate_percent, 25.0);
    }

    #[test]
    fn test_untagged_serialization() {
        let metrics = TaskMetrics::Change(ChangeMetrics {
            change_area_km2: 0.01,
            change_rate_percent: 1.5,
        });
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["change_rate_percent"], 1.5);
        assert!(json.get("Change").is_none());
    }

    proptest! {
        #[test]
        fn prop_land_cover_area_and_share(labels in proptest::collection::vec(0u8..8, 1..400)) {
            let width = labels.len() as u32;
            let map = LabelMap::new(width, 1, labels).unwrap();
            let entries = land_cover(&map);

            let total_share: f64 = entries.iter().map(|e| e.percentage).sum();
            prop_assert!(total_share <= 100.0 + 0.05);
            for entry in &entries {
                prop_assert_eq!(entry.area_m2, round_to(entry.pixel_count as f64 * 0.25, 2));
            }
        }
    }
}
