//! Analysis of a map viewport: fetch, stitch, predict

use analysis::TaskMetrics;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use image::RgbImage;
use predictor::Detection;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, FieldError};
use crate::routes::{absolute_url, TempFile};
use crate::validation::{validate_coords_request, CoordsRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CoordsResponse {
    pub message: String,
    pub result_url: String,
    pub detection_metrics: TaskMetrics,
    pub raw_results: Option<Vec<Detection>>,
    /// Share of grid tiles that were retrieved (lowest of the two mosaics for change detection)
    pub tile_coverage_percent: f64,
}

/// Write a stitched mosaic to the temp directory for the analysis step
async fn save_mosaic(image: RgbImage, temp_dir: &Path, suffix: &str) -> Result<TempFile, ApiError> {
    let file = TempFile::new(temp_dir.join(format!("{}{}.png", Uuid::new_v4(), suffix)));
    let path = file.path().to_path_buf();
    tokio::task::spawn_blocking(move || image.save(&path))
        .await?
        .map_err(|e| ApiError::Internal(format!("Failed to store mosaic: {}", e)))?;
    Ok(file)
}

pub async fn predict_from_coords(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<CoordsResponse>, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::Validation(vec![FieldError::new("body", e.body_text())]))?;
    let request = validate_coords_request(&body).map_err(ApiError::Validation)?;

    let task = request.task();
    if state.analysis.predictors().get(task).is_none() {
        return Err(ApiError::ModelUnavailable(task));
    }

    let temp_dir = &state.config.paths.temp_dir;
    let (outcome, coverage) = match &request {
        CoordsRequest::Single {
            task,
            bbox,
            template,
        } => {
            info!("{} over viewport at zoom {}", task, bbox.zoom);
            let raster = state.fetcher.fetch_mosaic(bbox, template).await?;
            let coverage = raster.coverage();
            let mosaic = save_mosaic(raster.image, temp_dir, "").await?;
            let outcome = state.analysis.analyze_image(*task, mosaic.path()).await?;
            (outcome, coverage)
        }
        CoordsRequest::Change {
            bbox,
            before,
            after,
        } => {
            info!("{} over viewport at zoom {}", task, bbox.zoom);
            let (before, after) = tokio::try_join!(
                state.fetcher.fetch_mosaic(bbox, before),
                state.fetcher.fetch_mosaic(bbox, after)
            )?;
            let coverage = before.coverage().min(after.coverage());
            let before = save_mosaic(before.image, temp_dir, "_a").await?;
            let after = save_mosaic(after.image, temp_dir, "_b").await?;
            let outcome = state.analysis.analyze_pair(before.path(), after.path()).await?;
            (outcome, coverage)
        }
    };

    Ok(Json(CoordsResponse {
        message: format!("{} analysis succeeded", task),
        result_url: absolute_url(&state, &headers, &outcome.result_url_relative),
        detection_metrics: outcome.metrics,
        raw_results: outcome.raw_results,
        tile_coverage_percent: (coverage * 100.0).round() / 100.0,
    }))
}
