//! Upload-then-predict endpoints of each task

use analysis::{image_stats, pair_stats, AnalysisOutcome, ImageStats, PairStats, TaskMetrics, TaskType};
use axum::extract::multipart::Field;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use predictor::Detection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::{absolute_url, resolve_upload, TempFile};
use crate::AppState;

/// Statistics of an uploaded image and where it was stored
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub metrics: ImageStats,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PairPaths {
    pub path_a: String,
    pub path_b: String,
}

#[derive(Debug, Serialize)]
pub struct PairUploadResponse {
    pub metrics: PairStats,
    pub paths: PairPaths,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PairPredictRequest {
    pub path_a: Option<String>,
    pub path_b: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub result_url: String,
    pub detection_metrics: TaskMetrics,
    pub raw_results: Option<Vec<Detection>>,
}

impl PredictResponse {
    pub(crate) fn new(state: &AppState, headers: &HeaderMap, outcome: AnalysisOutcome) -> Self {
        Self {
            result_url: absolute_url(state, headers, &outcome.result_url_relative),
            detection_metrics: outcome.metrics,
            raw_results: outcome.raw_results,
        }
    }
}

/// `/upload_and_analyze_single` and `/predict` for a single-image task
pub fn single_task_routes(task: TaskType) -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload_and_analyze_single", post(upload_single))
        .route(
            "/predict",
            post(
                move |state: State<Arc<AppState>>,
                      headers: HeaderMap,
                      body: Result<Json<PredictRequest>, JsonRejection>| {
                    predict_single(task, state, headers, body)
                },
            ),
        )
}

pub fn change_detection_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload_and_analyze_metrics", post(upload_pair))
        .route("/predict", post(predict_pair))
}

/// Store one multipart file field under a fresh name; returns (stored path, client file name)
async fn save_field(field: Field<'_>, temp_dir: &Path) -> Result<(TempFile, String), ApiError> {
    let field_name = field.name().unwrap_or_default().to_string();
    let file_name = field.file_name().unwrap_or_default().to_string();
    if file_name.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No file selected in field '{}'",
            field_name
        )));
    }

    let extension = Path::new(&file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let target = TempFile::new(temp_dir.join(format!("{}{}", Uuid::new_v4(), extension)));

    let bytes = field.bytes().await?;
    tokio::fs::write(target.path(), &bytes).await?;
    debug!("Stored upload '{}' ({} bytes) at {}", file_name, bytes.len(), target.path().display());
    Ok((target, file_name))
}

/// Read the named multipart files, in the order given
async fn read_files(
    multipart: &mut Multipart,
    temp_dir: &Path,
    names: &[&str],
) -> Result<Vec<(TempFile, String)>, ApiError> {
    let mut found: Vec<Option<(TempFile, String)>> = names.iter().map(|_| None).collect();

    while let Some(field) = multipart.next_field().await? {
        let Some(slot) = field
            .name()
            .and_then(|name| names.iter().position(|n| *n == name))
        else {
            continue;
        };
        found[slot] = Some(save_field(field, temp_dir).await?);
    }

    let mut files = Vec::with_capacity(names.len());
    for (name, file) in names.iter().zip(found) {
        let file =
            file.ok_or_else(|| ApiError::BadRequest(format!("No file found in field '{}'", name)))?;
        files.push(file);
    }
    Ok(files)
}

/// Keep an upload on disk and report its path
fn keep(file: TempFile) -> String {
    file.keep().to_string_lossy().into_owned()
}

fn unreadable(e: analysis::AnalysisError) -> ApiError {
    ApiError::BadRequest(format!("Unreadable image: {}", e))
}

pub async fn upload_single(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = read_files(&mut multipart, &state.config.paths.temp_dir, &["file"]).await?;
    let Some((file, original_name)) = files.pop() else {
        return Err(ApiError::BadRequest("No file found in field 'file'".to_string()));
    };

    let path = file.path().to_path_buf();
    let mut metrics = tokio::task::spawn_blocking(move || image_stats(&path))
        .await?
        .map_err(unreadable)?;
    metrics.file_name = original_name;

    info!("Accepted upload {} ({})", metrics.file_name, metrics.dimensions);
    Ok(Json(UploadResponse {
        metrics,
        path: keep(file),
    }))
}

pub async fn upload_pair(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PairUploadResponse>, ApiError> {
    let files = read_files(
        &mut multipart,
        &state.config.paths.temp_dir,
        &["image_a", "image_b"],
    )
    .await?;
    let mut files = files.into_iter();
    let (Some((file_a, name_a)), Some((file_b, name_b))) = (files.next(), files.next()) else {
        return Err(ApiError::BadRequest("Two images are required".to_string()));
    };

    let (path_a, path_b): (PathBuf, PathBuf) = (file_a.path().into(), file_b.path().into());
    let mut metrics = tokio::task::spawn_blocking(move || pair_stats(&path_a, &path_b))
        .await?
        .map_err(unreadable)?;
    metrics.image_a.file_name = name_a;
    metrics.image_b.file_name = name_b;

    Ok(Json(PairUploadResponse {
        metrics,
        paths: PairPaths {
            path_a: keep(file_a),
            path_b: keep(file_b),
        },
    }))
}

pub async fn predict_single(
    task: TaskType,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let path = resolve_upload(&state, request.path.as_deref(), "path")?;

    let outcome = state.analysis.analyze_image(task, &path).await?;
    Ok(Json(PredictResponse::new(&state, &headers, outcome)))
}

pub async fn predict_pair(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<PairPredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let path_a = resolve_upload(&state, request.path_a.as_deref(), "path_a")?;
    let path_b = resolve_upload(&state, request.path_b.as_deref(), "path_b")?;

    let outcome = state.analysis.analyze_pair(&path_a, &path_b).await?;
    Ok(Json(PredictResponse::new(&state, &headers, outcome)))
}
