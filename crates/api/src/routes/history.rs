//! Analysis history endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use storage::HistoryRecord;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Every recorded analysis, newest first
pub async fn list_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let records = state.repository().list().await?;
    Ok(Json(records))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<HistoryRecord>, ApiError> {
    let record = state.repository().get(id).await?;
    Ok(Json(record))
}

pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.repository().delete(id).await?;
    info!("Deleted history record {}", id);
    Ok(Json(MessageResponse {
        message: format!("History record {} deleted", id),
    }))
}
