//! Service health

use analysis::TaskType;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when every model is loaded and the database answers, else `degraded`
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub models: ModelStatus,
    /// `None` when the database could not be queried
    pub history_records: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ModelStatus {
    pub loaded: Vec<TaskType>,
    pub missing: Vec<TaskType>,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let loaded = state.analysis.predictors().loaded();
    let missing: Vec<TaskType> = TaskType::ALL
        .iter()
        .copied()
        .filter(|task| !loaded.contains(task))
        .collect();

    let history_records = match state.repository().count().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Health check could not count history records: {}", e);
            None
        }
    };

    let status = if missing.is_empty() && history_records.is_some() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        models: ModelStatus { loaded, missing },
        history_records,
    })
}
