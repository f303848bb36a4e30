//! Remote-Sensing Analysis API Server
//!
//! REST API over the tile, predictor, analysis and history crates.

use analysis::TaskType;
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod settings;
pub mod state;
pub mod validation;

pub use error::{ApiError, FieldError};
pub use settings::{AppConfig, LoggingConfig};
pub use state::AppState;

use routes::{health, history, map_analysis, tasks};

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut analysis_routes = Router::new()
        .nest(
            "/api/object_detection",
            tasks::single_task_routes(TaskType::ObjectDetection),
        )
        .nest(
            "/api/road_extraction",
            tasks::single_task_routes(TaskType::RoadExtraction),
        )
        .nest(
            "/api/land_segmentation",
            tasks::single_task_routes(TaskType::LandSegmentation),
        )
        .nest("/api/change_detection", tasks::change_detection_routes())
        .route(
            "/api/map_analysis/predict_from_coords",
            post(map_analysis::predict_from_coords),
        );

    let limits = &state.config.rate_limit;
    if limits.enabled {
        match rate_limit::create_governor_config(limits) {
            Some(config) => analysis_routes = analysis_routes.layer(GovernorLayer { config }),
            None => tracing::warn!("Rate limiting disabled: invalid settings {:?}", limits),
        }
    }

    let body_limit = state.config.server.body_limit_mb.saturating_mul(1024 * 1024);
    let static_root = state.config.paths.static_root.clone();

    Router::new()
        .route("/api/health", get(health::health_handler))
        .route("/api/history", get(history::list_history))
        .route("/api/history/", get(history::list_history))
        .route(
            "/api/history/:id",
            get(history::get_history).delete(history::delete_history),
        )
        .route("/metrics", get(metrics_handler))
        .merge(analysis_routes)
        .nest_service("/static", ServeDir::new(static_root))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| ApiError::NotFound("No metrics recorder installed".to_string()))
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }
}

/// Run the server until Ctrl-C
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::build(config).await?.with_metrics(handle));
    let app = create_router(state.clone());

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.repository().close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
