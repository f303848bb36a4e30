//! Application context, built once at start-up and shared by every handler

use analysis::{render::load_font, AnalysisService, OutputPaths, Predictors};
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Instant;
use storage::Repository;
use tile_mosaic::TileFetcher;
use tracing::{info, warn};

use crate::settings::AppConfig;

pub struct AppState {
    pub config: AppConfig,
    pub analysis: AnalysisService,
    pub fetcher: TileFetcher,
    /// Renders `/metrics`; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, analysis: AnalysisService, fetcher: TileFetcher) -> Self {
        Self {
            config,
            analysis,
            fetcher,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Create directories, open the database and load every model
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        config.paths.validate()?;
        let paths = output_paths(&config);
        tokio::fs::create_dir_all(&config.paths.temp_dir)
            .await
            .with_context(|| format!("creating {}", config.paths.temp_dir.display()))?;
        paths
            .ensure_dirs()
            .await
            .context("creating output directories")?;

        let repository = Repository::connect(&config.database.url, config.database.max_connections)
            .await
            .context("opening history database")?;

        let models = config.models.clone();
        let predictors = tokio::task::spawn_blocking(move || Predictors::load(&models)).await?;
        let loaded = predictors.loaded();
        info!("{} of 4 models loaded: {:?}", loaded.len(), loaded);

        let fetcher = TileFetcher::new(config.tiles.clone()).context("creating tile fetcher")?;

        let mut analysis = AnalysisService::new(predictors, repository, paths);
        if let Some(font_path) = &config.render.font_path {
            match load_font(font_path) {
                Ok(font) => analysis = analysis.with_font(font),
                Err(e) => warn!("Label font {} unavailable, boxes stay unlabelled: {}", font_path.display(), e),
            }
        }

        Ok(Self::new(config, analysis, fetcher))
    }

    pub fn repository(&self) -> &Repository {
        self.analysis.repository()
    }
}

pub fn output_paths(config: &AppConfig) -> OutputPaths {
    OutputPaths {
        static_root: config.paths.static_root.clone(),
        result_dir: config.paths.result_dir.clone(),
        history_input_dir: config.paths.history_input_dir.clone(),
    }
}
