//! Concurrent tile download

use futures::stream::{self, StreamExt};
use image::RgbImage;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::coord::{GeoBoundingBox, TileGrid, TileIndex};
use crate::stitcher::{stitch, StitchedRaster};
use crate::template::UrlTemplate;
use crate::TileError;

/// What to do when a tile request fails at the transport level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTilePolicy {
    /// Abort the whole fetch on the first transport error
    #[default]
    FailFast,
    /// Record the tile as missing and keep going
    Tolerate,
}

/// Tile fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-tile request timeout (seconds)
    pub timeout_secs: u64,
    /// Maximum in-flight tile requests
    pub concurrency: usize,
    /// Largest grid accepted for one mosaic
    pub max_tiles: u64,
    /// Value substituted for `{s}`
    pub subdomain: String,
    pub policy: MissingTilePolicy,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            concurrency: 8,
            max_tiles: 256,
            subdomain: "2".to_string(),
            policy: MissingTilePolicy::FailFast,
            user_agent: concat!("rs-analysis-server/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Why a grid cell has no tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// Provider answered with a non-200 status
    Status(u16),
    /// Body was not a decodable image
    Decode(String),
    /// Transport failure tolerated under [`MissingTilePolicy::Tolerate`]
    Transport(String),
}

/// Result of fetching one grid
#[derive(Debug, Clone)]
pub struct TileSet {
    pub grid: TileGrid,
    pub tiles: BTreeMap<TileIndex, RgbImage>,
    pub missing: BTreeMap<TileIndex, MissReason>,
}

impl TileSet {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Stitch the fetched tiles; an empty set is a failure
    pub fn into_raster(self) -> Result<StitchedRaster, TileError> {
        if self.tiles.is_empty() {
            return Err(TileError::NoTiles);
        }

        let image = stitch(&self.tiles, &self.grid);
        Ok(StitchedRaster {
            image,
            grid: self.grid,
            tiles_fetched: self.tiles.len(),
            tiles_requested: self.grid.tile_count(),
        })
    }
}

enum TileOutcome {
    Fetched(RgbImage),
    Missing(MissReason),
}

/// Downloads tile grids over HTTP
pub struct TileFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl TileFetcher {
    /// Create a fetcher with its own connection pool
    pub fn new(config: FetchConfig) -> Result<Self, TileError> {
        info!(
            "Creating tile fetcher: timeout={}s, concurrency={}, policy={:?}",
            config.timeout_secs, config.concurrency, config.policy
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TileError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every tile of the grid covering `bbox`.
    ///
    /// Requests run concurrently (bounded by `concurrency`); results are keyed by
    /// index so the set does not depend on completion order.
    pub async fn fetch_tiles(
        &self,
        bbox: &GeoBoundingBox,
        template: &UrlTemplate,
    ) -> Result<TileSet, TileError> {
        let grid = TileGrid::covering(bbox)?;
        let requested = grid.tile_count();
        if requested > self.config.max_tiles {
            return Err(TileError::TooManyTiles {
                requested,
                max: self.config.max_tiles,
            });
        }

        info!(
            "Fetching {} x {} tiles at zoom {} ({} total)",
            grid.columns(),
            grid.rows(),
            grid.z,
            requested
        );

        let indices: Vec<TileIndex> = grid.indices().collect();
        let mut results = stream::iter(indices)
            .map(|index| async move { (index, self.fetch_one(&index, template).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut set = TileSet {
            grid,
            tiles: BTreeMap::new(),
            missing: BTreeMap::new(),
        };

        while let Some((index, outcome)) = results.next().await {
            match outcome {
                Ok(TileOutcome::Fetched(tile)) => {
                    counter!("tile_fetch_total", "outcome" => "fetched").increment(1);
                    set.tiles.insert(index, tile);
                }
                Ok(TileOutcome::Missing(reason)) => {
                    counter!("tile_fetch_total", "outcome" => "missing").increment(1);
                    warn!("Tile {} missing: {:?}", index, reason);
                    set.missing.insert(index, reason);
                }
                Err(message) => {
                    counter!("tile_fetch_total", "outcome" => "transport_error").increment(1);
                    match self.config.policy {
                        MissingTilePolicy::FailFast => {
                            error!("Tile {} failed, aborting fetch: {}", index, message);
                            return Err(TileError::Transport { index, message });
                        }
                        MissingTilePolicy::Tolerate => {
                            warn!("Tile {} failed, continuing: {}", index, message);
                            set.missing.insert(index, MissReason::Transport(message));
                        }
                    }
                }
            }
        }

        debug!(
            "Fetched {}/{} tiles ({} missing)",
            set.tiles.len(),
            requested,
            set.missing.len()
        );
        Ok(set)
    }

    /// Fetch and stitch in one step
    pub async fn fetch_mosaic(
        &self,
        bbox: &GeoBoundingBox,
        template: &UrlTemplate,
    ) -> Result<StitchedRaster, TileError> {
        self.fetch_tiles(bbox, template).await?.into_raster()
    }

    /// `Err` means a transport-level failure; everything else is an outcome.
    async fn fetch_one(&self, index: &TileIndex, template: &UrlTemplate) -> Result<TileOutcome, String> {
        let url = template.render(index, &self.config.subdomain);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Ok(TileOutcome::Missing(MissReason::Status(status.as_u16())));
        }

        let body = response.bytes().await.map_err(|e| e.to_string())?;
        match image::load_from_memory(&body) {
            Ok(tile) => Ok(TileOutcome::Fetched(tile.to_rgb8())),
            Err(e) => Ok(TileOutcome::Missing(MissReason::Decode(e.to_string()))),
        }
    }
}
