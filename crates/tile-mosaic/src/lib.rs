//! Tile Mosaic
//!
//! Builds analysis rasters straight from a map viewport:
//! - lat/lng to tile index conversion (spherical web-mercator pyramid)
//! - bounded-concurrency tile download
//! - lossless stitching of the tile grid into one RGB raster

pub mod coord;
pub mod fetcher;
pub mod stitcher;
pub mod template;

pub use coord::{deg2tile, GeoBoundingBox, LatLng, TileGrid, TileIndex, MAX_ZOOM, TILE_SIZE};
pub use fetcher::{FetchConfig, MissReason, MissingTilePolicy, TileFetcher, TileSet};
pub use stitcher::{stitch, StitchedRaster};
pub use template::UrlTemplate;

use thiserror::Error;

/// Tile subsystem errors
#[derive(Debug, Error)]
pub enum TileError {
    #[error("Invalid tile URL template: {0}")]
    InvalidTemplate(String),

    #[error("Transport error fetching tile {index}: {message}")]
    Transport { index: TileIndex, message: String },

    #[error("Zoom level {zoom} is beyond the deepest level {max}")]
    InvalidZoom { zoom: u8, max: u8 },

    #[error("Area covers {requested} tiles, limit is {max}")]
    TooManyTiles { requested: u64, max: u64 },

    #[error("No tiles could be retrieved")]
    NoTiles,

    #[error("HTTP client error: {0}")]
    Client(String),
}
