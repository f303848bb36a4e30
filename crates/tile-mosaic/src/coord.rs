//! Geographic to tile-pyramid coordinate mapping

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::TileError;

/// Edge length of every tile in the pyramid (pixels)
pub const TILE_SIZE: u32 = 256;

/// Deepest zoom level of the pyramid
pub const MAX_ZOOM: u8 = 22;

/// A WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Viewport corners plus the zoom level to sample at
///
/// The corners are caller-supplied and may arrive swapped; [`TileGrid::covering`]
/// normalizes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub south_west: LatLng,
    pub north_east: LatLng,
    pub zoom: u8,
}

impl GeoBoundingBox {
    pub fn new(south_west: LatLng, north_east: LatLng, zoom: u8) -> Self {
        Self {
            south_west,
            north_east,
            zoom,
        }
    }
}

/// Tile address in the pyramid, `0 <= x, y < 2^z`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Convert a lat/lng pair to the tile containing it.
///
/// ```text
/// n = 2^zoom
/// x = floor((lng + 180) / 360 * n)
/// y = floor((1 - asinh(tan(lat_rad)) / pi) / 2 * n)
/// ```
///
/// The result is not clamped: positions outside the web-mercator domain yield
/// indices outside `[0, 2^zoom)`.
pub fn deg2tile(lat: f64, lng: f64, zoom: u8) -> (i64, i64) {
    let n = 2.0_f64.powi(i32::from(zoom));
    let lat_rad = lat.to_radians();

    let x = ((lng + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

    (x as i64, y as i64)
}

/// Inclusive rectangle of tile indices at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub z: u8,
}

impl TileGrid {
    /// Smallest grid covering both corners of `bbox`.
    ///
    /// Each axis is sorted independently, so corner ordering does not matter, and
    /// both axes are clamped into the pyramid. Zoom levels above [`MAX_ZOOM`] are
    /// rejected.
    pub fn covering(bbox: &GeoBoundingBox) -> Result<Self, TileError> {
        if bbox.zoom > MAX_ZOOM {
            return Err(TileError::InvalidZoom {
                zoom: bbox.zoom,
                max: MAX_ZOOM,
            });
        }

        let (x_sw, y_sw) = deg2tile(bbox.south_west.lat, bbox.south_west.lng, bbox.zoom);
        let (x_ne, y_ne) = deg2tile(bbox.north_east.lat, bbox.north_east.lng, bbox.zoom);

        // 2^22 - 1 fits in u32
        let last = (1_u32 << bbox.zoom) - 1;
        let clamp = |v: i64| v.clamp(0, i64::from(last)) as u32;

        Ok(Self {
            min_x: clamp(x_sw.min(x_ne)),
            max_x: clamp(x_sw.max(x_ne)),
            min_y: clamp(y_sw.min(y_ne)),
            max_y: clamp(y_sw.max(y_ne)),
            z: bbox.zoom,
        })
    }

    /// Number of tile columns
    pub fn columns(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Number of tile rows
    pub fn rows(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Total number of tiles in the grid
    pub fn tile_count(&self) -> u64 {
        u64::from(self.columns()) * u64::from(self.rows())
    }

    /// Raster size of the stitched grid in pixels (width, height)
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.columns() * TILE_SIZE, self.rows() * TILE_SIZE)
    }

    pub fn contains(&self, index: &TileIndex) -> bool {
        index.z == self.z
            && (self.min_x..=self.max_x).contains(&index.x)
            && (self.min_y..=self.max_y).contains(&index.y)
    }

    /// Pixel offset of a tile's top-left corner inside the stitched raster
    pub fn pixel_offset(&self, index: &TileIndex) -> Option<(u32, u32)> {
        if !self.contains(index) {
            return None;
        }
        Some((
            (index.x - self.min_x) * TILE_SIZE,
            (index.y - self.min_y) * TILE_SIZE,
        ))
    }

    /// Row-major iteration over every index in the grid
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| {
            (self.min_x..=self.max_x).map(move |x| TileIndex { x, y, z: self.z })
        })
    }
}
