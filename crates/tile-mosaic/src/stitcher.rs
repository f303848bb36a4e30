//! Tile grid stitching

use image::{imageops, RgbImage};
use std::collections::BTreeMap;
use tracing::debug;

use crate::coord::{TileGrid, TileIndex};

/// One contiguous raster composed from a tile grid
#[derive(Debug, Clone)]
pub struct StitchedRaster {
    /// RGB pixels, `(columns * 256) x (rows * 256)`
    pub image: RgbImage,
    /// Grid the raster was composed from
    pub grid: TileGrid,
    /// Tiles pasted into the raster
    pub tiles_fetched: usize,
    /// Tiles in the grid
    pub tiles_requested: u64,
}

impl StitchedRaster {
    /// Percentage of grid cells that received a tile
    pub fn coverage(&self) -> f64 {
        if self.tiles_requested == 0 {
            return 0.0;
        }
        self.tiles_fetched as f64 / self.tiles_requested as f64 * 100.0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Paste every tile at its grid-relative offset.
///
/// Cells without a tile stay black. Tiles outside the grid are skipped and tiles
/// larger than a cell are clipped at the raster edge.
pub fn stitch(tiles: &BTreeMap<TileIndex, RgbImage>, grid: &TileGrid) -> RgbImage {
    let (width, height) = grid.pixel_size();
    let mut raster = RgbImage::new(width, height);

    for (index, tile) in tiles {
        match grid.pixel_offset(index) {
            Some((x, y)) => imageops::replace(&mut raster, tile, i64::from(x), i64::from(y)),
            None => debug!("Tile {} lies outside grid, skipping", index),
        }
    }

    raster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TILE_SIZE;
    use image::Rgb;

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgb(color))
    }

    fn grid_2x2() -> TileGrid {
        TileGrid {
            min_x: 100,
            min_y: 200,
            max_x: 101,
            max_y: 201,
            z: 9,
        }
    }

    #[test]
    fn test_two_by_two_placement() {
        let grid = grid_2x2();
        let mut tiles = BTreeMap::new();
        tiles.insert(TileIndex { x: 100, y: 200, z: 9 }, solid([255, 0, 0]));
        tiles.insert(TileIndex { x: 101, y: 200, z: 9 }, solid([0, 255, 0]));
        tiles.insert(TileIndex { x: 100, y: 201, z: 9 }, solid([0, 0, 255]));
        tiles.insert(TileIndex { x: 101, y: 201, z: 9 }, solid([255, 255, 255]));

        let raster = stitch(&tiles, &grid);

        assert_eq!(raster.dimensions(), (512, 512));
        assert_eq!(raster.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(raster.get_pixel(255, 255), &Rgb([255, 0, 0]));
        assert_eq!(raster.get_pixel(256, 0), &Rgb([0, 255, 0]));
        assert_eq!(raster.get_pixel(0, 256), &Rgb([0, 0, 255]));
        assert_eq!(raster.get_pixel(256, 256), &Rgb([255, 255, 255]));
        assert_eq!(raster.get_pixel(511, 511), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_missing_tile_leaves_background() {
        let grid = grid_2x2();
        let mut tiles = BTreeMap::new();
        tiles.insert(TileIndex { x: 100, y: 200, z: 9 }, solid([10, 20, 30]));

        let raster = stitch(&tiles, &grid);

        assert_eq!(raster.get_pixel(10, 10), &Rgb([10, 20, 30]));
        assert_eq!(raster.get_pixel(300, 300), &Rgb([0, 0, 0]));
        assert_eq!(raster.get_pixel(300, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_grid_tile_ignored() {
        let grid = grid_2x2();
        let mut tiles = BTreeMap::new();
        tiles.insert(TileIndex { x: 99, y: 200, z: 9 }, solid([9, 9, 9]));

        let raster = stitch(&tiles, &grid);
        assert!(raster.pixels().all(|p| p == &Rgb([0, 0, 0])));
    }

    #[test]
    fn test_oversize_tile_clipped() {
        let grid = TileGrid {
            min_x: 0,
            min_y: 0,
            max_x: 0,
            max_y: 0,
            z: 0,
        };
        let mut tiles = BTreeMap::new();
        tiles.insert(
            TileIndex { x: 0, y: 0, z: 0 },
            RgbImage::from_pixel(300, 300, Rgb([1, 2, 3])),
        );

        let raster = stitch(&tiles, &grid);
        assert_eq!(raster.dimensions(), (256, 256));
        assert_eq!(raster.get_pixel(255, 255), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_coverage() {
        let raster = StitchedRaster {
            image: RgbImage::new(512, 512),
            grid: grid_2x2(),
            tiles_fetched: 3,
            tiles_requested: 4,
        };
        assert!((raster.coverage() - 75.0).abs() < f64::EPSILON);
    }
}
