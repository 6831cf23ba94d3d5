//! Tiling of image planes into overlapping blocks.
//!
//! Tiles overlap by [`OVERLAP`] pixels so a stack of 3x3 layers (each
//! losing one pixel per side) can run on every tile independently and
//! still reassemble without seams; the layer depth must satisfy
//! `2 * depth <= OVERLAP`.

use crate::error::{Error, Result};
use crate::image_plane::ImagePlane;

/// Edge length of a full tile.
pub const BLOCK_SIZE: usize = 128;
/// Pixels shared between neighboring tiles.
pub const OVERLAP: usize = 14;

/// Tile layout of one blocking pass. Tiles are enumerated row-major:
/// `tile_index = row * cols + col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub cols: usize,
    pub rows: usize,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn of(width: usize, height: usize) -> TileGrid {
        let step = BLOCK_SIZE - OVERLAP;
        TileGrid {
            cols: width.saturating_sub(OVERLAP).div_ceil(step).max(1),
            rows: height.saturating_sub(OVERLAP).div_ceil(step).max(1),
        }
    }
}

/// Split three same-size planes into overlapping tiles. Every tile is
/// `BLOCK_SIZE` square except the rightmost column and bottom row, which
/// carry the remainder.
pub fn split(planes: &[ImagePlane; 3]) -> (Vec<Vec<ImagePlane>>, TileGrid) {
    let width = planes[0].width;
    let height = planes[0].height;
    let grid = TileGrid::of(width, height);
    let step = BLOCK_SIZE - OVERLAP;

    let mut tiles = Vec::with_capacity(grid.len());
    for b in 0..grid.len() {
        let col = b % grid.cols;
        let row = b / grid.cols;
        let tile_width = if col == grid.cols - 1 {
            width - step * col
        } else {
            BLOCK_SIZE
        };
        let tile_height = if row == grid.rows - 1 {
            height - step * row
        } else {
            BLOCK_SIZE
        };
        let origin_x = col * step;
        let origin_y = row * step;

        let mut tile = Vec::with_capacity(planes.len());
        for plane in planes {
            let mut channel = ImagePlane::new(tile_width, tile_height);
            for h in 0..tile_height {
                let src = plane.index(origin_x, origin_y + h);
                let dst = h * tile_width;
                channel.buffer[dst..dst + tile_width]
                    .copy_from_slice(&plane.buffer[src..src + tile_width]);
            }
            tile.push(channel);
        }
        tiles.push(tile);
    }
    (tiles, grid)
}

/// Reassemble tile outputs into three planes. Tile `(col, row)` lands at
/// `(col * tile_width, row * tile_height)` where the tile dimensions are
/// those of tile 0; output dimensions are the sum of tile widths along
/// the top row and tile heights down the left column.
pub fn merge(tiles: &[Vec<ImagePlane>], grid: TileGrid) -> Result<[ImagePlane; 3]> {
    if tiles.len() != grid.len() {
        return Err(Error::SizeMismatch(format!(
            "deblock: {} tiles for a {}x{} grid",
            tiles.len(),
            grid.cols,
            grid.rows
        )));
    }
    let tile_width = tiles[0][0].width;
    let tile_height = tiles[0][0].height;
    let width: usize = tiles[..grid.cols].iter().map(|t| t[0].width).sum();
    let height: usize = tiles
        .iter()
        .step_by(grid.cols)
        .map(|t| t[0].height)
        .sum();

    let mut planes = [
        ImagePlane::new(width, height),
        ImagePlane::new(width, height),
        ImagePlane::new(width, height),
    ];
    for (b, tile) in tiles.iter().enumerate() {
        if tile.len() != planes.len() {
            return Err(Error::SizeMismatch(format!(
                "deblock: tile {b} has {} planes, expected {}",
                tile.len(),
                planes.len()
            )));
        }
        let col = b % grid.cols;
        let row = b / grid.cols;
        for (plane, channel) in planes.iter_mut().zip(tile) {
            for h in 0..channel.height {
                let src = h * channel.width;
                let dst = plane.index(col * tile_width, row * tile_height + h);
                plane.buffer[dst..dst + channel.width]
                    .copy_from_slice(&channel.buffer[src..src + channel.width]);
            }
        }
    }
    Ok(planes)
}
