//! Regular grid tiling of an area of interest.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlertError, Result};
use crate::geometry::{bounds_of, clip_to_bbox, intersects_bbox, BBox, MultiPolygon};

/// One grid cell intersected with the AOI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// `{lon}E-{lat}N` of the cell's south-west corner, 4 decimals.
    pub id: String,
    pub cell: BBox,
    pub geometry: MultiPolygon,
}

/// Cells of `cell_size` degrees anchored on the AOI's south-west corner,
/// clipped to the AOI, empty intersections dropped. Ordered west to east,
/// then south to north within a column.
pub fn tile(aoi: &MultiPolygon, cell_size: f64) -> Result<Vec<Tile>> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(AlertError::Config(format!("cell size must be positive, got {cell_size}")));
    }
    let bounds = bounds_of(aoi)
        .ok_or_else(|| AlertError::InvalidGeometry("empty area of interest".into()))?;
    let cols = ((bounds.width() / cell_size) - 1e-9).ceil().max(1.0) as usize;
    let rows = ((bounds.height() / cell_size) - 1e-9).ceil().max(1.0) as usize;

    let mut tiles = Vec::new();
    for i in 0..cols {
        let lon = bounds.min_x + i as f64 * cell_size;
        for j in 0..rows {
            let lat = bounds.min_y + j as f64 * cell_size;
            let cell = BBox::new(lon, lat, lon + cell_size, lat + cell_size);
            if !intersects_bbox(aoi, &cell) {
                continue;
            }
            let geometry = clip_to_bbox(aoi, &cell);
            if geometry.0.is_empty() {
                continue;
            }
            tiles.push(Tile { id: format!("{lon:.4}E-{lat:.4}N"), cell, geometry });
        }
    }
    debug!(tiles = tiles.len(), cols, rows, cell_size, "tiled area of interest");
    Ok(tiles)
}
