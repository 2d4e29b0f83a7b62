//! Patch aggregation: canonical alert raster → sized vector patches.
//!
//! Per tile: crop to the tile's bounds at the working resolution, mask
//! outside the tile, label same-class 8-connected components, trace their
//! exact outlines and measure them on the ground. Filtering, sorting and
//! ID assignment happen once over the concatenation of every tile
//! ([`finalize`]).

pub mod label;
pub mod trace;

use geo::ConvexHull;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coords::degrees_for_scale;
use crate::error::{AlertError, Result};
use crate::geometry::{bounds_of, surface_ha, AreaProjection, Coord, LineString, MultiPolygon, Polygon};
use crate::grid::{AlertRaster, Grid, ALIGN_TOLERANCE};
use crate::table::AlertPatch;

use label::label_components;
use trace::{trace_outlines, Outline};

/// One clumped patch before global filtering and ID assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchFeature {
    pub geometry: MultiPolygon,
    /// Confidence class, 1 = confirmed, 2 = potential.
    pub alert: u8,
    /// Earliest canonical date in the patch.
    pub date: f64,
    /// Hectares.
    pub surface: f64,
    pub nb_pixel: usize,
}

/// Size metric ordering patches before IDs are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Surface,
    PixelCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateParams {
    /// Ground resolution the raster is brought to before labeling.
    /// `None` keeps the raster's own resolution.
    pub working_scale_m: Option<f64>,
    /// Connected-component size cap.
    pub max_patch_pixels: usize,
    pub area_projection: AreaProjection,
    /// Simplify oversized outlines instead of failing.
    pub best_effort: bool,
    pub max_ring_vertices: usize,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self {
            working_scale_m: Some(30.0),
            max_patch_pixels: 1024,
            area_projection: AreaProjection::WebMercator,
            best_effort: true,
            max_ring_vertices: 10_000,
        }
    }
}

/// Clump the part of `raster` inside `tile` into patches, in label order.
/// A tile the raster does not reach yields no patches.
pub fn aggregate(raster: &AlertRaster, tile: &MultiPolygon, params: &AggregateParams) -> Result<Vec<PatchFeature>> {
    let Some(bounds) = bounds_of(tile) else {
        return Ok(Vec::new());
    };
    let Some(cropped) = raster.crop(&bounds) else {
        return Ok(Vec::new());
    };
    let mut work = at_working_scale(cropped, params.working_scale_m);
    work.mask_outside(tile);
    if work.alert_pixels() == 0 {
        return Ok(Vec::new());
    }

    let labels = label_components(&work.alert, params.max_patch_pixels);
    let outlines = trace_outlines(&labels);

    let n = labels.count();
    let mut min_date = vec![f64::INFINITY; n];
    for (idx, &l) in labels.ids.iter().enumerate() {
        if l != 0 {
            let d = work.date.data[idx];
            if d < min_date[l as usize - 1] {
                min_date[l as usize - 1] = d;
            }
        }
    }

    let mut features = Vec::with_capacity(n);
    for (label, rings) in outlines {
        let i = label as usize - 1;
        let geometry = to_geometry(&rings, &work.alert, label, params)?;
        features.push(PatchFeature {
            surface: surface_ha(&geometry, params.area_projection),
            geometry,
            alert: labels.classes[i],
            date: min_date[i],
            nb_pixel: labels.sizes[i],
        });
    }
    debug!(patches = features.len(), pixels = work.alert_pixels(), "clumped tile");
    Ok(features)
}

/// Resample onto `scale_m` pixels unless already within tolerance.
fn at_working_scale(raster: AlertRaster, scale_m: Option<f64>) -> AlertRaster {
    let Some(scale) = scale_m else {
        return raster;
    };
    let bounds = raster.bounds();
    let target = degrees_for_scale(scale, bounds.center().y);
    let (dx, dy) = raster.alert.pixel_size();
    let off = |have: f64, want: f64| ((have - want) / want).abs() > ALIGN_TOLERANCE;
    if !off(dx, target.0) && !off(dy, target.1) {
        return raster;
    }
    debug!(from = ?(dx, dy), to = ?target, "resampling to working scale");
    let template: Grid<u8> = Grid::covering(&bounds, target, 0);
    raster.resample_like(&template)
}

fn to_geometry(rings: &[Outline], grid: &Grid<u8>, label: u32, params: &AggregateParams) -> Result<MultiPolygon> {
    let (dx, dy) = grid.pixel_size();
    let project = |ring: &[(i64, i64)]| -> LineString {
        ring.iter()
            .map(|&(x, y)| Coord { x: grid.min_lon + x as f64 * dx, y: grid.min_lat + y as f64 * dy })
            .collect()
    };

    let mut polygons = Vec::with_capacity(rings.len());
    for outline in rings {
        let longest = outline
            .holes
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(outline.exterior.len()))
            .max()
            .unwrap_or(0);
        let exterior = project(&outline.exterior);
        if longest > params.max_ring_vertices {
            if !params.best_effort {
                return Err(AlertError::OversizedGeometry { label, limit: params.max_ring_vertices });
            }
            warn!(label, vertices = longest, "outline too detailed, using its convex hull");
            polygons.push(Polygon::new(exterior, Vec::new()).convex_hull());
            continue;
        }
        let holes = outline.holes.iter().map(|h| project(h)).collect();
        polygons.push(Polygon::new(exterior, holes));
    }
    Ok(MultiPolygon::new(polygons))
}

/// Global pass over all tiles' patches: drop those under `min_size`
/// hectares (unless `min_size` is `None`), sort descending by `key` (stable,
/// so ties keep tile order) and number them `0..N`.
pub fn finalize(features: Vec<PatchFeature>, min_size: Option<f64>, key: SortKey) -> Result<Vec<AlertPatch>> {
    let total = features.len();
    let mut kept: Vec<PatchFeature> = match min_size {
        Some(min) => features.into_iter().filter(|f| f.surface >= min).collect(),
        None => features,
    };
    if kept.is_empty() {
        return Err(AlertError::EmptyAggregation);
    }
    match key {
        SortKey::Surface => kept.sort_by(|a, b| b.surface.total_cmp(&a.surface)),
        SortKey::PixelCount => kept.sort_by(|a, b| b.nb_pixel.cmp(&a.nb_pixel)),
    }
    debug!(total, kept = kept.len(), ?key, "filtered and sorted patches");
    Ok(kept
        .into_iter()
        .enumerate()
        .map(|(id, f)| AlertPatch::from_feature(id as u32, f))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{bbox_polygon, BBox};

    fn raster(cells: &[(usize, usize, u8, f64)]) -> AlertRaster {
        let mut r = AlertRaster::masked(10, 10, BBox::new(0.0, 0.0, 0.01, 0.01));
        for &(row, col, class, date) in cells {
            r.set(row, col, class, date);
        }
        r
    }

    fn native() -> AggregateParams {
        AggregateParams { working_scale_m: None, ..AggregateParams::default() }
    }

    fn feature(surface: f64, nb_pixel: usize) -> PatchFeature {
        PatchFeature {
            geometry: bbox_polygon(&BBox::new(0.0, 0.0, 0.001, 0.001)),
            alert: 1,
            date: 2021.1,
            surface,
            nb_pixel,
        }
    }

    #[test]
    fn patch_carries_min_date_and_pixel_count() {
        let r = raster(&[(2, 2, 1, 2021.050), (2, 3, 1, 2021.040), (3, 3, 1, 2021.060)]);
        let tile = bbox_polygon(&r.bounds());
        let out = aggregate(&r, &tile, &native()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].nb_pixel, 3);
        assert_eq!(out[0].alert, 1);
        assert!((out[0].date - 2021.040).abs() < 1e-9);
        assert!(out[0].surface > 0.0);
    }

    /// ✓ Masked pixels never produce a polygon.
    #[test]
    fn empty_raster_yields_nothing() {
        let r = raster(&[]);
        let tile = bbox_polygon(&r.bounds());
        assert!(aggregate(&r, &tile, &native()).unwrap().is_empty());
    }

    #[test]
    fn pixels_outside_the_tile_are_ignored() {
        let r = raster(&[(0, 0, 1, 2021.1), (9, 9, 2, 2021.2)]);
        let tile = bbox_polygon(&BBox::new(0.0, 0.0, 0.005, 0.005));
        let out = aggregate(&r, &tile, &native()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].alert, 1);
    }

    #[test]
    fn geometry_surface_matches_pixel_footprint() {
        let r = raster(&[(4, 4, 2, 2021.3), (4, 5, 2, 2021.3), (5, 4, 2, 2021.3), (5, 5, 2, 2021.3)]);
        let tile = bbox_polygon(&r.bounds());
        let out = aggregate(&r, &tile, &native()).unwrap();
        let block = bbox_polygon(&BBox::new(0.004, 0.004, 0.006, 0.006));
        let expected = surface_ha(&block, AreaProjection::WebMercator);
        assert!((out[0].surface - expected).abs() < 1e-9 * expected.max(1.0));
        assert_eq!(out[0].geometry.0.len(), 1);
        assert_eq!(out[0].geometry.0[0].exterior().0.len(), 5, "four corners plus the closing vertex");
    }

    #[test]
    fn working_scale_resamples_coarse_rasters() {
        let r = raster(&[(0, 0, 1, 2021.1)]);
        let tile = bbox_polygon(&r.bounds());
        let out = aggregate(&r, &tile, &AggregateParams::default()).unwrap();
        // one 0.001° pixel ≈ 111 m, i.e. roughly 4×4 pixels at 30 m
        assert_eq!(out.len(), 1);
        assert!(out[0].nb_pixel >= 9 && out[0].nb_pixel <= 25, "got {}", out[0].nb_pixel);
    }

    #[test]
    fn oversized_outline_fails_without_best_effort() {
        let cells: Vec<_> = (0..10).step_by(2).map(|c| (0, c, 1, 2021.1)).chain((0..10).map(|c| (1, c, 1, 2021.1))).collect();
        let r = raster(&cells);
        let tile = bbox_polygon(&r.bounds());
        let strict = AggregateParams { best_effort: false, max_ring_vertices: 6, ..native() };
        assert!(matches!(aggregate(&r, &tile, &strict), Err(AlertError::OversizedGeometry { limit: 6, .. })));

        let lenient = AggregateParams { max_ring_vertices: 6, ..native() };
        let out = aggregate(&r, &tile, &lenient).unwrap();
        assert_eq!(out[0].nb_pixel, 15);
        assert!(out[0].geometry.0[0].interiors().is_empty());
    }

    /// ✓ Filtering happens before sorting and IDs are contiguous.
    #[test]
    fn finalize_filters_sorts_and_numbers() {
        let feats = vec![feature(3.0, 3), feature(12.0, 10), feature(5.0, 4), feature(7.5, 12)];
        let rows = finalize(feats, Some(5.0), SortKey::Surface).unwrap();
        let ids: Vec<u32> = rows.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let surfaces: Vec<f64> = rows.iter().map(|p| p.surface).collect();
        assert_eq!(surfaces, vec![12.0, 7.5, 5.0]);
    }

    #[test]
    fn pixel_count_key_orders_by_pixels() {
        let feats = vec![feature(12.0, 10), feature(7.5, 12)];
        let rows = finalize(feats, None, SortKey::PixelCount).unwrap();
        assert_eq!(rows[0].nb_pixel, 12);
    }

    #[test]
    fn nothing_left_is_empty_aggregation() {
        assert!(matches!(finalize(vec![feature(1.0, 1)], Some(5.0), SortKey::Surface), Err(AlertError::EmptyAggregation)));
        assert!(matches!(finalize(Vec::new(), None, SortKey::Surface), Err(AlertError::EmptyAggregation)));
    }
}
