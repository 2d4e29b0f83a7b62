//! Cross-module scenarios: drivers, year splitting, tiling, clumping, the
//! alert table, exports and raster digestion working together.

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::NaiveDate;
use geo::Area;

use clearcut_core::aggregate::{aggregate, AggregateParams};
use clearcut_core::config::{DriverParams, PipelineConfig};
use clearcut_core::export::{self, ExportFormat};
use clearcut_core::geometry::{bbox_polygon, bounds_of, surface_ha, AreaProjection, BBox};
use clearcut_core::geotiff;
use clearcut_core::grid::{AlertRaster, Grid};
use clearcut_core::jobs::{Backoff, LocalJobRunner, ManualClock};
use clearcut_core::source::{MemorySource, MemoryVectorSource};
use clearcut_core::tiler::tile;
use clearcut_core::{AlertError, AlertQuery, AlertSession, Mutation, Pipeline, Review};

const RADD_ASSET: &str = "projects/radar-wur/raddalert/v1";
const GLAD_ASSET: &str = "projects/glad/alert";

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 10×10 pixels of 0.001° just south of the equator.
fn bounds() -> BBox {
    BBox::new(20.0, -0.51, 20.01, -0.5)
}

fn config() -> PipelineConfig {
    let mut c = PipelineConfig::default();
    c.aggregation.working_scale_m = None;
    c
}

/// RADD bands with `(row, col, native code)` pixels, all dated 2021 day 100.
fn radd_pipeline(cells: &[(usize, usize, f64)]) -> Pipeline {
    let mut alert = Grid::new(10, 10, bounds(), 0.0);
    let mut date = Grid::new(10, 10, bounds(), 0.0);
    for &(r, c, code) in cells {
        alert.set(r, c, code);
        date.set(r, c, 21_100.0);
    }
    let src = MemorySource::new().with_band(RADD_ASSET, "Alert", alert).with_band(RADD_ASSET, "Date", date);
    Pipeline::with_sources(Arc::new(src), Arc::new(MemoryVectorSource::new()), config())
}

fn radd_query(min_size: f64) -> AlertQuery {
    AlertQuery::new("RADD", bbox_polygon(&bounds()), ymd(2021, 1, 1), ymd(2021, 12, 31), min_size)
}

/// Two 3-pixel confirmed blobs and one potential single pixel.
const THREE_BLOBS: &[(usize, usize, f64)] = &[
    (1, 1, 3.0),
    (1, 2, 3.0),
    (2, 2, 3.0),
    (6, 6, 3.0),
    (7, 7, 3.0),
    (8, 8, 3.0),
    (4, 9, 2.0),
];

/// ✓ Two 3-pixel blobs and one 1-pixel blob: IDs 0 and 1 go to the blobs,
/// ID 2 to the single pixel.
#[test]
fn synthetic_three_blob_scenario() {
    let table = radd_pipeline(THREE_BLOBS).run(&radd_query(0.0)).unwrap();
    assert_eq!(table.len(), 3);

    let mut pixels: Vec<usize> = table.iter().map(|p| p.nb_pixel).collect();
    pixels.sort_unstable();
    assert_eq!(pixels, vec![1, 3, 3]);

    let single = table.get(2).unwrap();
    assert_eq!(single.nb_pixel, 1, "the smallest patch is numbered last");
    assert_eq!(single.alert, 2);
    for id in [0, 1] {
        let blob = table.get(id).unwrap();
        assert_eq!((blob.nb_pixel, blob.alert), (3, 1));
        assert_relative_eq!(blob.date, 2021.100, epsilon = 1e-9);
        assert!(blob.review == Review::Unset && blob.comment.is_empty());
    }
}

/// ✓ After the size filter every surface clears the threshold, IDs are
/// `0..N` and surfaces never increase with the ID.
#[test]
fn min_size_filter_sort_and_ids() {
    // 2, 5 and 8 pixels of ~1.24 ha each.
    let mut cells = vec![(0, 0, 3.0), (0, 1, 3.0)];
    cells.extend((0..5).map(|c| (3, c, 3.0)));
    cells.extend((0..8).map(|r| (r, 9, 2.0)));
    let table = radd_pipeline(&cells).run(&radd_query(5.0)).unwrap();

    assert_eq!(table.len(), 2);
    let ids: Vec<u32> = table.iter().map(|p| p.id).collect();
    assert_eq!(ids, (0..table.len() as u32).collect::<Vec<_>>());
    assert!(table.iter().all(|p| p.surface >= 5.0), "every row clears min_size");
    assert!(table.patches().windows(2).all(|w| w[0].surface >= w[1].surface), "surface is non-increasing");
    assert_eq!(table.get(0).unwrap().nb_pixel, 8);
}

#[test]
fn min_size_above_everything_is_no_alerts_found() {
    let err = radd_pipeline(THREE_BLOBS).run(&radd_query(1_000.0)).unwrap_err();
    assert!(matches!(err, AlertError::EmptyAggregation));
    assert_eq!(err.to_string(), "no alerts found");
}

/// ✓ Labeling is deterministic: two runs give the same patches.
#[test]
fn aggregation_is_idempotent() {
    let mut raster = AlertRaster::masked(10, 10, bounds());
    for &(r, c, code) in THREE_BLOBS {
        raster.set(r, c, if code == 3.0 { 1 } else { 2 }, 2021.1);
    }
    let tile_geometry = bbox_polygon(&bounds());
    let params = AggregateParams { working_scale_m: None, ..AggregateParams::default() };
    let a = aggregate(&raster, &tile_geometry, &params).unwrap();
    let b = aggregate(&raster, &tile_geometry, &params).unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(a, b);
}

/// ✓ A GLAD-L request over 2019-11-01..2021-02-15 is served as three
/// yearly reads from the archive and the updated product, then mosaicked.
#[test]
fn glad_landsat_spans_three_years() {
    let empty = || Grid::new(10, 10, bounds(), 0.0);
    let (mut c19, mut d19, mut c20, mut d20, mut c21, mut d21) = (empty(), empty(), empty(), empty(), empty(), empty());
    c19.set(1, 1, 3.0);
    d19.set(1, 1, 320.0);
    c19.set(1, 5, 3.0);
    d19.set(1, 5, 200.0); // before the window
    c20.set(4, 4, 2.0);
    d20.set(4, 4, 100.0);
    c21.set(7, 7, 3.0);
    d21.set(7, 7, 30.0);
    c21.set(8, 1, 3.0);
    d21.set(8, 1, 200.0); // after the window

    let archive = format!("{GLAD_ASSET}/2019final");
    let updated = format!("{GLAD_ASSET}/UpdResult");
    let src = MemorySource::new()
        .with_band(&archive, "conf19", c19)
        .with_band(&archive, "alertDate19", d19)
        .with_band(&updated, "conf20", c20)
        .with_band(&updated, "alertDate20", d20)
        .with_band(&updated, "conf21", c21)
        .with_band(&updated, "alertDate21", d21);
    let pipeline = Pipeline::with_sources(Arc::new(src), Arc::new(MemoryVectorSource::new()), config());

    let q = AlertQuery::new("GLAD-L", bbox_polygon(&bounds()), ymd(2019, 11, 1), ymd(2021, 2, 15), 0.0);
    let table = pipeline.run(&q).unwrap();
    let mut dates: Vec<f64> = table.iter().map(|p| p.date).collect();
    dates.sort_by(f64::total_cmp);
    assert_eq!(dates.len(), 3);
    assert_relative_eq!(dates[0], 2019.320, epsilon = 1e-9);
    assert_relative_eq!(dates[1], 2020.100, epsilon = 1e-9);
    assert_relative_eq!(dates[2], 2021.030, epsilon = 1e-9);
}

/// ✓ Tiles of a 0.25° square cover it exactly and none exceeds a cell.
#[test]
fn tiles_partition_the_area() {
    let aoi = bbox_polygon(&BBox::new(30.0, 5.0, 30.25, 5.25));
    let tiles = tile(&aoi, 0.1).unwrap();
    let total: f64 = tiles.iter().map(|t| t.geometry.unsigned_area()).sum();
    assert_relative_eq!(total, aoi.unsigned_area(), max_relative = 1e-9);
    for t in &tiles {
        let b = bounds_of(&t.geometry).unwrap();
        assert!(b.width() <= 0.1 + 1e-9 && b.height() <= 0.1 + 1e-9, "{} exceeds its cell", t.id);
    }
}

/// ✓ A patch split across a tile border yields one patch per side, and IDs
/// are still assigned once over all tiles.
#[test]
fn patches_straddling_tiles_are_split_not_duplicated() {
    let mut c = config();
    c.tiling.cell_size_deg = 0.005;
    let mut alert = Grid::new(10, 10, bounds(), 0.0);
    let mut date = Grid::new(10, 10, bounds(), 0.0);
    for col in 3..7 {
        alert.set(5, col, 3.0);
        date.set(5, col, 21_050.0);
    }
    let src = MemorySource::new().with_band(RADD_ASSET, "Alert", alert).with_band(RADD_ASSET, "Date", date);
    let pipeline = Pipeline::with_sources(Arc::new(src), Arc::new(MemoryVectorSource::new()), c);
    let table = pipeline.run(&radd_query(0.0)).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.iter().map(|p| p.nb_pixel).sum::<usize>(), 4);
    assert_eq!(table.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1]);
}

/// ✓ Edit a geometry, revert it: geometry and surface are back to creation.
#[test]
fn session_edit_then_revert() {
    let pipeline = radd_pipeline(THREE_BLOBS);
    let mut session = AlertSession::new();
    let created = session.query(&pipeline, radd_query(0.0)).unwrap().get(0).unwrap().clone();

    let square = bbox_polygon(&BBox::new(20.001, -0.509, 20.004, -0.506));
    let edited = session.edit(0, Mutation::Geometry(Some(square.clone()))).unwrap();
    assert_relative_eq!(edited.surface, surface_ha(&square, AreaProjection::WebMercator), max_relative = 1e-12);

    let reverted = session.edit(0, Mutation::Geometry(None)).unwrap();
    assert_eq!(reverted.geometry, created.original_geometry);
    assert_relative_eq!(reverted.surface, created.surface, max_relative = 1e-9);
}

/// ✓ A GeoPackage written after review is recovered with verdicts and
/// comments, renumbered and without size filtering.
#[cfg(feature = "gpkg")]
#[test]
fn reviewed_geopackage_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reviewed.gpkg");

    let pipeline = radd_pipeline(THREE_BLOBS);
    let mut session = AlertSession::new();
    session.query(&pipeline, radd_query(0.0)).unwrap();
    session.edit(2, Mutation::Review(Review::No)).unwrap();
    session.edit(0, Mutation::Comment("road".into())).unwrap();
    session.export(ExportFormat::Gpkg, &path).unwrap();

    let q = AlertQuery::new("RECOVER", bbox_polygon(&bounds()), ymd(2021, 1, 1), ymd(2021, 12, 31), 1_000.0)
        .with_params(DriverParams::new().with("file", path.display()));
    let recovered = pipeline.run(&q).unwrap();
    assert_eq!(recovered.len(), 3, "recovered rows skip the size filter");
    assert_eq!(recovered.get(2).unwrap().review, Review::No);
    assert_eq!(recovered.get(0).unwrap().comment, "road");
    assert_eq!(recovered.get(1).unwrap().nb_pixel, 3);

    let rows = export::read_alerts(&path).unwrap();
    assert_eq!(rows.len(), 3);
}

/// ✓ Raster export: jobs polled with a fake clock, tiles digested, the AOI
/// cut applied and only the final `_map`/`_date` files left behind.
#[test]
fn raster_export_leaves_only_final_products() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = radd_pipeline(THREE_BLOBS);
    let runner = LocalJobRunner::new(3);
    let clock = ManualClock::new();
    let out = pipeline
        .export_rasters(&radd_query(0.0), "aoi", &runner, dir.path(), &clock)
        .unwrap();

    assert_eq!(out.map, dir.path().join("aoi_2021-01-01_2021-12-31_RADD_map.tif"));
    assert_eq!(out.date, dir.path().join("aoi_2021-01-01_2021-12-31_RADD_date.tif"));
    let left = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(left, 2, "pieces and _tmp_ files are removed");
    assert_eq!(clock.sleeps(), vec![Backoff::default().delay(0)], "one round while the jobs run");

    let map = geotiff::read_band(&out.map).unwrap();
    assert_eq!(map.get(1, 1), 1.0);
    assert_eq!(map.get(4, 9), 2.0);
    let date = geotiff::read_band(&out.date).unwrap();
    assert_eq!(date.get(1, 1), 21_100.0);
}
