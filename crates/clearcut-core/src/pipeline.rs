//! Query orchestrator: driver → year split → tiles → clumps → global
//! filter/sort/IDs → [`AlertTable`].

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::aggregate::{aggregate, finalize, PatchFeature};
use crate::config::{DriverParams, PipelineConfig};
use crate::drivers::{AlertData, DriverRegistry, FetchRequest};
use crate::error::{AlertError, Result};
use crate::geometry::{self, MultiPolygon};
use crate::grid::AlertRaster;
use crate::jobs::{self, Clock, ExportedRasters, JobRunner};
use crate::source::{RasterSource, VectorSource};
use crate::table::AlertTable;
use crate::temporal::fetch_split;
use crate::tiler::{tile, Tile};

// ── Query ─────────────────────────────────────────────────────────────────────

/// Everything one load depends on. Changing any field means a new table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertQuery {
    pub driver: String,
    pub aoi: MultiPolygon,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Minimum patch surface in hectares.
    #[serde(default)]
    pub min_size: f64,
    #[serde(default)]
    pub params: DriverParams,
}

impl AlertQuery {
    pub fn new(driver: &str, aoi: MultiPolygon, start: NaiveDate, end: NaiveDate, min_size: f64) -> Self {
        Self { driver: driver.to_string(), aoi, start, end, min_size, params: DriverParams::new() }
    }

    pub fn with_params(mut self, params: DriverParams) -> Self {
        self.params = params;
        self
    }

    /// Driver identifier, AOI, window and minimum size must all be usable
    /// before a load starts.
    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(AlertError::MissingInput("driver".into()));
        }
        geometry::validate(&self.aoi)?;
        if self.end < self.start {
            return Err(AlertError::InvalidDate(format!("end {} before start {}", self.end, self.start)));
        }
        if !(self.min_size.is_finite() && self.min_size >= 0.0) {
            return Err(AlertError::Config(format!("min_size must be a non-negative number, got {}", self.min_size)));
        }
        Ok(())
    }

    fn request(&self) -> FetchRequest<'_> {
        FetchRequest { start: self.start, end: self.end, aoi: &self.aoi, params: &self.params }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Pipeline {
    registry: DriverRegistry,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(registry: DriverRegistry, config: PipelineConfig) -> Self {
        Self { registry, config }
    }

    /// Standard drivers over the given sources.
    pub fn with_sources(
        rasters: Arc<dyn RasterSource>,
        vectors: Arc<dyn VectorSource>,
        config: PipelineConfig,
    ) -> Self {
        let registry =
            DriverRegistry::standard(rasters, vectors, &config.catalog, config.aggregation.area_projection);
        Self::new(registry, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DriverRegistry {
        &mut self.registry
    }

    /// Harmonized driver output, split by year where the driver needs it.
    pub fn fetch(&self, query: &AlertQuery) -> Result<AlertData> {
        query.validate()?;
        let driver = self.registry.get(&query.driver)?;
        fetch_split(driver.as_ref(), &query.request())
    }

    /// Run the query end to end.
    ///
    /// Stages:
    ///   1. Fetch (with year splitting)
    ///   2. Tile the AOI and clump every tile (rasters only)
    ///   3. Global size filter, sort and ID assignment, exactly once
    pub fn run(&self, query: &AlertQuery) -> Result<AlertTable> {
        let span = info_span!("query", driver = %query.driver, start = %query.start, end = %query.end);
        let _guard = span.enter();
        query.validate()?;
        let driver = self.registry.get(&query.driver)?;

        // ── 1. Fetch ────────────────────────────────────────────────────────
        let data = fetch_split(driver.as_ref(), &query.request())?;

        // ── 2/3. Clump, then filter, sort and ID ────────────────────────────
        let rows = match data {
            AlertData::Raster(raster) => {
                let features = self.clump(&raster, &query.aoi)?;
                finalize(features, Some(query.min_size), driver.sort_key())?
            }
            AlertData::Features(features) => finalize(features, Some(query.min_size), driver.sort_key())?,
            AlertData::Reviewed(rows) => {
                if rows.is_empty() {
                    return Err(AlertError::EmptyAggregation);
                }
                rows
            }
        };

        info!(rows = rows.len(), min_size = query.min_size, "alert table ready");
        Ok(AlertTable::new(rows, self.config.aggregation.area_projection))
    }

    /// Tile `aoi` and clump `raster` tile by tile. Per-tile results are
    /// concatenated in tile order. Empty tiles are skipped; a failing tile
    /// is skipped with a warning unless every tile failed.
    pub fn clump(&self, raster: &AlertRaster, aoi: &MultiPolygon) -> Result<Vec<PatchFeature>> {
        let tiles = tile(aoi, self.config.tiling.cell_size_deg)?;
        debug!(tiles = tiles.len(), cell = self.config.tiling.cell_size_deg, "tiled area of interest");

        let results = self.clump_tiles(raster, &tiles);

        let mut features = Vec::new();
        let mut first_error = None;
        let mut empty = 0usize;
        for (t, result) in tiles.iter().zip(results) {
            match result {
                Ok(found) if found.is_empty() => empty += 1,
                Ok(found) => features.extend(found),
                Err(e) => {
                    warn!(tile = %t.id, error = %e, "tile failed, skipping");
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(patches = features.len(), empty, "clumped all tiles");
        match first_error {
            Some(e) if features.is_empty() => Err(e),
            _ => Ok(features),
        }
    }

    #[cfg(not(feature = "threading"))]
    fn clump_tiles(&self, raster: &AlertRaster, tiles: &[Tile]) -> Vec<Result<Vec<PatchFeature>>> {
        tiles.iter().map(|t| self.clump_tile(raster, t)).collect()
    }

    #[cfg(feature = "threading")]
    fn clump_tiles(&self, raster: &AlertRaster, tiles: &[Tile]) -> Vec<Result<Vec<PatchFeature>>> {
        use rayon::prelude::*;
        tiles.par_iter().map(|t| self.clump_tile(raster, t)).collect()
    }

    fn clump_tile(&self, raster: &AlertRaster, t: &Tile) -> Result<Vec<PatchFeature>> {
        let span = info_span!("tile", id = %t.id);
        let _guard = span.enter();
        let found = aggregate(raster, &t.geometry, &self.config.aggregation)?;
        if found.is_empty() {
            debug!("no patch in tile");
        }
        Ok(found)
    }

    /// Export the harmonized rasters of `query` through `runner` into
    /// `{aoi_name}_{start}_{end}_{driver}_{map,date}.tif` under `dir`.
    pub fn export_rasters(
        &self,
        query: &AlertQuery,
        aoi_name: &str,
        runner: &dyn JobRunner,
        dir: &Path,
        clock: &dyn Clock,
    ) -> Result<ExportedRasters> {
        let AlertData::Raster(raster) = self.fetch(query)? else {
            return Err(AlertError::Config(format!("{} does not produce rasters", query.driver)));
        };
        let basename = format!("{aoi_name}_{}_{}_{}", query.start, query.end, query.driver);
        jobs::export_alert_rasters(runner, &raster, &query.aoi, &basename, dir, &self.config.polling, clock)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("drivers", &self.registry).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SortKey;
    use crate::drivers::AlertDriver;
    use crate::export::{self, fixtures, ExportFormat};
    use crate::geometry::{bbox_polygon, surface_ha, AreaProjection, BBox};
    use crate::grid::Grid;
    use crate::source::{MemorySource, MemoryVectorSource};
    use crate::table::Review;

    const RADD_ASSET: &str = "projects/radar-wur/raddalert/v1";

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> PipelineConfig {
        let mut c = PipelineConfig::default();
        c.aggregation.working_scale_m = None;
        c
    }

    fn radd_pipeline(bounds: BBox, cells: &[(usize, usize, f64, f64)]) -> Pipeline {
        let mut alert = Grid::new(10, 10, bounds, 0.0);
        let mut date = Grid::new(10, 10, bounds, 0.0);
        for &(r, c, code, yyddd) in cells {
            alert.set(r, c, code);
            date.set(r, c, yyddd);
        }
        let src = MemorySource::new().with_band(RADD_ASSET, "Alert", alert).with_band(RADD_ASSET, "Date", date);
        Pipeline::with_sources(Arc::new(src), Arc::new(MemoryVectorSource::new()), config())
    }

    fn radd_query(bounds: BBox, min_size: f64) -> AlertQuery {
        AlertQuery::new("RADD", bbox_polygon(&bounds), ymd(2021, 1, 1), ymd(2021, 12, 31), min_size)
    }

    #[test]
    fn raster_query_yields_contiguous_ids() {
        let bounds = BBox::new(10.0, -1.0, 10.01, -0.99);
        let p = radd_pipeline(
            bounds,
            &[(1, 1, 3.0, 21_010.0), (1, 2, 3.0, 21_011.0), (5, 5, 2.0, 21_100.0), (8, 8, 3.0, 19_001.0)],
        );
        let table = p.run(&radd_query(bounds, 0.0)).unwrap();
        assert_eq!(table.len(), 2, "the 2019 pixel is outside the window");
        let ids: Vec<u32> = table.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let first = table.get(0).unwrap();
        assert_eq!((first.nb_pixel, first.alert), (2, 1));
        assert!((first.date - 2021.010).abs() < 1e-9, "patch date is its earliest pixel");
        assert_eq!(table.get(1).unwrap().alert, 2);
    }

    #[test]
    fn nothing_above_min_size_is_empty_aggregation() {
        let bounds = BBox::new(10.0, -1.0, 10.01, -0.99);
        let p = radd_pipeline(bounds, &[(1, 1, 3.0, 21_010.0)]);
        assert!(matches!(p.run(&radd_query(bounds, 500.0)), Err(AlertError::EmptyAggregation)));
    }

    #[test]
    fn invalid_queries_never_reach_a_driver() {
        let bounds = BBox::new(10.0, -1.0, 10.01, -0.99);
        let p = radd_pipeline(bounds, &[]);
        let mut q = radd_query(bounds, 0.0);
        q.end = ymd(2020, 1, 1);
        assert!(matches!(p.run(&q), Err(AlertError::InvalidDate(_))));
        let mut q = radd_query(bounds, -1.0);
        assert!(matches!(p.run(&q), Err(AlertError::Config(_))));
        q.min_size = 0.0;
        q.driver = "MODIS".into();
        assert!(matches!(p.run(&q), Err(AlertError::UnsupportedDriver(_))));
        q.aoi = MultiPolygon::new(Vec::new());
        q.driver = "RADD".into();
        assert!(matches!(p.run(&q), Err(AlertError::InvalidGeometry(_))));
    }

    /// ✓ Recovered rows keep their review state and are never size-filtered.
    #[test]
    fn recovered_rows_bypass_the_size_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviewed.geojson");
        export::write(&fixtures::table(), ExportFormat::GeoJson, &path).unwrap();

        let p = radd_pipeline(BBox::new(0.0, 0.0, 1.0, 1.0), &[]);
        let q = AlertQuery::new(
            "RECOVER",
            bbox_polygon(&BBox::new(0.0, 0.0, 1.0, 1.0)),
            ymd(2021, 1, 1),
            ymd(2021, 12, 31),
            10_000.0,
        )
        .with_params(DriverParams::new().with("file", path.display()));
        let table = p.run(&q).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().review, Review::Yes);
    }

    struct Fixed(Vec<PatchFeature>);

    impl AlertDriver for Fixed {
        fn id(&self) -> &str {
            "FIXED"
        }

        fn sort_key(&self) -> SortKey {
            SortKey::PixelCount
        }

        fn fetch(&self, _: &FetchRequest<'_>) -> Result<AlertData> {
            Ok(AlertData::Features(self.0.clone()))
        }
    }

    #[test]
    fn registered_vector_driver_is_sorted_by_its_key() {
        let feature = |x: f64, side: f64, nb_pixel: usize| {
            let geometry = bbox_polygon(&BBox::new(x, 0.0, x + side, side));
            PatchFeature {
                surface: surface_ha(&geometry, AreaProjection::WebMercator),
                geometry,
                alert: 1,
                date: 2021.1,
                nb_pixel,
            }
        };
        let mut p = radd_pipeline(BBox::new(0.0, 0.0, 1.0, 1.0), &[]);
        p.registry_mut().register(Fixed(vec![
            feature(0.0, 0.02, 1),
            feature(0.1, 0.001, 50),
            feature(0.2, 0.0001, 9),
        ]));
        let aoi = bbox_polygon(&BBox::new(0.0, 0.0, 1.0, 1.0));
        let q = AlertQuery::new("FIXED", aoi, ymd(2021, 1, 1), ymd(2021, 2, 1), 1.0);
        let table = p.run(&q).unwrap();
        let pixels: Vec<usize> = table.iter().map(|r| r.nb_pixel).collect();
        assert_eq!(pixels, vec![50, 1], "the 0.0001° square is under 1 ha");
    }
}
