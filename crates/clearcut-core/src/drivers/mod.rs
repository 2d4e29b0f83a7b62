//! Source adapters: one [`AlertDriver`] per alert product, selected by
//! identifier through a [`DriverRegistry`].
//!
//! Every raster driver reads its native bands from an injected
//! [`RasterSource`], masks them to the requested window in the product's own
//! date encoding, remaps native confidence codes through an explicit table
//! and emits the canonical two-band [`AlertRaster`].

pub mod cusum;
pub mod glad;
pub mod nrt;
pub mod radd;
pub mod recover;
pub mod remap;
pub mod user;
pub mod vector;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::aggregate::{PatchFeature, SortKey};
use crate::config::{DriverCatalog, DriverParams, DriverSpec};
use crate::error::{AlertError, Result};
use crate::geometry::{bounds_of, AreaProjection, BBox, MultiPolygon};
use crate::grid::AlertRaster;
use crate::source::{RasterSource, VectorSource};
use crate::table::AlertPatch;

pub use remap::RemapTable;

/// What a driver is asked for.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub aoi: &'a MultiPolygon,
    pub params: &'a DriverParams,
}

impl<'a> FetchRequest<'a> {
    /// Same request over a different window.
    pub fn with_range(&self, start: NaiveDate, end: NaiveDate) -> FetchRequest<'a> {
        FetchRequest { start, end, ..*self }
    }

    pub fn aoi_bounds(&self) -> Result<BBox> {
        bounds_of(self.aoi)
            .ok_or_else(|| AlertError::InvalidGeometry("empty area of interest".into()))
    }
}

/// Harmonized output of a driver.
#[derive(Debug, Clone)]
pub enum AlertData {
    /// Canonical raster, to be tiled and clumped.
    Raster(AlertRaster),
    /// Already vectorised patches, to be filtered, sorted and IDed.
    Features(Vec<PatchFeature>),
    /// Previously reviewed rows, kept as they are.
    Reviewed(Vec<AlertPatch>),
}

impl AlertData {
    pub fn is_empty(&self) -> bool {
        match self {
            AlertData::Raster(r) => r.alert_pixels() == 0,
            AlertData::Features(f) => f.is_empty(),
            AlertData::Reviewed(r) => r.is_empty(),
        }
    }
}

/// Capability shared by all alert products.
pub trait AlertDriver: Send + Sync {
    fn id(&self) -> &str;

    /// Only single calendar-year windows are served; longer windows are
    /// split by [`crate::temporal`].
    fn single_year(&self) -> bool {
        false
    }

    /// Ordering applied before ID assignment.
    fn sort_key(&self) -> SortKey {
        SortKey::Surface
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData>;
}

/// Refuse windows starting before the catalog's first available year.
pub(crate) fn check_first_year(driver: &str, spec: &DriverSpec, req: &FetchRequest<'_>) -> Result<()> {
    match spec.first_year {
        Some(first) if req.start.year() < first => Err(AlertError::UnsupportedDateRange {
            driver: driver.to_string(),
            start: req.start,
            end: req.end,
            reason: format!("no data before {first}"),
        }),
        _ => Ok(()),
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Driver identifier → implementation.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn AlertDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in drivers wired to the given sources.
    pub fn standard(
        rasters: Arc<dyn RasterSource>,
        vectors: Arc<dyn VectorSource>,
        catalog: &DriverCatalog,
        projection: AreaProjection,
    ) -> Self {
        let mut reg = Self::new();
        reg.register(glad::GladLandsat::new(rasters.clone(), catalog.spec(glad::GladLandsat::ID)));
        reg.register(glad::GladSentinel::new(rasters.clone(), catalog.spec(glad::GladSentinel::ID)));
        reg.register(radd::Radd::new(rasters.clone(), catalog.spec(radd::Radd::ID)));
        reg.register(nrt::Nrt::new(rasters.clone()));
        reg.register(cusum::Cusum::new(rasters.clone()));
        reg.register(user::GeeAsset::new(rasters));
        reg.register(user::LocalFiles::new());
        reg.register(vector::JjFast::new(vectors, catalog.spec(vector::JjFast::ID), projection));
        reg.register(vector::SingleDate::new(projection));
        reg.register(recover::Recover::new(projection));
        reg
    }

    /// Add or replace a driver under its own identifier.
    pub fn register(&mut self, driver: impl AlertDriver + 'static) -> &mut Self {
        self.drivers.insert(driver.id().to_string(), Arc::new(driver));
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AlertDriver>> {
        self.drivers
            .get(id)
            .cloned()
            .ok_or_else(|| AlertError::UnsupportedDriver(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.drivers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, MemoryVectorSource};

    fn registry() -> DriverRegistry {
        DriverRegistry::standard(
            Arc::new(MemorySource::new()),
            Arc::new(MemoryVectorSource::new()),
            &DriverCatalog::default(),
            AreaProjection::default(),
        )
    }

    #[test]
    fn standard_registry_lists_every_driver() {
        let reg = registry();
        let ids: Vec<&str> = reg.ids().collect();
        for id in ["CUSUM", "GEE", "GLAD-L", "GLAD-S", "JJ-FAST", "LOCAL", "NRT", "RADD", "RECOVER", "SINGLE-DATE"] {
            assert!(ids.contains(&id), "{id} missing from {ids:?}");
        }
    }

    #[test]
    fn unknown_identifier_is_unsupported() {
        assert!(matches!(registry().get("MODIS"), Err(AlertError::UnsupportedDriver(id)) if id == "MODIS"));
    }
}
