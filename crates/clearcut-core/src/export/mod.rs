//! Writers (and, for review files, readers) of the alert table.
//!
//! The schema is shared by every format: `id`, `alert`, `date`, `surface`,
//! `nb_pixel`, `review`, `comment` and `original_geometry` serialised as
//! GeoJSON text. CSV drops the geometry for centroid `lat`/`lng` columns.

pub mod feature_collection;
#[cfg(feature = "gpkg")]
pub mod gpkg;
pub mod kml;
pub mod tabular;

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ExportError;
use crate::geometry::{from_geojson, to_geojson, MultiPolygon};
use crate::table::{AlertPatch, AlertTable};

/// GeoPackage layer holding the alerts.
pub const LAYER: &str = "alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Gpkg,
    Kml,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Gpkg => "gpkg",
            ExportFormat::Kml => "kml",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "gpkg" | "geopackage" => Some(ExportFormat::Gpkg),
            "kml" => Some(ExportFormat::Kml),
            "geojson" | "json" => Some(ExportFormat::GeoJson),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_name)
    }
}

/// `{aoi}_{start}_{end}_{min_size}`, the stem every export is named after.
pub fn default_basename(aoi: &str, start: NaiveDate, end: NaiveDate, min_size: f64) -> String {
    format!("{aoi}_{start}_{end}_{min_size}")
}

/// Write `table` to `path` in `format`.
pub fn write(table: &AlertTable, format: ExportFormat, path: &Path) -> Result<(), ExportError> {
    match format {
        ExportFormat::Csv => tabular::write(table, path)?,
        ExportFormat::Kml => kml::write(table, path)?,
        ExportFormat::GeoJson => feature_collection::write(table, path)?,
        #[cfg(feature = "gpkg")]
        ExportFormat::Gpkg => gpkg::write(table, path)?,
        #[cfg(not(feature = "gpkg"))]
        ExportFormat::Gpkg => return Err(ExportError::Unsupported("gpkg".into())),
    }
    info!(path = %path.display(), ?format, rows = table.len(), "exported alerts");
    Ok(())
}

/// Read rows back from a GeoPackage or GeoJSON export.
pub fn read_alerts(path: &Path) -> Result<Vec<AlertPatch>, ExportError> {
    match ExportFormat::from_path(path) {
        Some(ExportFormat::GeoJson) => feature_collection::read(path),
        #[cfg(feature = "gpkg")]
        Some(ExportFormat::Gpkg) => gpkg::read(path),
        _ => Err(ExportError::Unsupported(path.display().to_string())),
    }
}

pub(crate) fn geometry_to_json(geometry: &MultiPolygon) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&to_geojson(geometry))?)
}

pub(crate) fn geometry_from_json(text: &str) -> Result<MultiPolygon, ExportError> {
    let g: geojson::Geometry = serde_json::from_str(text)?;
    from_geojson(&g).map_err(|e| ExportError::Geometry(e.to_string()))
}
