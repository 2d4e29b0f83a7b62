//! Error taxonomy shared by every stage of the pipeline.

use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AlertError>;

/// Failures raised while fetching, harmonizing or aggregating alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("unsupported driver `{0}`")]
    UnsupportedDriver(String),

    #[error("{driver} cannot serve {start}..{end}: {reason}")]
    UnsupportedDateRange {
        driver: String,
        start: NaiveDate,
        end: NaiveDate,
        reason: String,
    },

    #[error("missing asset `{0}`")]
    MissingAsset(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    /// Valid request, but no pixel or feature survived masking.
    #[error("no alert survives masking in {0}")]
    EmptyResult(String),

    /// Valid request, but zero patches survived the global size filter.
    #[error("no alerts found")]
    EmptyAggregation,

    #[error("remote job `{description}` failed: {message}")]
    RemoteJobFailed { description: String, message: String },

    #[error("epoch {epoch} cannot represent day count {days}")]
    InvalidEpoch { epoch: NaiveDate, days: i64 },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("patch {label} exceeds {limit} ring vertices")]
    OversizedGeometry { label: u32, limit: usize },

    #[error("cannot {action} while the session is {state}")]
    InvalidState { state: String, action: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    GeoJson(#[from] Box<geojson::Error>),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl From<geojson::Error> for AlertError {
    fn from(e: geojson::Error) -> Self {
        AlertError::GeoJson(Box::new(e))
    }
}

/// A rejected row mutation. The row keeps its previous value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("no patch with id {0}")]
    UnknownId(u32),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid date `{0}`")]
    InvalidDate(String),

    #[error("no alert table is loaded")]
    NotLoaded,

    #[error("edits are refused while the session is {0}")]
    Busy(String),
}

/// Failures raised by the file writers and readers in [`crate::export`].
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[cfg(feature = "gpkg")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("geometry: {0}")]
    Geometry(String),

    #[error("unsupported export target `{0}`")]
    Unsupported(String),

    #[error("nothing to export: no alert table is loaded")]
    NotLoaded,
}
