//! Pipeline configuration: driver catalog, tiling, aggregation, polling.
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! the compiled defaults.
//!
//! ```toml
//! [catalog.drivers.GLAD-L]
//! first_year = 2017
//! last_updated = 2021
//! asset = "projects/glad/alert"
//!
//! [tiling]
//! cell_size_deg = 0.1
//!
//! [aggregation]
//! max_patch_pixels = 1024
//! area_projection = "geodesic"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::AggregateParams;
use crate::error::{AlertError, Result};
use crate::jobs::Backoff;

// ── Driver catalog ──────────────────────────────────────────────────────────

/// Operational metadata of one alert product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSpec {
    /// Windows starting before this year are refused.
    #[serde(default)]
    pub first_year: Option<i32>,
    /// Years strictly before this one are read from the per-year final
    /// archive, later years from the rolling updated product.
    #[serde(default)]
    pub last_updated: Option<i32>,
    /// Backing asset path (raster drivers) or dataset name (vector drivers).
    #[serde(default)]
    pub asset: String,
}

impl DriverSpec {
    fn new(first_year: Option<i32>, last_updated: Option<i32>, asset: &str) -> Self {
        Self { first_year, last_updated, asset: asset.to_string() }
    }
}

/// Driver identifier → [`DriverSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverCatalog {
    pub drivers: BTreeMap<String, DriverSpec>,
}

impl Default for DriverCatalog {
    fn default() -> Self {
        let mut drivers = BTreeMap::new();
        drivers.insert("GLAD-L".into(), DriverSpec::new(Some(2017), Some(2020), "projects/glad/alert"));
        drivers.insert("GLAD-S".into(), DriverSpec::new(Some(2019), None, "projects/glad/S2alert"));
        drivers.insert("RADD".into(), DriverSpec::new(Some(2019), None, "projects/radar-wur/raddalert/v1"));
        drivers.insert("JJ-FAST".into(), DriverSpec::new(Some(2016), None, "jj-fast"));
        Self { drivers }
    }
}

impl DriverCatalog {
    /// Spec for `driver`, or an empty one for drivers that need no catalog entry.
    pub fn spec(&self, driver: &str) -> DriverSpec {
        self.drivers
            .get(driver)
            .cloned()
            .unwrap_or_else(|| DriverSpec::new(None, None, ""))
    }
}

// ── Driver parameters ──────────────────────────────────────────────────────

/// Driver-specific string parameters (asset ids, band names, thresholds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverParams(pub BTreeMap<String, String>);

impl DriverParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// A parameter that must be present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| AlertError::MissingInput(format!("driver parameter `{key}`")))
    }

    /// A required numeric parameter.
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        let raw = self.require(key)?;
        raw.trim()
            .parse()
            .map_err(|_| AlertError::Config(format!("parameter `{key}` = `{raw}` is not a number")))
    }
}

// ── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Grid cell size in degrees.
    pub cell_size_deg: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self { cell_size_deg: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: DriverCatalog,
    pub tiling: TilingConfig,
    pub aggregation: AggregateParams,
    pub polling: Backoff,
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text).map_err(|e| AlertError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), drivers = config.catalog.drivers.len(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tiling.cell_size_deg.is_finite() && self.tiling.cell_size_deg > 0.0) {
            return Err(AlertError::Config(format!(
                "tiling.cell_size_deg must be positive, got {}",
                self.tiling.cell_size_deg
            )));
        }
        if self.aggregation.max_patch_pixels == 0 {
            return Err(AlertError::Config("aggregation.max_patch_pixels must be at least 1".into()));
        }
        if let Some(scale) = self.aggregation.working_scale_m {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(AlertError::Config(format!("aggregation.working_scale_m must be positive, got {scale}")));
            }
        }
        Ok(())
    }
}
