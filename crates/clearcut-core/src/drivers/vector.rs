//! Vector alert products: the JJ-FAST feature service and single-date
//! polygon files. Each polygon is one confirmed patch; there is nothing to
//! clump, so `nb_pixel` stays 0 and patches are ranked by surface.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use geo::Centroid;
use geojson::{Feature, FeatureCollection};
use tracing::{debug, warn};

use super::{check_first_year, AlertData, AlertDriver, FetchRequest};
use crate::aggregate::PatchFeature;
use crate::config::DriverSpec;
use crate::date;
use crate::error::{AlertError, Result};
use crate::geometry::{covers, from_geojson, surface_ha, AreaProjection};
use crate::source::{read_feature_collection, VectorSource};

/// Read the `date` property as `YYYY-MM-DD` text or a canonical number.
fn feature_date(f: &Feature) -> Option<NaiveDate> {
    match f.property("date")? {
        serde_json::Value::String(s) => date::parse_any(s).ok(),
        serde_json::Value::Number(n) => n.as_f64().and_then(|v| date::decode(v).ok()),
        _ => None,
    }
}

/// Turn polygon features into confirmed patches. Features without a usable
/// polygon or date, or whose centroid falls outside the AOI, are skipped.
fn to_patches(
    driver: &str,
    fc: &FeatureCollection,
    req: &FetchRequest<'_>,
    projection: AreaProjection,
    date_of: impl Fn(&Feature) -> Option<NaiveDate>,
) -> Vec<PatchFeature> {
    let mut skipped = 0usize;
    let mut out = Vec::new();
    for f in &fc.features {
        let Some(geometry) = f.geometry.as_ref().and_then(|g| from_geojson(g).ok()) else {
            skipped += 1;
            continue;
        };
        let Some(d) = date_of(f) else {
            skipped += 1;
            continue;
        };
        if d < req.start || d > req.end {
            continue;
        }
        if !geometry.centroid().is_some_and(|c| covers(req.aoi, c.0)) {
            continue;
        }
        out.push(PatchFeature {
            surface: surface_ha(&geometry, projection),
            geometry,
            alert: 1,
            date: date::encode(d),
            nb_pixel: 0,
        });
    }
    if skipped > 0 {
        warn!(driver, skipped, "features without polygon or date were skipped");
    }
    debug!(driver, kept = out.len(), total = fc.features.len(), "read vector alerts");
    out
}

pub struct JjFast {
    source: Arc<dyn VectorSource>,
    spec: DriverSpec,
    projection: AreaProjection,
}

impl JjFast {
    pub const ID: &'static str = "JJ-FAST";

    pub fn new(source: Arc<dyn VectorSource>, spec: DriverSpec, projection: AreaProjection) -> Self {
        Self { source, spec, projection }
    }
}

impl AlertDriver for JjFast {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        check_first_year(Self::ID, &self.spec, req)?;
        let dataset = req.params.get_or("dataset", &self.spec.asset);
        if dataset.is_empty() {
            return Err(AlertError::MissingAsset("JJ-FAST dataset".into()));
        }
        let fc = self.source.features(dataset)?;
        let patches = to_patches(Self::ID, &fc, req, self.projection, feature_date);
        if patches.is_empty() {
            return Err(AlertError::EmptyResult(format!("{} {}..{}", Self::ID, req.start, req.end)));
        }
        Ok(AlertData::Features(patches))
    }
}

/// Polygons from a file, all stamped with the one `date` parameter.
pub struct SingleDate {
    projection: AreaProjection,
}

impl SingleDate {
    pub const ID: &'static str = "SINGLE-DATE";

    pub fn new(projection: AreaProjection) -> Self {
        Self { projection }
    }
}

impl AlertDriver for SingleDate {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let file = req.params.require("file")?;
        let stamp = date::parse_any(req.params.require("date")?)?;
        let fc = read_feature_collection(Path::new(file))?;
        // the stamp is the only date, so the query window does not apply
        let whole = req.with_range(NaiveDate::MIN, NaiveDate::MAX);
        let patches = to_patches(Self::ID, &fc, &whole, self.projection, |_| Some(stamp));
        if patches.is_empty() {
            return Err(AlertError::EmptyResult(format!("{file} has no polygon inside the area of interest")));
        }
        Ok(AlertData::Features(patches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverCatalog, DriverParams};
    use crate::geometry::{bbox_polygon, BBox};
    use crate::source::MemoryVectorSource;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn collection(text: &str) -> FeatureCollection {
        let doc: geojson::GeoJson = text.parse().unwrap();
        FeatureCollection::try_from(doc).unwrap()
    }

    const ALERTS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"date":"2021-03-04"},
         "geometry":{"type":"Polygon","coordinates":[[[0.1,0.1],[0.2,0.1],[0.2,0.2],[0.1,0.1]]]}},
        {"type":"Feature","properties":{"date":2021.300},
         "geometry":{"type":"Polygon","coordinates":[[[0.3,0.3],[0.4,0.3],[0.4,0.4],[0.3,0.3]]]}},
        {"type":"Feature","properties":{"date":"2019-01-01"},
         "geometry":{"type":"Polygon","coordinates":[[[0.5,0.5],[0.6,0.5],[0.6,0.6],[0.5,0.5]]]}},
        {"type":"Feature","properties":{"date":"2021-05-05"},
         "geometry":{"type":"Polygon","coordinates":[[[5.0,5.0],[5.1,5.0],[5.1,5.1],[5.0,5.0]]]}},
        {"type":"Feature","properties":{},
         "geometry":{"type":"Point","coordinates":[0.5,0.5]}}
    ]}"#;

    #[test]
    fn jj_fast_filters_window_and_aoi() {
        let src = MemoryVectorSource::new().with_dataset("jj-fast", collection(ALERTS));
        let d = JjFast::new(Arc::new(src), DriverCatalog::default().spec(JjFast::ID), AreaProjection::WebMercator);
        let aoi = bbox_polygon(&BBox::new(0.0, 0.0, 1.0, 1.0));
        let params = DriverParams::new();
        let req = FetchRequest { start: ymd(2021, 1, 1), end: ymd(2021, 12, 31), aoi: &aoi, params: &params };
        let AlertData::Features(f) = d.fetch(&req).unwrap() else {
            panic!("features expected");
        };
        assert_eq!(f.len(), 2, "old and off-AOI features are dropped");
        assert!(f.iter().all(|p| p.alert == 1 && p.surface > 0.0));
        assert!((f[0].date - 2021.063).abs() < 1e-9);
        assert!((f[1].date - 2021.300).abs() < 1e-9);

        let early = req.with_range(ymd(2015, 1, 1), ymd(2015, 6, 1));
        assert!(matches!(d.fetch(&early), Err(AlertError::UnsupportedDateRange { .. })));
    }

    #[test]
    fn single_date_stamps_every_polygon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clearings.geojson");
        std::fs::write(&path, ALERTS).unwrap();
        let aoi = bbox_polygon(&BBox::new(0.0, 0.0, 1.0, 1.0));
        let params = DriverParams::new().with("file", path.display()).with("date", "2022-02-02");
        let req = FetchRequest { start: ymd(2020, 1, 1), end: ymd(2020, 1, 2), aoi: &aoi, params: &params };
        let AlertData::Features(f) = SingleDate::new(AreaProjection::WebMercator).fetch(&req).unwrap() else {
            panic!("features expected");
        };
        assert_eq!(f.len(), 3);
        assert!(f.iter().all(|p| (p.date - 2022.033).abs() < 1e-9));
    }
}
