//! Reload a previously exported review file (GeoPackage or GeoJSON).
//! Review verdicts, comments and original geometries survive; rows are
//! renumbered `0..N` in their stored ID order and never size-filtered.

use std::path::Path;

use tracing::info;

use super::{AlertData, AlertDriver, FetchRequest};
use crate::error::{AlertError, Result};
use crate::export;
use crate::geometry::{surface_ha, AreaProjection};

pub struct Recover {
    projection: AreaProjection,
}

impl Recover {
    pub const ID: &'static str = "RECOVER";

    pub fn new(projection: AreaProjection) -> Self {
        Self { projection }
    }
}

impl AlertDriver for Recover {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let file = Path::new(req.params.require("file")?);
        if !file.is_file() {
            return Err(AlertError::MissingAsset(file.display().to_string()));
        }
        let mut rows = export::read_alerts(file)?;
        if rows.is_empty() {
            return Err(AlertError::EmptyResult(file.display().to_string()));
        }
        rows.sort_by_key(|p| p.id);
        for (i, row) in rows.iter_mut().enumerate() {
            row.id = i as u32;
            if !row.surface.is_finite() {
                row.surface = surface_ha(&row.geometry, self.projection);
            }
        }
        info!(file = %file.display(), rows = rows.len(), "recovered reviewed alerts");
        Ok(AlertData::Reviewed(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PatchFeature;
    use crate::config::DriverParams;
    use crate::export::ExportFormat;
    use crate::geometry::{bbox_polygon, BBox};
    use crate::table::{AlertPatch, AlertTable, Mutation, Review};
    use chrono::NaiveDate;

    fn table() -> AlertTable {
        let rows = (0..3)
            .map(|i| {
                let geometry = bbox_polygon(&BBox::new(i as f64, 0.0, i as f64 + 0.01, 0.01));
                let f = PatchFeature {
                    surface: surface_ha(&geometry, AreaProjection::WebMercator),
                    geometry,
                    alert: 1,
                    date: 2021.1,
                    nb_pixel: 4,
                };
                AlertPatch::from_feature(i, f)
            })
            .collect();
        AlertTable::new(rows, AreaProjection::WebMercator)
    }

    #[test]
    fn geojson_export_is_recovered_with_reviews() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.geojson");
        let mut t = table();
        t.edit(1, Mutation::Review(Review::Yes)).unwrap();
        t.edit(2, Mutation::Comment("road".into())).unwrap();
        export::write(&t, ExportFormat::GeoJson, &path).unwrap();

        let aoi = bbox_polygon(&BBox::new(-10.0, -10.0, 10.0, 10.0));
        let params = DriverParams::new().with("file", path.display());
        let d = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let req = FetchRequest { start: d, end: d, aoi: &aoi, params: &params };
        let AlertData::Reviewed(rows) = Recover::new(AreaProjection::WebMercator).fetch(&req).unwrap() else {
            panic!("reviewed rows expected");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].review, Review::Yes);
        assert_eq!(rows[2].comment, "road");
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_file_is_missing_asset() {
        let aoi = bbox_polygon(&BBox::new(0.0, 0.0, 1.0, 1.0));
        let params = DriverParams::new().with("file", "/nonexistent/alerts.gpkg");
        let d = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let req = FetchRequest { start: d, end: d, aoi: &aoi, params: &params };
        assert!(matches!(Recover::new(AreaProjection::default()).fetch(&req), Err(AlertError::MissingAsset(_))));
    }
}
