//! Flat CSV export: geometry replaced by its centroid.

use std::path::Path;

use geo::Centroid;
use serde::Serialize;

use super::geometry_to_json;
use crate::error::ExportError;
use crate::table::AlertTable;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: u32,
    lat: f64,
    lng: f64,
    alert: u8,
    date: f64,
    surface: f64,
    nb_pixel: usize,
    review: &'a str,
    comment: &'a str,
    original_geometry: String,
}

pub fn write(table: &AlertTable, path: &Path) -> Result<(), ExportError> {
    let mut out = csv::Writer::from_path(path)?;
    for p in table {
        let centroid = p
            .geometry
            .centroid()
            .ok_or_else(|| ExportError::Geometry(format!("patch {} has no geometry", p.id)))?;
        out.serialize(CsvRow {
            id: p.id,
            lat: centroid.y(),
            lng: centroid.x(),
            alert: p.alert,
            date: p.date,
            surface: p.surface,
            nb_pixel: p.nb_pixel,
            review: p.review.as_str(),
            comment: &p.comment,
            original_geometry: geometry_to_json(&p.original_geometry)?,
        })?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;

    #[test]
    fn csv_has_centroid_columns_and_no_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.csv");
        write(&fixtures::table(), &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["id", "lat", "lng", "alert", "date", "surface", "nb_pixel", "review", "comment", "original_geometry"]
        );
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][7], "yes");
        assert_eq!(&rows[0][8], "logging road, \"fresh\"", "quoting survives");
        let lat: f64 = rows[1][1].parse().unwrap();
        assert!((lat - -2.9975).abs() < 1e-9);
        assert!(rows[1][9].contains("MultiPolygon"));
    }
}
