//! GeoPackage export and import (layer [`LAYER`]).
//!
//! Geometries are stored as GeoPackage blobs: the `GP` header with an XY
//! envelope followed by little-endian WKB MultiPolygons, EPSG:4326.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use super::{geometry_from_json, geometry_to_json, LAYER};
use crate::error::ExportError;
use crate::geometry::{bounds_of, Coord, LineString, MultiPolygon, Polygon};
use crate::table::{AlertPatch, AlertTable, Review};

const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;

const SCHEMA: &str = "
    PRAGMA application_id = 1196444487;
    PRAGMA user_version = 10300;
    CREATE TABLE gpkg_spatial_ref_sys (
        srs_name TEXT NOT NULL,
        srs_id INTEGER PRIMARY KEY,
        organization TEXT NOT NULL,
        organization_coordsys_id INTEGER NOT NULL,
        definition TEXT NOT NULL,
        description TEXT
    );
    CREATE TABLE gpkg_contents (
        table_name TEXT NOT NULL PRIMARY KEY,
        data_type TEXT NOT NULL,
        identifier TEXT UNIQUE,
        description TEXT DEFAULT '',
        last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
        min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE,
        srs_id INTEGER
    );
    CREATE TABLE gpkg_geometry_columns (
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        geometry_type_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL,
        z TINYINT NOT NULL,
        m TINYINT NOT NULL,
        CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
    );
    INSERT INTO gpkg_spatial_ref_sys VALUES
        ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', NULL),
        ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', NULL),
        ('WGS 84 geodetic', 4326, 'EPSG', 4326,
         'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]',
         NULL);
";

pub fn write(table: &AlertTable, path: &Path) -> Result<(), ExportError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(&format!(
        "CREATE TABLE {LAYER} (
            fid INTEGER PRIMARY KEY AUTOINCREMENT,
            geom BLOB,
            id INTEGER NOT NULL,
            alert INTEGER NOT NULL,
            date REAL,
            surface REAL,
            nb_pixel INTEGER,
            review TEXT,
            comment TEXT,
            original_geometry TEXT
        );
        INSERT INTO gpkg_geometry_columns VALUES ('{LAYER}', 'geom', 'MULTIPOLYGON', 4326, 0, 0);"
    ))?;

    let extent = table
        .iter()
        .filter_map(|p| bounds_of(&p.geometry))
        .reduce(|a, b| a.union(&b));
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, 4326)",
        params![
            LAYER,
            extent.map(|b| b.min_x),
            extent.map(|b| b.min_y),
            extent.map(|b| b.max_x),
            extent.map(|b| b.max_y)
        ],
    )?;
    {
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {LAYER} (geom, id, alert, date, surface, nb_pixel, review, comment, original_geometry)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))?;
        for p in table {
            insert.execute(params![
                encode_geometry(&p.geometry),
                p.id,
                p.alert,
                p.date,
                p.surface,
                p.nb_pixel as i64,
                p.review.as_str(),
                p.comment,
                geometry_to_json(&p.original_geometry)?,
            ])?;
        }
    }
    tx.commit()?;
    debug!(path = %path.display(), rows = table.len(), "wrote GeoPackage");
    Ok(())
}

pub fn read(path: &Path) -> Result<Vec<AlertPatch>, ExportError> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT geom, id, alert, date, surface, nb_pixel, review, comment, original_geometry
         FROM {LAYER} ORDER BY fid"
    ))?;
    let raw = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
            row.get::<_, Option<i64>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, Option<String>>(8)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in raw {
        let (blob, id, alert, date, surface, nb_pixel, review, comment, original) = r?;
        let geometry = decode_geometry(&blob)?;
        let original_geometry = match original {
            Some(text) if !text.is_empty() => geometry_from_json(&text)?,
            _ => geometry.clone(),
        };
        out.push(AlertPatch {
            id: id as u32,
            geometry,
            original_geometry,
            alert: alert as u8,
            date: date.unwrap_or(f64::NAN),
            surface: surface.unwrap_or(f64::NAN),
            nb_pixel: nb_pixel.unwrap_or(0) as usize,
            review: Review::parse(review.as_deref().unwrap_or("")),
            comment: comment.unwrap_or_default(),
        });
    }
    debug!(path = %path.display(), rows = out.len(), "read GeoPackage");
    Ok(out)
}

// ── Geometry blobs ──────────────────────────────────────────────────────────

fn encode_geometry(mp: &MultiPolygon) -> Vec<u8> {
    let vertices: usize = mp
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .map(|r| r.0.len())
        .sum();
    let mut b = Vec::with_capacity(8 + 32 + 9 + vertices * 16);
    b.extend_from_slice(b"GP");
    b.push(0); // version
    b.push(0b0000_0011); // XY envelope, little endian
    b.extend_from_slice(&4326i32.to_le_bytes());
    let env = bounds_of(mp);
    for v in [
        env.map_or(0.0, |e| e.min_x),
        env.map_or(0.0, |e| e.max_x),
        env.map_or(0.0, |e| e.min_y),
        env.map_or(0.0, |e| e.max_y),
    ] {
        b.extend_from_slice(&v.to_le_bytes());
    }

    b.push(1);
    b.extend_from_slice(&WKB_MULTIPOLYGON.to_le_bytes());
    b.extend_from_slice(&(mp.0.len() as u32).to_le_bytes());
    for poly in mp {
        b.push(1);
        b.extend_from_slice(&WKB_POLYGON.to_le_bytes());
        b.extend_from_slice(&(1 + poly.interiors().len() as u32).to_le_bytes());
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            b.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
            for c in ring.coords() {
                b.extend_from_slice(&c.x.to_le_bytes());
                b.extend_from_slice(&c.y.to_le_bytes());
            }
        }
    }
    b
}

/// Cursor over a WKB buffer with the byte order of the current geometry.
struct Wkb<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Wkb<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], ExportError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or_else(|| ExportError::Geometry("truncated geometry blob".into()))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, ExportError> {
        let b = self.take::<4>()?;
        Ok(if self.little { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    fn f64(&mut self) -> Result<f64, ExportError> {
        let b = self.take::<8>()?;
        Ok(if self.little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }

    fn header(&mut self) -> Result<u32, ExportError> {
        self.little = self.take::<1>()?[0] == 1;
        // ISO Z/M variants share the base type modulo 1000
        Ok(self.u32()? % 1000)
    }

    fn polygon(&mut self) -> Result<Polygon, ExportError> {
        let rings = self.u32()?;
        let mut out = Vec::with_capacity(rings as usize);
        for _ in 0..rings {
            let n = self.u32()?;
            let mut ring = Vec::with_capacity(n as usize);
            for _ in 0..n {
                ring.push(Coord { x: self.f64()?, y: self.f64()? });
            }
            out.push(LineString::new(ring));
        }
        let mut rings = out.into_iter();
        let exterior = rings.next().ok_or_else(|| ExportError::Geometry("polygon without rings".into()))?;
        Ok(Polygon::new(exterior, rings.collect()))
    }
}

fn decode_geometry(blob: &[u8]) -> Result<MultiPolygon, ExportError> {
    if blob.len() < 8 || &blob[..2] != b"GP" {
        return Err(ExportError::Geometry("not a GeoPackage geometry blob".into()));
    }
    let envelope = match (blob[3] >> 1) & 0b111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(ExportError::Geometry(format!("invalid envelope code {other}"))),
    };
    let mut wkb = Wkb { buf: blob, pos: 8 + envelope, little: true };
    match wkb.header()? {
        WKB_POLYGON => Ok(MultiPolygon::new(vec![wkb.polygon()?])),
        WKB_MULTIPOLYGON => {
            let n = wkb.u32()?;
            let mut polys = Vec::with_capacity(n as usize);
            for _ in 0..n {
                if wkb.header()? != WKB_POLYGON {
                    return Err(ExportError::Geometry("multipolygon member is not a polygon".into()));
                }
                polys.push(wkb.polygon()?);
            }
            Ok(MultiPolygon::new(polys))
        }
        other => Err(ExportError::Geometry(format!("unsupported WKB type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;

    #[test]
    fn blob_round_trips_holes() {
        let t = fixtures::table();
        let g = &t.patches()[0].geometry;
        let blob = encode_geometry(g);
        assert_eq!(&blob[..2], b"GP");
        assert_eq!(&decode_geometry(&blob).unwrap(), g);
    }

    /// ✓ The GeoPackage keeps every column, including review state.
    #[test]
    fn layer_round_trips_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.gpkg");
        let t = fixtures::table();
        write(&t, &path).unwrap();
        write(&t, &path).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back, t.patches().to_vec(), "rewriting replaces the file");

        let conn = Connection::open(&path).unwrap();
        let kind: String = conn
            .query_row("SELECT data_type FROM gpkg_contents WHERE table_name = 'alerts'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kind, "features");
    }

    #[test]
    fn garbage_blob_is_a_geometry_error() {
        assert!(matches!(decode_geometry(b"XX\0\0\0\0\0\0"), Err(ExportError::Geometry(_))));
        assert!(matches!(decode_geometry(b"GP\0\x03\0\0\0\0"), Err(ExportError::Geometry(_))));
    }
}
