//! KML export: one `Placemark` per patch, `name` = id, the other fields in
//! `ExtendedData`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::ExportError;
use crate::geometry::{LineString, MultiPolygon};
use crate::table::{AlertPatch, AlertTable};

const KML_NS: &str = "http://www.opengis.net/kml/2.2";

pub fn write(table: &AlertTable, path: &Path) -> Result<(), ExportError> {
    let file = BufWriter::new(File::create(path)?);
    let mut w = Writer::new_with_indent(file, b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(BytesStart::new("kml").with_attributes([("xmlns", KML_NS)])))?;
    w.write_event(Event::Start(BytesStart::new("Document")))?;
    for p in table {
        placemark(&mut w, p)?;
    }
    w.write_event(Event::End(BytesEnd::new("Document")))?;
    w.write_event(Event::End(BytesEnd::new("kml")))?;
    w.into_inner().flush()?;
    Ok(())
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, value: &str) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn placemark<W: Write>(w: &mut Writer<W>, p: &AlertPatch) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new("Placemark")))?;
    text_element(w, "name", &p.id.to_string())?;

    w.write_event(Event::Start(BytesStart::new("ExtendedData")))?;
    let fields = [
        ("alert", p.alert.to_string()),
        ("date", format!("{:.3}", p.date)),
        ("surface", p.surface.to_string()),
        ("nb_pixel", p.nb_pixel.to_string()),
        ("review", p.review.as_str().to_string()),
        ("comment", p.comment.clone()),
    ];
    for (name, value) in fields {
        w.write_event(Event::Start(BytesStart::new("Data").with_attributes([("name", name)])))?;
        text_element(w, "value", &value)?;
        w.write_event(Event::End(BytesEnd::new("Data")))?;
    }
    w.write_event(Event::End(BytesEnd::new("ExtendedData")))?;

    geometry(w, &p.geometry)?;
    w.write_event(Event::End(BytesEnd::new("Placemark")))?;
    Ok(())
}

fn coordinates(ring: &LineString) -> String {
    ring.coords()
        .map(|c| format!("{},{}", c.x, c.y))
        .collect::<Vec<_>>()
        .join(" ")
}

fn boundary<W: Write>(w: &mut Writer<W>, tag: &str, ring: &LineString) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new(tag)))?;
    w.write_event(Event::Start(BytesStart::new("LinearRing")))?;
    text_element(w, "coordinates", &coordinates(ring))?;
    w.write_event(Event::End(BytesEnd::new("LinearRing")))?;
    w.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn geometry<W: Write>(w: &mut Writer<W>, mp: &MultiPolygon) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new("MultiGeometry")))?;
    for poly in mp {
        w.write_event(Event::Start(BytesStart::new("Polygon")))?;
        boundary(w, "outerBoundaryIs", poly.exterior())?;
        for hole in poly.interiors() {
            boundary(w, "innerBoundaryIs", hole)?;
        }
        w.write_event(Event::End(BytesEnd::new("Polygon")))?;
    }
    w.write_event(Event::End(BytesEnd::new("MultiGeometry")))?;
    Ok(())
}
