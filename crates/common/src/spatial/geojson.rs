//! Minimal GeoJSON reader for polygonal areas.
//!
//! Accepts a bare geometry, a Feature, or a FeatureCollection. All polygonal
//! members are merged into one MultiPolygon; anything else is rejected.

use crate::errors::{AppError, Result};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use serde_json::Value;

pub(super) fn read_polygonal(text: &str) -> Result<Geometry<f64>> {
    let root: Value = serde_json::from_str(text).map_err(|e| invalid(format!("not JSON: {}", e)))?;

    check_crs(&root)?;

    let mut polygons = Vec::new();
    collect(&root, &mut polygons)?;

    match polygons.len() {
        0 => Err(invalid("no polygon geometry found")),
        1 => Ok(Geometry::Polygon(polygons.remove(0))),
        _ => Ok(Geometry::MultiPolygon(MultiPolygon(polygons))),
    }
}

fn collect(value: &Value, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match member_str(value, "type")? {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("FeatureCollection without features"))?;
            for feature in features {
                collect(feature, out)?;
            }
            Ok(())
        }
        "Feature" => match value.get("geometry") {
            Some(Value::Null) | None => Ok(()),
            Some(geometry) => collect(geometry, out),
        },
        "Polygon" => {
            out.push(polygon(coordinates(value)?)?);
            Ok(())
        }
        "MultiPolygon" => {
            let parts = coordinates(value)?
                .as_array()
                .ok_or_else(|| invalid("MultiPolygon coordinates must be an array"))?;
            for part in parts {
                out.push(polygon(part)?);
            }
            Ok(())
        }
        other => Err(invalid(format!("{} is not a polygonal geometry", other))),
    }
}

/// A GeoJSON `crs` member, when present, must name WGS84 lon/lat
fn check_crs(root: &Value) -> Result<()> {
    let Some(name) = root.pointer("/crs/properties/name").and_then(Value::as_str) else {
        return Ok(());
    };

    let upper = name.to_ascii_uppercase();
    let geographic = upper.ends_with("CRS84")
        || upper.ends_with("EPSG::4326")
        || upper.ends_with("EPSG:4326");
    if geographic {
        Ok(())
    } else {
        Err(AppError::validation(
            "vector_path",
            format!("{} is not geographic; reproject to EPSG:4326", name),
        ))
    }
}

fn polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value
        .as_array()
        .ok_or_else(|| invalid("Polygon coordinates must be an array of rings"))?;
    let mut rings = rings.iter().map(ring);

    let exterior = rings
        .next()
        .ok_or_else(|| invalid("Polygon without exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;

    Ok(Polygon::new(exterior, interiors))
}

fn ring(value: &Value) -> Result<LineString<f64>> {
    let positions = value
        .as_array()
        .ok_or_else(|| invalid("ring must be an array of positions"))?;
    if positions.len() < 4 {
        return Err(invalid("ring needs at least four positions"));
    }
    positions
        .iter()
        .map(position)
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn position(value: &Value) -> Result<Coord<f64>> {
    match value.as_array().map(Vec::as_slice) {
        Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok(Coord { x, y }),
            _ => Err(invalid("position members must be numbers")),
        },
        _ => Err(invalid("position needs at least two numbers")),
    }
}

fn coordinates(value: &Value) -> Result<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| invalid("geometry without coordinates"))
}

fn member_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("missing \"{}\" member", key)))
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::validation("vector_path", format!("invalid GeoJSON: {}", message.into()))
}
