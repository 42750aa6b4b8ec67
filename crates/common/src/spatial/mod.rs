//! Spatial context building
//!
//! Normalises caller geometry into the canonical `EPSG:4326 <WKT>` area the
//! engine expects. Two strategies share one interface:
//! - `RawWktBuilder`: a WKT string, optionally already CRS-prefixed
//! - `VectorFileBuilder`: a `.wkt` or GeoJSON file on disk

mod extent;
mod geojson;

pub use extent::{GeometryDescriptor, LengthUnit, Resolution, SpatialTemporalExtent};

use crate::errors::{AppError, Result};
use geo::{Area, BoundingRect, CoordsIter};
use geo_types::Geometry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use wkt::ToWkt;

/// The only coordinate reference the engine context accepts here
pub const GEOGRAPHIC_CRS: &str = "EPSG:4326";

/// Canonical, validated geographic area.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaWkt {
    wkt: String,
    bbox: [f64; 4],
}

impl AreaWkt {
    /// Validate a parsed geometry and capture its canonical WKT
    pub fn from_geometry(geometry: &Geometry<f64>) -> Result<Self> {
        match geometry {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {}
            other => {
                return Err(AppError::validation(
                    "spatial_context",
                    format!("expected POLYGON or MULTIPOLYGON, got {}", geometry_name(other)),
                ))
            }
        }

        for coord in geometry.coords_iter() {
            if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
                return Err(AppError::validation(
                    "spatial_context",
                    format!(
                        "coordinate ({}, {}) is outside lon/lat bounds; geometry must be in {}",
                        coord.x, coord.y, GEOGRAPHIC_CRS
                    ),
                ));
            }
        }

        if geometry.unsigned_area() <= 0.0 {
            return Err(AppError::validation(
                "spatial_context",
                "area has no extent",
            ));
        }

        let rect = geometry.bounding_rect().ok_or_else(|| {
            AppError::validation("spatial_context", "area is empty")
        })?;

        Ok(Self {
            wkt: geometry.wkt_string(),
            bbox: [rect.min().x, rect.max().x, rect.min().y, rect.max().y],
        })
    }

    /// Bare WKT, without the CRS prefix
    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    /// `[min_lon, max_lon, min_lat, max_lat]`
    pub fn bbox(&self) -> [f64; 4] {
        self.bbox
    }
}

impl fmt::Display for AreaWkt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", GEOGRAPHIC_CRS, self.wkt)
    }
}

/// Produces the canonical area for an execution
pub trait SpatialContextBuilder: Send + Sync {
    fn build_area(&self) -> Result<AreaWkt>;

    /// Short name used in logs
    fn strategy(&self) -> &'static str;
}

/// Area given inline as WKT
#[derive(Debug, Clone)]
pub struct RawWktBuilder {
    text: String,
}

impl RawWktBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl SpatialContextBuilder for RawWktBuilder {
    fn build_area(&self) -> Result<AreaWkt> {
        let body = strip_crs_prefix(&self.text)?;
        let geometry = parse_wkt(body)?;
        AreaWkt::from_geometry(&geometry)
    }

    fn strategy(&self) -> &'static str {
        "raw_wkt"
    }
}

/// Area read from a vector file
#[derive(Debug, Clone)]
pub struct VectorFileBuilder {
    path: PathBuf,
}

impl VectorFileBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpatialContextBuilder for VectorFileBuilder {
    fn build_area(&self) -> Result<AreaWkt> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            AppError::validation(
                "vector_path",
                format!("cannot read {}: {}", self.path.display(), e),
            )
        })?;

        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let geometry = match extension.as_deref() {
            Some("wkt") | Some("txt") => parse_wkt(strip_crs_prefix(&text)?)?,
            Some("geojson") | Some("json") => geojson::read_polygonal(&text)?,
            _ => {
                return Err(AppError::validation(
                    "vector_path",
                    format!(
                        "unsupported vector file {}; expected .wkt, .txt, .geojson or .json",
                        self.path.display()
                    ),
                ))
            }
        };

        AreaWkt::from_geometry(&geometry)
    }

    fn strategy(&self) -> &'static str {
        "vector_file"
    }
}

/// Parse WKT text into a geometry
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    wkt::Wkt::<f64>::from_str(text.trim())
        .map_err(|e| AppError::validation("spatial_context", format!("invalid WKT: {}", e)))
        .and_then(|w| {
            w.try_into().map_err(|e: wkt::conversion::Error| {
                AppError::validation("spatial_context", format!("unsupported WKT: {:?}", e))
            })
        })
}

/// Accept `EPSG:4326 <WKT>`, `SRID=4326;<WKT>` or bare WKT; reject other CRSs.
fn strip_crs_prefix(text: &str) -> Result<&str> {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix("SRID=") {
        let (srid, body) = rest.split_once(';').ok_or_else(|| {
            AppError::validation("spatial_context", "SRID prefix without ';'")
        })?;
        return match srid.trim() {
            "4326" => Ok(body.trim()),
            other => Err(not_geographic(&format!("EPSG:{}", other))),
        };
    }

    let upper = text.get(..5).map(str::to_ascii_uppercase);
    if upper.as_deref() == Some("EPSG:") {
        let (crs, body) = text.split_once(char::is_whitespace).ok_or_else(|| {
            AppError::validation("spatial_context", "CRS prefix without geometry")
        })?;
        if !crs.eq_ignore_ascii_case(GEOGRAPHIC_CRS) {
            return Err(not_geographic(crs));
        }
        return Ok(body.trim());
    }

    Ok(text)
}

fn not_geographic(crs: &str) -> AppError {
    AppError::validation(
        "spatial_context",
        format!("{} is not geographic; supply lon/lat in {}", crs, GEOGRAPHIC_CRS),
    )
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) => "LINE",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Rect(_) => "RECT",
        Geometry::Triangle(_) => "TRIANGLE",
    }
}
