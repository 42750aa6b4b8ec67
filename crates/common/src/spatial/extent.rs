//! Spatial/temporal extent and the geometry descriptor sent to the engine.

use super::{AreaWkt, GEOGRAPHIC_CRS};
use crate::errors::{AppError, Result};
use chrono::NaiveDate;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Metres per degree of arc along the equator
const METRES_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    M,
    Km,
}

impl LengthUnit {
    fn metres(self) -> f64 {
        match self {
            LengthUnit::M => 1.0,
            LengthUnit::Km => 1_000.0,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LengthUnit::M => "m",
            LengthUnit::Km => "km",
        }
    }
}

/// Linear grid cell size, e.g. `1 km`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    value: f64,
    unit: LengthUnit,
}

impl Resolution {
    pub fn new(value: f64, unit: LengthUnit) -> Result<Self> {
        if !(value.is_finite() && value > 0.0) {
            return Err(AppError::validation(
                "resolution",
                format!("resolution must be positive, got {}", value),
            ));
        }
        Ok(Self { value, unit })
    }

    pub fn metres(&self) -> f64 {
        self.value * self.unit.metres()
    }
}

impl FromStr for Resolution {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*(km|m)\s*$").expect("static pattern")
        });

        let captures = pattern.captures(s).ok_or_else(|| {
            AppError::validation(
                "resolution",
                format!("\"{}\" is not a resolution like \"1 km\" or \"250 m\"", s),
            )
        })?;

        let value: f64 = captures[1].parse().map_err(|_| {
            AppError::validation("resolution", format!("bad number in \"{}\"", s))
        })?;
        let unit = if captures[2].eq_ignore_ascii_case("km") {
            LengthUnit::Km
        } else {
            LengthUnit::M
        };

        Resolution::new(value, unit)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

/// Immutable area + resolution + year, built before any engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialTemporalExtent {
    area: AreaWkt,
    resolution: Resolution,
    year: i32,
}

impl SpatialTemporalExtent {
    pub fn new(area: AreaWkt, resolution: Resolution, year: i32) -> Result<Self> {
        if year < crate::MIN_YEAR {
            return Err(AppError::validation(
                "year",
                format!("year must be >= {}, got {}", crate::MIN_YEAR, year),
            ));
        }
        let representable = year
            .checked_add(1)
            .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1))
            .is_some();
        if year > crate::MAX_YEAR || !representable {
            return Err(AppError::validation(
                "year",
                format!("year must be <= {}, got {}", crate::MAX_YEAR, year),
            ));
        }
        Ok(Self {
            area,
            resolution,
            year,
        })
    }

    pub fn area(&self) -> &AreaWkt {
        &self.area
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Grid over the area at the resolution, scoped to the calendar year
    pub fn geometry_descriptor(&self) -> GeometryDescriptor {
        let [min_x, max_x, min_y, max_y] = self.area.bbox();
        let cell = self.resolution.metres();
        let cells = |span_deg: f64| ((span_deg * METRES_PER_DEGREE) / cell).ceil().max(1.0) as u64;

        GeometryDescriptor {
            year_start_ms: year_start_millis(self.year),
            year_end_ms: year_start_millis(self.year + 1),
            grid_x: cells(max_x - min_x),
            grid_y: cells(max_y - min_y),
            bbox: self.area.bbox(),
            shape: self.area.wkt().to_string(),
        }
    }
}

fn year_start_millis(year: i32) -> i64 {
    // Range checked in SpatialTemporalExtent::new
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Encoded engine geometry: one logical time step plus a 2-D grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryDescriptor {
    pub year_start_ms: i64,
    pub year_end_ms: i64,
    pub grid_x: u64,
    pub grid_y: u64,
    pub bbox: [f64; 4],
    pub shape: String,
}

impl fmt::Display for GeometryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [min_x, max_x, min_y, max_y] = self.bbox;
        write!(
            f,
            "τ0(1){{ttype=LOGICAL,tstart={},tend={},tscope=1.0,tunit=YEAR}}\
             S2({},{}){{bbox=[{} {} {} {}],shape={},proj={}}}",
            self.year_start_ms,
            self.year_end_ms,
            self.grid_x,
            self.grid_y,
            min_x,
            max_x,
            min_y,
            max_y,
            self.shape,
            GEOGRAPHIC_CRS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{RawWktBuilder, SpatialContextBuilder};

    fn unit_square() -> AreaWkt {
        RawWktBuilder::new("POLYGON((0 0,0 1,1 1,1 0,0 0))")
            .build_area()
            .unwrap()
    }

    #[test]
    fn test_resolution_parsing() {
        let km: Resolution = "1 km".parse().unwrap();
        assert_eq!(km.metres(), 1_000.0);
        assert_eq!(km.to_string(), "1 km");

        let m: Resolution = "250m".parse().unwrap();
        assert_eq!(m.metres(), 250.0);

        let upper: Resolution = " 0.5 KM ".parse().unwrap();
        assert_eq!(upper.metres(), 500.0);
    }

    #[test]
    fn test_resolution_rejects_bad_input() {
        assert!("".parse::<Resolution>().is_err());
        assert!("1 mile".parse::<Resolution>().is_err());
        assert!("0 km".parse::<Resolution>().is_err());
        assert!("-1 km".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_year_lower_bound() {
        let resolution: Resolution = "1 km".parse().unwrap();
        assert!(SpatialTemporalExtent::new(unit_square(), resolution, 1900).is_ok());

        let err = SpatialTemporalExtent::new(unit_square(), resolution, 1899).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "year"));
    }

    #[test]
    fn test_year_upper_bound() {
        let resolution: Resolution = "1 km".parse().unwrap();
        assert!(SpatialTemporalExtent::new(unit_square(), resolution, crate::MAX_YEAR).is_ok());

        for year in [crate::MAX_YEAR + 1, i32::MAX] {
            let err = SpatialTemporalExtent::new(unit_square(), resolution, year).unwrap_err();
            assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "year"));
        }
    }

    #[test]
    fn test_geometry_descriptor() {
        let extent =
            SpatialTemporalExtent::new(unit_square(), "1 km".parse().unwrap(), 2020).unwrap();
        let descriptor = extent.geometry_descriptor();

        // 2020-01-01T00:00:00Z and 2021-01-01T00:00:00Z
        assert_eq!(descriptor.year_start_ms, 1_577_836_800_000);
        assert_eq!(descriptor.year_end_ms, 1_609_459_200_000);
        // one degree at 1 km cells
        assert_eq!(descriptor.grid_x, 112);
        assert_eq!(descriptor.grid_y, 112);

        let encoded = descriptor.to_string();
        assert!(encoded.starts_with("τ0(1){ttype=LOGICAL,tstart=1577836800000"));
        assert!(encoded.contains("S2(112,112){bbox=[0 1 0 1]"));
        assert!(encoded.ends_with("shape=POLYGON((0 0,0 1,1 1,1 0,0 0)),proj=EPSG:4326}"));
    }
}
