//! Canonical geometry representation.
//!
//! Every detected signal (coordinate pair, WKT, WKB, GeoJSON) is normalized into a
//! [`CanonicalGeometry`]: a `geo_types::Geometry<f64>` in EPSG:4326 with `x = longitude` and
//! `y = latitude`.

use std::fmt;

use geo_types::{Geometry, MultiLineString, MultiPoint, MultiPolygon};
use serde::Serialize;
use thiserror::Error;
use wkt::ToWkt;

/// SRID of every canonical geometry (WGS84 longitude/latitude).
pub const CANONICAL_SRID: u32 = 4326;

/// Geometry column type declared to loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    /// Mixed or unknown geometry types.
    Geometry,
}

impl GeometryType {
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => Self::Point,
            Geometry::Line(_) | Geometry::LineString(_) => Self::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => Self::Polygon,
            Geometry::MultiPoint(_) => Self::MultiPoint,
            Geometry::MultiLineString(_) => Self::MultiLineString,
            Geometry::MultiPolygon(_) => Self::MultiPolygon,
            Geometry::GeometryCollection(_) => Self::GeometryCollection,
        }
    }

    fn multi(self) -> Option<Self> {
        match self {
            Self::Point => Some(Self::MultiPoint),
            Self::LineString => Some(Self::MultiLineString),
            Self::Polygon => Some(Self::MultiPolygon),
            _ => None,
        }
    }

    /// Smallest type able to hold both `self` and `other`.
    ///
    /// Equal types stay as they are, `X` with `MultiX` becomes `MultiX`, anything else is
    /// [`GeometryType::Geometry`].
    pub fn unify(self, other: Self) -> Self {
        if self == other {
            self
        } else if self.multi() == Some(other) {
            other
        } else if other.multi() == Some(self) {
            self
        } else {
            Self::Geometry
        }
    }

    /// Whether a geometry of type `found` fits a column declared as `self` (possibly after
    /// promotion to the multi type).
    pub fn accepts(self, found: Self) -> bool {
        self == Self::Geometry || self == found || found.multi() == Some(self)
    }

    /// `self` if it accepts `found`, otherwise the smallest type holding both.
    pub fn widen(self, found: Self) -> Self {
        if self.accepts(found) { self } else { self.unify(found) }
    }

    /// Make `geometry` fit a column declared as `self`, promoting single to multi geometries.
    pub fn conform(self, geometry: Geometry<f64>) -> Result<Geometry<f64>, GeometryFailure> {
        let found = Self::of(&geometry);
        if self == Self::Geometry || self == found {
            return Ok(geometry);
        }
        match (self, geometry) {
            (Self::MultiPoint, Geometry::Point(p)) => Ok(MultiPoint(vec![p]).into()),
            (Self::MultiLineString, Geometry::LineString(l)) => Ok(MultiLineString(vec![l]).into()),
            (Self::MultiLineString, Geometry::Line(l)) => Ok(MultiLineString(vec![l.into()]).into()),
            (Self::MultiPolygon, Geometry::Polygon(p)) => Ok(MultiPolygon(vec![p]).into()),
            (Self::MultiPolygon, Geometry::Rect(r)) => Ok(MultiPolygon(vec![r.to_polygon()]).into()),
            (Self::MultiPolygon, Geometry::Triangle(t)) => Ok(MultiPolygon(vec![t.to_polygon()]).into()),
            _ => Err(GeometryFailure::TypeMismatch {
                expected: self,
                found,
            }),
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Point => "POINT",
            Self::LineString => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLineString => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
            Self::GeometryCollection => "GEOMETRYCOLLECTION",
            Self::Geometry => "GEOMETRY",
        };
        f.write_str(s)
    }
}

/// A fully constructed geometry in the canonical CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalGeometry(Geometry<f64>);

impl CanonicalGeometry {
    pub(crate) fn new(geometry: Geometry<f64>) -> Self {
        Self(geometry)
    }

    pub fn geometry(&self) -> &Geometry<f64> {
        &self.0
    }

    pub fn into_inner(self) -> Geometry<f64> {
        self.0
    }

    pub fn geometry_type(&self) -> GeometryType {
        GeometryType::of(&self.0)
    }

    /// Promote this geometry to fit a column declared as `declared`.
    pub fn conform_to(self, declared: GeometryType) -> Result<Self, GeometryFailure> {
        declared.conform(self.0).map(Self)
    }

    pub fn srid(&self) -> u32 {
        CANONICAL_SRID
    }

    pub fn to_wkt(&self) -> String {
        self.0.wkt_string()
    }
}

/// Why a row's geometry could not be resolved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryFailure {
    #[error("column '{column}' is empty")]
    MissingValue { column: String },

    #[error("column '{column}' is not numeric: '{raw}'")]
    NotNumeric { column: String, raw: String },

    #[error("column '{column}' is not finite: '{raw}'")]
    NonFinite { column: String, raw: String },

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("invalid WKT in column '{column}': {message}")]
    Wkt { column: String, message: String },

    #[error("invalid WKB in column '{column}': {message}")]
    Wkb { column: String, message: String },

    #[error("invalid GeoJSON in column '{column}': {message}")]
    GeoJson { column: String, message: String },

    #[error("column '{column}' holds a GeoJSON {found}, expected a Geometry object")]
    NotAGeometry { column: String, found: String },

    #[error("unsupported SRID {srid} in column '{column}' (expected {CANONICAL_SRID})")]
    UnsupportedSrid { column: String, srid: String },

    #[error("geometry type {found} does not fit declared {expected}")]
    TypeMismatch {
        expected: GeometryType,
        found: GeometryType,
    },
}
