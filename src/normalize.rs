//! Geometry normalizer.
//!
//! Turns the value(s) a [`GeometrySignal`] points at into a [`CanonicalGeometry`]. Each row is
//! handled on its own and ends in exactly one [`RowGeometry`] state; nothing is carried over
//! between rows, so a run can stop between any two rows.

use geo_types::{Geometry, Point};
use geojson::GeoJson;
use wkt::TryFromWkt;

use crate::detect::{CoordinateColumns, split_srid, strip_hex_prefix};
use crate::geometry::{CANONICAL_SRID, CanonicalGeometry, GeometryFailure, GeometryType};
use crate::types::{ColumnRef, Value};

const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// The geometry source chosen for a sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometrySignal {
    Point(CoordinateColumns),
    Wkt(ColumnRef),
    Wkb(ColumnRef),
    GeoJson(ColumnRef),
}

impl GeometrySignal {
    /// Column holding the encoded geometry, for single-column signals.
    ///
    /// That column is dropped from the record attributes once decoded.
    pub fn encoded_column(&self) -> Option<&ColumnRef> {
        match self {
            Self::Point(_) => None,
            Self::Wkt(c) | Self::Wkb(c) | Self::GeoJson(c) => Some(c),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Point(_) => "coordinate pair",
            Self::Wkt(_) => "WKT",
            Self::Wkb(_) => "WKB",
            Self::GeoJson(_) => "GeoJSON",
        }
    }
}

/// Terminal state of a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowGeometry {
    Resolved(CanonicalGeometry),
    Failed(GeometryFailure),
    /// The sheet has no geometry signal; the row passes through as plain data.
    NoSignal,
}

impl RowGeometry {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Promote a resolved geometry to fit a column declared as `declared`.
    pub fn conform(self, declared: GeometryType) -> Self {
        match self {
            Self::Resolved(g) => match g.conform_to(declared) {
                Ok(g) => Self::Resolved(g),
                Err(e) => Self::Failed(e),
            },
            other => other,
        }
    }
}

impl From<Result<Geometry<f64>, GeometryFailure>> for RowGeometry {
    fn from(result: Result<Geometry<f64>, GeometryFailure>) -> Self {
        match result {
            Ok(g) => Self::Resolved(CanonicalGeometry::new(g)),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Normalize one row under `signal`.
pub fn normalize_row(signal: Option<&GeometrySignal>, row: &[Value]) -> RowGeometry {
    match signal {
        None => RowGeometry::NoSignal,
        Some(signal) => decode(signal, row).into(),
    }
}

fn decode(signal: &GeometrySignal, row: &[Value]) -> Result<Geometry<f64>, GeometryFailure> {
    match signal {
        GeometrySignal::Point(cols) => point_from_pair(cols, row),
        GeometrySignal::Wkt(col) => from_wkt(col, cell(row, col)),
        GeometrySignal::Wkb(col) => from_wkb(col, cell(row, col)),
        GeometrySignal::GeoJson(col) => from_geojson(col, cell(row, col)),
    }
}

fn cell<'a>(row: &'a [Value], col: &ColumnRef) -> &'a Value {
    row.get(col.index).unwrap_or(&Value::Null)
}

fn coordinate(col: &ColumnRef, value: &Value) -> Result<f64, GeometryFailure> {
    let not_numeric = || GeometryFailure::NotNumeric {
        column: col.name.clone(),
        raw: value.to_string(),
    };
    let v = match value {
        Value::Null => {
            return Err(GeometryFailure::MissingValue {
                column: col.name.clone(),
            });
        }
        Value::Int64(i) => *i as f64,
        Value::Float64(f) => *f,
        Value::Utf8(s) => s.trim().parse::<f64>().map_err(|_| not_numeric())?,
        Value::Bool(_) | Value::Binary(_) => return Err(not_numeric()),
    };
    if !v.is_finite() {
        return Err(GeometryFailure::NonFinite {
            column: col.name.clone(),
            raw: value.to_string(),
        });
    }
    Ok(v)
}

/// Build a point from latitude/longitude cells; bounds are inclusive.
pub(crate) fn point_from_pair(cols: &CoordinateColumns, row: &[Value]) -> Result<Geometry<f64>, GeometryFailure> {
    let lat = coordinate(&cols.latitude, cell(row, &cols.latitude))?;
    let lon = coordinate(&cols.longitude, cell(row, &cols.longitude))?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GeometryFailure::LatitudeOutOfRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(GeometryFailure::LongitudeOutOfRange(lon));
    }
    Ok(Point::new(lon, lat).into())
}

fn check_srid(col: &ColumnRef, srid: u32) -> Result<(), GeometryFailure> {
    if srid == CANONICAL_SRID {
        Ok(())
    } else {
        Err(GeometryFailure::UnsupportedSrid {
            column: col.name.clone(),
            srid: srid.to_string(),
        })
    }
}

fn from_wkt(col: &ColumnRef, value: &Value) -> Result<Geometry<f64>, GeometryFailure> {
    let text = match value {
        Value::Null => {
            return Err(GeometryFailure::MissingValue {
                column: col.name.clone(),
            });
        }
        other => other.as_text().ok_or_else(|| GeometryFailure::Wkt {
            column: col.name.clone(),
            message: "binary value in a WKT column".to_string(),
        })?,
    };

    let (srid, body) = split_srid(&text);
    if let Some(srid) = srid {
        match srid.parse::<u32>() {
            Ok(n) => check_srid(col, n)?,
            Err(_) => {
                return Err(GeometryFailure::UnsupportedSrid {
                    column: col.name.clone(),
                    srid: srid.to_string(),
                });
            }
        }
    }

    Geometry::<f64>::try_from_wkt_str(body).map_err(|e| GeometryFailure::Wkt {
        column: col.name.clone(),
        message: e.to_string(),
    })
}

fn wkb_failure(col: &ColumnRef, message: impl Into<String>) -> GeometryFailure {
    GeometryFailure::Wkb {
        column: col.name.clone(),
        message: message.into(),
    }
}

fn decode_hex(col: &ColumnRef, text: &str) -> Result<Vec<u8>, GeometryFailure> {
    let hex = strip_hex_prefix(text);
    if hex.len() % 2 != 0 {
        return Err(wkb_failure(col, "odd number of hex digits"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| wkb_failure(col, format!("invalid hex digits at offset {i}")))
        })
        .collect()
}

fn read_u32(bytes: &[u8], little_endian: bool) -> Option<u32> {
    let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(arr)
    } else {
        u32::from_be_bytes(arr)
    })
}

/// Turn PostGIS extended WKB (SRID flag set) into plain WKB, checking the SRID.
fn strip_ewkb_srid(col: &ColumnRef, bytes: Vec<u8>) -> Result<Vec<u8>, GeometryFailure> {
    let little_endian = match bytes.first() {
        Some(1) => true,
        Some(0) => false,
        _ => return Err(wkb_failure(col, "missing or invalid byte-order marker")),
    };
    let type_code = read_u32(&bytes[1..], little_endian)
        .ok_or_else(|| wkb_failure(col, "truncated geometry type"))?;
    if type_code & EWKB_SRID_FLAG == 0 {
        return Ok(bytes);
    }
    let srid = read_u32(&bytes[5..], little_endian)
        .ok_or_else(|| wkb_failure(col, "truncated EWKB SRID"))?;
    check_srid(col, srid)?;

    let plain_type = type_code & !EWKB_SRID_FLAG;
    let mut out = Vec::with_capacity(bytes.len() - 4);
    out.push(bytes[0]);
    if little_endian {
        out.extend_from_slice(&plain_type.to_le_bytes());
    } else {
        out.extend_from_slice(&plain_type.to_be_bytes());
    }
    out.extend_from_slice(&bytes[9..]);
    Ok(out)
}

fn from_wkb(col: &ColumnRef, value: &Value) -> Result<Geometry<f64>, GeometryFailure> {
    let bytes = match value {
        Value::Null => {
            return Err(GeometryFailure::MissingValue {
                column: col.name.clone(),
            });
        }
        Value::Binary(b) => b.clone(),
        Value::Utf8(s) => decode_hex(col, s)?,
        other => return Err(wkb_failure(col, format!("expected hex text or bytes, got '{other}'"))),
    };
    let bytes = strip_ewkb_srid(col, bytes)?;
    let mut reader = bytes.as_slice();
    let geometry = wkb::wkb_to_geom(&mut reader).map_err(|e| wkb_failure(col, format!("{e:?}")))?;
    if !reader.is_empty() {
        return Err(wkb_failure(col, format!("{} trailing bytes", reader.len())));
    }
    Ok(geometry)
}

fn from_geojson(col: &ColumnRef, value: &Value) -> Result<Geometry<f64>, GeometryFailure> {
    let failure = |message: String| GeometryFailure::GeoJson {
        column: col.name.clone(),
        message,
    };
    let text = match value {
        Value::Null => {
            return Err(GeometryFailure::MissingValue {
                column: col.name.clone(),
            });
        }
        other => other
            .as_text()
            .ok_or_else(|| failure("binary value in a GeoJSON column".to_string()))?,
    };

    let parsed = text.parse::<GeoJson>().map_err(|e| failure(e.to_string()))?;
    let geometry = match parsed {
        GeoJson::Geometry(g) => g,
        GeoJson::Feature(_) => {
            return Err(GeometryFailure::NotAGeometry {
                column: col.name.clone(),
                found: "Feature".to_string(),
            });
        }
        GeoJson::FeatureCollection(_) => {
            return Err(GeometryFailure::NotAGeometry {
                column: col.name.clone(),
                found: "FeatureCollection".to_string(),
            });
        }
    };
    Geometry::<f64>::try_from(geometry).map_err(|e| failure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, index: usize) -> ColumnRef {
        ColumnRef {
            name: name.to_string(),
            index,
        }
    }

    fn pair() -> GeometrySignal {
        GeometrySignal::Point(CoordinateColumns {
            latitude: col("lat", 0),
            longitude: col("lon", 1),
        })
    }

    fn text(s: &str) -> Value {
        Value::Utf8(s.to_string())
    }

    fn resolved_point(out: RowGeometry) -> (f64, f64) {
        match out {
            RowGeometry::Resolved(g) => match g.into_inner() {
                Geometry::Point(p) => (p.x(), p.y()),
                other => panic!("expected point, got {other:?}"),
            },
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn coordinate_pair_resolves_lon_lat_order() {
        let out = normalize_row(Some(&pair()), &[text("45.5"), text("-122.6")]);
        assert_eq!(resolved_point(out), (-122.6, 45.5));
    }

    #[test]
    fn coordinate_bounds_are_inclusive() {
        for (lat, lon) in [("90", "180"), ("-90", "-180"), ("90.0", "-180.0")] {
            assert!(normalize_row(Some(&pair()), &[text(lat), text(lon)]).is_resolved());
        }
        assert_eq!(
            normalize_row(Some(&pair()), &[text("90.0001"), text("0")]),
            RowGeometry::Failed(GeometryFailure::LatitudeOutOfRange(90.0001))
        );
        assert_eq!(
            normalize_row(Some(&pair()), &[text("0"), text("180.0001")]),
            RowGeometry::Failed(GeometryFailure::LongitudeOutOfRange(180.0001))
        );
    }

    #[test]
    fn coordinate_failures_are_typed() {
        assert!(matches!(
            normalize_row(Some(&pair()), &[text("north"), text("1")]),
            RowGeometry::Failed(GeometryFailure::NotNumeric { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&pair()), &[text("NaN"), text("1")]),
            RowGeometry::Failed(GeometryFailure::NonFinite { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&pair()), &[Value::Null, text("1")]),
            RowGeometry::Failed(GeometryFailure::MissingValue { .. })
        ));
        assert!(normalize_row(Some(&pair()), &[Value::Float64(1.5), Value::Int64(2)]).is_resolved());
    }

    #[test]
    fn point_round_trips_through_wkt() {
        let out = normalize_row(Some(&pair()), &[text("45.123456789"), text("-122.987654321")]);
        let RowGeometry::Resolved(g) = out else {
            panic!("expected resolved");
        };
        let wkt = g.to_wkt();
        let back = normalize_row(Some(&GeometrySignal::Wkt(col("wkt", 0))), &[text(&wkt)]);
        let (x, y) = resolved_point(back);
        assert!((x - -122.987654321).abs() < 1e-9);
        assert!((y - 45.123456789).abs() < 1e-9);
    }

    #[test]
    fn wkt_parses_and_rejects_garbage() {
        let signal = GeometrySignal::Wkt(col("wkt", 0));
        assert_eq!(resolved_point(normalize_row(Some(&signal), &[text("POINT (1 2)")])), (1.0, 2.0));
        assert_eq!(
            resolved_point(normalize_row(Some(&signal), &[text("SRID=4326;POINT(3 4)")])),
            (3.0, 4.0)
        );
        assert!(matches!(
            normalize_row(Some(&signal), &[text("POINT (1")]),
            RowGeometry::Failed(GeometryFailure::Wkt { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&signal), &[text("CIRCLE (1 2)")]),
            RowGeometry::Failed(GeometryFailure::Wkt { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&signal), &[text("SRID=3857;POINT(3 4)")]),
            RowGeometry::Failed(GeometryFailure::UnsupportedSrid { .. })
        ));
    }

    #[test]
    fn wkb_accepts_hex_ewkb_and_raw_bytes() {
        let signal = GeometrySignal::Wkb(col("wkb", 0));
        let hex = "0101000000000000000000F03F0000000000000040";
        assert_eq!(resolved_point(normalize_row(Some(&signal), &[text(hex)])), (1.0, 2.0));

        // PostGIS EWKB with SRID 4326
        let ewkb = "0101000020E6100000000000000000F03F0000000000000040";
        assert_eq!(resolved_point(normalize_row(Some(&signal), &[text(ewkb)])), (1.0, 2.0));

        let raw = decode_hex(&col("wkb", 0), hex).unwrap();
        assert_eq!(resolved_point(normalize_row(Some(&signal), &[Value::Binary(raw)])), (1.0, 2.0));

        assert!(matches!(
            normalize_row(Some(&signal), &[text("01010000")]),
            RowGeometry::Failed(GeometryFailure::Wkb { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&signal), &[text("zz")]),
            RowGeometry::Failed(GeometryFailure::Wkb { .. })
        ));
    }

    #[test]
    fn geojson_must_be_a_geometry_object() {
        let signal = GeometrySignal::GeoJson(col("geojson", 0));
        assert_eq!(
            resolved_point(normalize_row(
                Some(&signal),
                &[text(r#"{"type":"Point","coordinates":[5.0,6.0]}"#)]
            )),
            (5.0, 6.0)
        );
        let feature = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[1,2]}}"#;
        assert!(matches!(
            normalize_row(Some(&signal), &[text(feature)]),
            RowGeometry::Failed(GeometryFailure::NotAGeometry { .. })
        ));
        assert!(matches!(
            normalize_row(Some(&signal), &[text("{\"type\":")]),
            RowGeometry::Failed(GeometryFailure::GeoJson { .. })
        ));
    }

    #[test]
    fn conform_promotes_resolved_rows_only() {
        let signal = GeometrySignal::Wkt(col("wkt", 0));
        let out = normalize_row(Some(&signal), &[text("POINT (1 2)")]).conform(GeometryType::MultiPoint);
        match out {
            RowGeometry::Resolved(g) => assert_eq!(g.geometry_type(), GeometryType::MultiPoint),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(RowGeometry::NoSignal.conform(GeometryType::Point), RowGeometry::NoSignal);
    }

    #[test]
    fn no_signal_passes_through() {
        assert_eq!(normalize_row(None, &[text("x")]), RowGeometry::NoSignal);
    }
}
