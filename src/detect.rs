//! Geometry signal detectors.
//!
//! Each detector is a pure function over a [`ColumnSet`] (plus samples where the content has to
//! be inspected). Alias sets come from catalog definitions, never from literals here.

use log::debug;

use crate::catalog::{GeographyDefinition, LATITUDE_FIELD, LONGITUDE_FIELD};
use crate::probe::ColumnSamples;
use crate::types::{ColumnRef, ColumnSet, Value};

const WKT_KEYWORDS: &[&str] = &[
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
    "TRIANGLE",
    "TIN",
    "POLYHEDRALSURFACE",
];

/// Outcome of a content-inspecting detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection<T> {
    /// No column carries this signal; other signals may still apply.
    NoMatch,
    /// The signal is present.
    Matched(T),
    /// A column name matched but its sample is not valid for the signal.
    InvalidContent { column: ColumnRef, reason: String },
}

/// Latitude/longitude columns of a coordinate-pair source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateColumns {
    pub latitude: ColumnRef,
    pub longitude: ColumnRef,
}

/// Encoding of a single well-known geometry column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownEncoding {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellKnownColumn {
    pub column: ColumnRef,
    pub encoding: WellKnownEncoding,
}

fn first_present_alias(definition: &GeographyDefinition, field: &str, columns: &ColumnSet) -> Option<ColumnRef> {
    definition
        .field(field)?
        .aliases
        .iter()
        .find_map(|alias| columns.find(alias))
}

/// Columns matching any alias of any field of the given definitions, deduplicated, in header
/// order.
fn alias_columns(definitions: &[&GeographyDefinition], columns: &ColumnSet) -> Vec<ColumnRef> {
    let mut found: Vec<ColumnRef> = definitions
        .iter()
        .flat_map(|d| d.fields.iter())
        .flat_map(|f| f.aliases.iter())
        .filter_map(|alias| columns.find(alias))
        .collect();
    found.sort_by_key(|c| c.index);
    found.dedup();
    found
}

/// Detect a latitude/longitude pair using the aliases of a coordinate definition.
pub fn coordinate_pair(columns: &ColumnSet, definition: &GeographyDefinition) -> Option<CoordinateColumns> {
    let latitude = first_present_alias(definition, LATITUDE_FIELD, columns)?;
    let longitude = first_present_alias(definition, LONGITUDE_FIELD, columns)?;
    if latitude.index == longitude.index {
        return None;
    }
    Some(CoordinateColumns { latitude, longitude })
}

/// Detect a single WKT or WKB column and decide its encoding from a sample value.
pub fn well_known(
    columns: &ColumnSet,
    samples: &ColumnSamples,
    wkt: Option<&GeographyDefinition>,
    wkb: Option<&GeographyDefinition>,
) -> Detection<WellKnownColumn> {
    let defs: Vec<&GeographyDefinition> = wkt.into_iter().chain(wkb).collect();
    let found = alias_columns(&defs, columns);
    let column = match found.as_slice() {
        [single] => single.clone(),
        [] => return Detection::NoMatch,
        many => {
            debug!(
                "well-known geometry detector: {} candidate columns {:?}, need exactly one",
                many.len(),
                many.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            );
            return Detection::NoMatch;
        }
    };

    let encoding = match samples.first_non_null(column.index) {
        Some(Value::Binary(_)) => WellKnownEncoding::Binary,
        Some(value) => {
            let text = value.as_text().unwrap_or_default();
            if looks_like_wkt(&text) {
                WellKnownEncoding::Text
            } else if looks_like_hex_wkb(&text) {
                WellKnownEncoding::Binary
            } else {
                return Detection::InvalidContent {
                    reason: format!(
                        "sample '{}' is neither WKT nor hex-encoded WKB",
                        truncate(&text, 40)
                    ),
                    column,
                };
            }
        }
        None => {
            let is_wkt = wkt
                .map(|d| alias_columns(&[d], columns).contains(&column))
                .unwrap_or(false);
            if is_wkt {
                WellKnownEncoding::Text
            } else {
                WellKnownEncoding::Binary
            }
        }
    };

    Detection::Matched(WellKnownColumn { column, encoding })
}

/// Detect a single GeoJSON geometry column and check that a sample looks like a geometry.
pub fn geojson(
    columns: &ColumnSet,
    samples: &ColumnSamples,
    definition: &GeographyDefinition,
) -> Detection<ColumnRef> {
    let found = alias_columns(&[definition], columns);
    let column = match found.as_slice() {
        [single] => single.clone(),
        _ => return Detection::NoMatch,
    };

    let Some(sample) = samples.first_non_null(column.index) else {
        return Detection::Matched(column);
    };
    let text = sample.as_text().unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(obj))
            if obj.contains_key("type")
                && (obj.contains_key("coordinates") || obj.contains_key("geometries")) =>
        {
            Detection::Matched(column)
        }
        Ok(_) => Detection::InvalidContent {
            column,
            reason: "sample is JSON but not a geometry object (needs 'type' and 'coordinates' or 'geometries')"
                .to_string(),
        },
        Err(e) => Detection::InvalidContent {
            column,
            reason: format!("sample is not valid JSON: {e}"),
        },
    }
}

/// Strip an EWKT `SRID=n;` prefix, returning the SRID text and the remainder.
pub(crate) fn split_srid(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim();
    let has_prefix = trimmed
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("SRID="));
    if has_prefix {
        if let Some((srid, rest)) = trimmed[5..].split_once(';') {
            return (Some(srid.trim()), rest.trim_start());
        }
    }
    (None, trimmed)
}

pub(crate) fn looks_like_wkt(text: &str) -> bool {
    let (_, body) = split_srid(text);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    WKT_KEYWORDS.contains(&keyword.as_str())
}

/// Remove a `\x` (PostgreSQL bytea) or `0x` prefix from hex text.
pub(crate) fn strip_hex_prefix(text: &str) -> &str {
    let t = text.trim();
    t.strip_prefix("\\x")
        .or_else(|| t.strip_prefix("0x"))
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t)
}

pub(crate) fn looks_like_hex_wkb(text: &str) -> bool {
    let hex = strip_hex_prefix(text);
    // byte order + 4-byte type at minimum
    hex.len() >= 10
        && hex.len() % 2 == 0
        && hex.bytes().all(|b| b.is_ascii_hexdigit())
        && (hex.starts_with("00") || hex.starts_with("01"))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
