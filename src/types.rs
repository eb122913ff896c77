//! Core data model types shared by row sources, the matcher, and loaders.
//!
//! Rows travel through the crate as `Vec<Value>` aligned with the source header row. A
//! [`ColumnSet`] is the normalized view of that header row used for alias matching.

use std::borrow::Cow;
use std::fmt;

use crate::geometry::{CanonicalGeometry, GeometryFailure};

/// A single cell value read from a row source.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Raw bytes (e.g. a Parquet `BYTE_ARRAY` column holding WKB).
    Binary(Vec<u8>),
}

impl Value {
    /// Build a text value, mapping blank strings to [`Value::Null`].
    pub fn from_text(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Value::Null
        } else {
            Value::Utf8(raw.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual rendering of the value, or `None` for nulls and binary payloads.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null | Value::Binary(_) => None,
            Value::Utf8(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Int64(v) => Some(Cow::Owned(v.to_string())),
            Value::Float64(v) => Some(Cow::Owned(v.to_string())),
            Value::Bool(v) => Some(Cow::Owned(v.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Normalize a header or alias for matching.
///
/// Lower-cases and drops every non-alphanumeric character, so `"Lat Long"`, `"lat_long"` and
/// `"LAT-LONG"` all become `"latlong"`. Applying it twice yields the same result.
pub fn normalize_column_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A resolved reference to a source column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Header exactly as it appeared in the source.
    pub name: String,
    /// Position in the row.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnEntry {
    header: String,
    key: String,
}

/// Normalized set of column names derived from a header row.
///
/// Order follows the header row. If two headers normalize to the same key, lookups resolve to
/// the first one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnSet {
    entries: Vec<ColumnEntry>,
}

impl ColumnSet {
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = headers
            .into_iter()
            .map(|h| ColumnEntry {
                header: h.as_ref().trim().to_string(),
                key: normalize_column_name(h.as_ref()),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Original headers in source order.
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.header.as_str())
    }

    /// Normalized keys in source order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Find the column whose normalized key equals the normalized `alias`.
    pub fn find(&self, alias: &str) -> Option<ColumnRef> {
        let key = normalize_column_name(alias);
        if key.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .position(|e| e.key == key)
            .map(|index| ColumnRef {
                name: self.entries[index].header.clone(),
                index,
            })
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.find(alias).is_some()
    }
}

/// One source row ready for a loader.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based data row number (the header row is not counted).
    pub row: usize,
    /// Attribute values, aligned with [`crate::loader::TableSpec::columns`].
    pub values: Vec<Value>,
    /// Canonical geometry, absent for plain/join tables and for rows that failed.
    pub geometry: Option<CanonicalGeometry>,
}

/// A recovered, row-level geometry failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDiagnostic {
    /// 1-based data row number.
    pub row: usize,
    pub reason: GeometryFailure,
}

impl fmt::Display for RowDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.reason)
    }
}
