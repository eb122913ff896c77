//! JSON row source.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single JSON object (one row)
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! The header is the union of object keys in first-seen order. Nested objects and arrays are kept
//! as JSON text, so a `"geometry": {"type": "Point", ...}` member reaches the GeoJSON detector
//! unchanged.
//!
//! Object streams (a single object or NDJSON) are read twice: once for the header, once lazily
//! for the rows, so only one object is held at a time. A top-level array is parsed whole.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use crate::error::{IngestionError, IngestionResult};
use crate::types::Value;

use super::source::{RowSource, RowStream, Sheet};

#[derive(Debug, Clone)]
enum JsonInput {
    File(PathBuf),
    Text(String),
}

impl JsonInput {
    fn open(&self) -> IngestionResult<Box<dyn BufRead + Send>> {
        Ok(match self {
            Self::File(path) => Box::new(BufReader::new(File::open(path)?)),
            Self::Text(text) => Box::new(Cursor::new(text.clone())),
        })
    }
}

/// JSON file or text exposed as a single-sheet [`RowSource`].
#[derive(Debug, Clone)]
pub struct JsonSource {
    name: String,
    input: JsonInput,
}

impl JsonSource {
    /// Open `path` for reading; rows are decoded only when the sheet is consumed.
    pub fn from_path(path: impl AsRef<Path>) -> IngestionResult<Self> {
        let path = path.as_ref();
        // Fail on a missing file here rather than on the first sheet.
        File::open(path)?;
        Ok(Self {
            name: super::unified::file_stem(path),
            input: JsonInput::File(path.to_path_buf()),
        })
    }

    pub fn from_str(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: JsonInput::Text(text.into()),
        }
    }
}

impl RowSource for JsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>> {
        let mut reader = self.input.open()?;
        let (headers, rows): (Vec<String>, RowStream) = match first_token(&mut reader)? {
            None => {
                return Err(IngestionError::EmptySource {
                    message: "json input is empty".to_string(),
                });
            }
            Some(b'[') => {
                let items: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
                let objects = items
                    .into_iter()
                    .enumerate()
                    .map(|(idx0, v)| into_object(idx0, v))
                    .collect::<IngestionResult<Vec<_>>>()?;
                let mut union = HeaderUnion::default();
                objects.iter().for_each(|obj| union.add(obj));
                let headers = union.headers;
                let columns = headers.clone();
                let rows = objects
                    .into_iter()
                    .map(move |obj| -> IngestionResult<Vec<Value>> { Ok(row_of(&columns, &obj)) });
                (headers, Box::new(rows))
            }
            Some(b'{') => {
                let mut union = HeaderUnion::default();
                for obj in object_stream(reader) {
                    union.add(&obj?);
                }
                let headers = union.headers;
                let columns = headers.clone();
                let rows = object_stream(self.input.open()?)
                    .map(move |obj| -> IngestionResult<Vec<Value>> { Ok(row_of(&columns, &obj?)) });
                (headers, Box::new(rows))
            }
            Some(_) => {
                return Err(IngestionError::UnsupportedFormat {
                    message: "json must be an object, an array of objects, or NDJSON".to_string(),
                });
            }
        };
        Ok(vec![Sheet::new(self.name, headers, rows)])
    }
}

type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Peek the first non-whitespace byte without consuming it.
fn first_token(reader: &mut dyn BufRead) -> IngestionResult<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let token = buf[pos];
                reader.consume(pos);
                return Ok(Some(token));
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Whitespace-separated JSON objects, decoded one at a time.
fn object_stream(reader: Box<dyn BufRead + Send>) -> impl Iterator<Item = IngestionResult<JsonObject>> + Send {
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<serde_json::Value>()
        .enumerate()
        .map(|(idx0, v)| into_object(idx0, v?))
}

fn into_object(idx0: usize, value: serde_json::Value) -> IngestionResult<JsonObject> {
    match value {
        serde_json::Value::Object(obj) => Ok(obj),
        _ => Err(IngestionError::UnsupportedFormat {
            message: format!("row {} is not a json object", idx0 + 1),
        }),
    }
}

/// Union of object keys in first-seen order.
#[derive(Debug, Default)]
struct HeaderUnion {
    seen: HashSet<String>,
    headers: Vec<String>,
}

impl HeaderUnion {
    fn add(&mut self, obj: &JsonObject) {
        for key in obj.keys() {
            if self.seen.insert(key.clone()) {
                self.headers.push(key.clone());
            }
        }
    }
}

fn row_of(columns: &[String], obj: &JsonObject) -> Vec<Value> {
    columns
        .iter()
        .map(|c| obj.get(c).map(convert_json_value).unwrap_or(Value::Null))
        .collect()
}

fn convert_json_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::from_text(s),
        other => Value::Utf8(other.to_string()),
    }
}
