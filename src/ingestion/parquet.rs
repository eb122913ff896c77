//! Parquet row source.

use std::fs::File;
use std::path::Path;

use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field;

use crate::error::IngestionResult;
use crate::types::Value;

use super::source::{RowSource, Sheet};

/// A Parquet file exposed as a single-sheet [`RowSource`].
///
/// Notes:
/// - Headers are the top-level schema fields, in schema order
/// - Rows are read through the Parquet record API (`RowIter`), one row at a time
/// - `BYTE_ARRAY` columns without a string annotation become [`Value::Binary`], so WKB stored as
///   raw bytes reaches the well-known detector untouched
pub struct ParquetSource {
    name: String,
    reader: SerializedFileReader<File>,
}

impl ParquetSource {
    pub fn from_path(path: impl AsRef<Path>) -> IngestionResult<Self> {
        let path = path.as_ref();
        let reader = SerializedFileReader::try_from(path)?;
        Ok(Self {
            name: super::unified::file_stem(path),
            reader,
        })
    }
}

impl RowSource for ParquetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>> {
        let Self { name, reader } = *self;
        let headers: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        let columns = headers.clone();
        let rows = reader.into_iter().map(move |row_res| -> IngestionResult<Vec<Value>> {
            let row = row_res?;
            let mut out = vec![Value::Null; columns.len()];
            for (col_name, field) in row.get_column_iter() {
                if let Some(idx) = columns.iter().position(|c| c == col_name) {
                    out[idx] = convert_parquet_field(field);
                }
            }
            Ok(out)
        });
        Ok(vec![Sheet::new(name, headers, Box::new(rows))])
    }
}

fn convert_parquet_field(f: &Field) -> Value {
    match f {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(v) => Value::Int64(i64::from(*v)),
        Field::Short(v) => Value::Int64(i64::from(*v)),
        Field::Int(v) => Value::Int64(i64::from(*v)),
        Field::Long(v) => Value::Int64(*v),
        Field::UByte(v) => Value::Int64(i64::from(*v)),
        Field::UShort(v) => Value::Int64(i64::from(*v)),
        Field::UInt(v) => Value::Int64(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(*v as f64)),
        Field::Float(v) => Value::Float64(f64::from(*v)),
        Field::Double(v) => Value::Float64(*v),
        Field::Str(s) => Value::from_text(s),
        Field::Bytes(b) => Value::Binary(b.data().to_vec()),
        other => Value::Utf8(other.to_string()),
    }
}
