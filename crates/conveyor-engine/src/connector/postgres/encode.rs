//! Postgres result rows → Arrow record batches.

use std::error::Error;
use std::fmt::Write as _;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Date32Type, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use conveyor_types::error::ConnectorError;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Column, Row};

/// Arrow type used for a Postgres column type, if supported.
pub(crate) fn arrow_type_for(pg: &Type) -> Option<DataType> {
    let dt = match *pg {
        Type::INT2 => DataType::Int16,
        Type::INT4 => DataType::Int32,
        Type::INT8 => DataType::Int64,
        Type::FLOAT4 => DataType::Float32,
        Type::FLOAT8 | Type::NUMERIC => DataType::Float64,
        Type::BOOL => DataType::Boolean,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => DataType::Utf8,
        Type::JSON | Type::JSONB | Type::UUID | Type::TIME => DataType::Utf8,
        Type::TIMESTAMP => DataType::Timestamp(TimeUnit::Microsecond, None),
        Type::TIMESTAMPTZ => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        Type::DATE => DataType::Date32,
        Type::BYTEA => DataType::Binary,
        _ => return None,
    };
    Some(dt)
}

/// Arrow schema for a prepared statement's result columns.
pub(crate) fn build_arrow_schema(columns: &[Column]) -> Result<SchemaRef, ConnectorError> {
    let fields = columns
        .iter()
        .map(|col| {
            arrow_type_for(col.type_())
                .map(|dt| Field::new(col.name(), dt, true))
                .ok_or_else(|| {
                    ConnectorError::schema(
                        "UNSUPPORTED_TYPE",
                        format!(
                            "column '{}' has unsupported type {}; cast it in the query (e.g. ::float8 or ::text)",
                            col.name(),
                            col.type_()
                        ),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// NUMERIC decoded to the nearest `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PgNumeric(f64);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        parse_numeric(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn numeric_word(raw: &[u8], offset: usize) -> Result<u16, Box<dyn Error + Sync + Send>> {
    raw.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated NUMERIC value".into())
}

/// Binary NUMERIC layout: ndigits, weight, sign, dscale, then `ndigits`
/// base-10000 digits, all big-endian 16-bit.
fn parse_numeric(raw: &[u8]) -> Result<f64, Box<dyn Error + Sync + Send>> {
    let ndigits = usize::from(numeric_word(raw, 0)?);
    let weight = i32::from(numeric_word(raw, 2)? as i16);
    let sign = numeric_word(raw, 4)?;
    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Ok(f64::NAN),
        0xD000 => return Ok(f64::INFINITY),
        0xF000 => return Ok(f64::NEG_INFINITY),
        other => return Err(format!("invalid NUMERIC sign 0x{other:04X}").into()),
    }

    let mut text = String::with_capacity(ndigits * 4 + 8);
    if sign == 0x4000 {
        text.push('-');
    }
    text.push('0');
    for i in 0..ndigits {
        let digit = numeric_word(raw, 8 + i * 2)?;
        let _ = write!(text, "{digit:04}");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let exponent = (weight + 1 - ndigits as i32) * 4;
    let _ = write!(text, "e{exponent}");
    Ok(text.parse::<f64>()?)
}

fn column<'a, T: FromSql<'a>>(rows: &'a [Row], idx: usize) -> Result<Vec<Option<T>>, ConnectorError> {
    rows.iter()
        .map(|row| {
            row.try_get::<_, Option<T>>(idx).map_err(|e| {
                ConnectorError::data("DECODE_FAILED", format!("column {idx}: {e}"))
            })
        })
        .collect()
}

/// Encode `rows` using `schema`, which came from [`build_arrow_schema`]
/// over the same statement; `pg_types` are that statement's column types.
pub(crate) fn rows_to_record_batch(
    rows: &[Row],
    schema: &SchemaRef,
    pg_types: &[Type],
) -> Result<RecordBatch, ConnectorError> {
    let arrays = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| -> Result<ArrayRef, ConnectorError> {
            let array: ArrayRef = match field.data_type() {
                DataType::Int16 => Arc::new(Int16Array::from(column::<i16>(rows, idx)?)),
                DataType::Int32 => Arc::new(Int32Array::from(column::<i32>(rows, idx)?)),
                DataType::Int64 => Arc::new(Int64Array::from(column::<i64>(rows, idx)?)),
                DataType::Float32 => Arc::new(Float32Array::from(column::<f32>(rows, idx)?)),
                DataType::Float64 if pg_types[idx] == Type::NUMERIC => {
                    let values = column::<PgNumeric>(rows, idx)?;
                    Arc::new(Float64Array::from(
                        values.into_iter().map(|v| v.map(|n| n.0)).collect::<Vec<_>>(),
                    ))
                }
                DataType::Float64 => Arc::new(Float64Array::from(column::<f64>(rows, idx)?)),
                DataType::Boolean => Arc::new(BooleanArray::from(column::<bool>(rows, idx)?)),
                DataType::Utf8 if matches!(pg_types[idx], Type::JSON | Type::JSONB) => {
                    let values = column::<serde_json::Value>(rows, idx)?;
                    Arc::new(StringArray::from_iter(
                        values.into_iter().map(|v| v.map(|v| v.to_string())),
                    ))
                }
                DataType::Utf8 if pg_types[idx] == Type::UUID => {
                    let values = column::<uuid::Uuid>(rows, idx)?;
                    Arc::new(StringArray::from_iter(
                        values.into_iter().map(|v| v.map(|id| id.to_string())),
                    ))
                }
                DataType::Utf8 if pg_types[idx] == Type::TIME => {
                    let values = column::<NaiveTime>(rows, idx)?;
                    Arc::new(StringArray::from_iter(
                        values.into_iter().map(|v| v.map(|t| t.to_string())),
                    ))
                }
                DataType::Utf8 => Arc::new(StringArray::from(column::<String>(rows, idx)?)),
                DataType::Timestamp(_, None) => {
                    let values = column::<NaiveDateTime>(rows, idx)?;
                    Arc::new(TimestampMicrosecondArray::from(
                        values
                            .into_iter()
                            .map(|v| v.map(|ts| ts.and_utc().timestamp_micros()))
                            .collect::<Vec<_>>(),
                    ))
                }
                DataType::Timestamp(_, Some(_)) => {
                    let values = column::<DateTime<Utc>>(rows, idx)?;
                    Arc::new(
                        TimestampMicrosecondArray::from(
                            values
                                .into_iter()
                                .map(|v| v.map(|ts| ts.timestamp_micros()))
                                .collect::<Vec<_>>(),
                        )
                        .with_timezone("UTC"),
                    )
                }
                DataType::Date32 => {
                    let values = column::<NaiveDate>(rows, idx)?;
                    Arc::new(Date32Array::from(
                        values
                            .into_iter()
                            .map(|v| v.map(Date32Type::from_naive_date))
                            .collect::<Vec<_>>(),
                    ))
                }
                DataType::Binary => {
                    let values = column::<Vec<u8>>(rows, idx)?;
                    Arc::new(values.iter().map(|v| v.as_deref()).collect::<BinaryArray>())
                }
                other => {
                    return Err(ConnectorError::schema(
                        "UNSUPPORTED_TYPE",
                        format!("no encoder for arrow type {other}"),
                    ))
                }
            };
            Ok(array)
        })
        .collect::<Result<Vec<_>, _>>()?;

    RecordBatch::try_new(Arc::clone(schema), arrays)
        .map_err(|e| ConnectorError::internal("BATCH_BUILD_FAILED", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_types() {
        assert_eq!(arrow_type_for(&Type::INT8), Some(DataType::Int64));
        assert_eq!(arrow_type_for(&Type::VARCHAR), Some(DataType::Utf8));
        assert_eq!(arrow_type_for(&Type::JSONB), Some(DataType::Utf8));
        assert_eq!(
            arrow_type_for(&Type::TIMESTAMPTZ),
            Some(DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())))
        );
    }

    #[test]
    fn numeric_uuid_and_time_are_mapped() {
        assert_eq!(arrow_type_for(&Type::NUMERIC), Some(DataType::Float64));
        assert_eq!(arrow_type_for(&Type::UUID), Some(DataType::Utf8));
        assert_eq!(arrow_type_for(&Type::TIME), Some(DataType::Utf8));
        assert_eq!(arrow_type_for(&Type::INTERVAL), None);
    }

    fn numeric_bytes(weight: i16, sign: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&0u16.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn decodes_binary_numeric() {
        let decode = |raw: Vec<u8>| PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap().0;
        assert!((decode(numeric_bytes(0, 0, &[123, 4500])) - 123.45).abs() < 1e-9);
        assert!((decode(numeric_bytes(0, 0x4000, &[7])) + 7.0).abs() < 1e-9);
        assert!((decode(numeric_bytes(1, 0, &[1, 0])) - 10_000.0).abs() < 1e-9);
        assert!((decode(numeric_bytes(-1, 0, &[50])) - 0.005).abs() < 1e-12);
        assert_eq!(decode(numeric_bytes(0, 0, &[])), 0.0);
        assert!(decode(numeric_bytes(0, 0xC000, &[])).is_nan());
    }

    #[test]
    fn truncated_numeric_is_an_error() {
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &[0, 2, 0, 0]).is_err());
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &numeric_bytes(0, 0, &[1])[..9]).is_err());
    }

    #[test]
    fn empty_result_builds_empty_batch() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = rows_to_record_batch(&[], &schema, &[Type::INT8, Type::TEXT]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }
}
