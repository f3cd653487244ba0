//! MySQL result rows → Arrow record batches, and Arrow cells → bind values.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Float32Array,
    Float64Array, Int64Array, StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Date32Type, Field, Float64Type, Int64Type, Schema, SchemaRef, TimeUnit,
    TimestampMicrosecondType, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use conveyor_types::error::ConnectorError;
use sqlx::mysql::{MySql, MySqlRow};
use sqlx::Row;

use super::ddl::mysql_column_type;

/// How a result column is read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Boolean,
    Int,
    UInt,
    Float,
    Double,
    /// DECIMAL arrives as text and is parsed to `f64`.
    Decimal,
    Text,
    Bytes,
    Date,
    DateTime,
    Timestamp,
    Time,
}

impl ColumnKind {
    /// Classify a MySQL type name as reported by the driver
    /// (e.g. `INT UNSIGNED`, `VARCHAR`, `DATETIME`).
    pub(crate) fn from_type_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let unsigned = upper.ends_with(" UNSIGNED");
        let base = upper.trim_end_matches(" UNSIGNED");
        let kind = match base {
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
                if unsigned {
                    Self::UInt
                } else {
                    Self::Int
                }
            }
            "FLOAT" => Self::Float,
            "DOUBLE" | "REAL" => Self::Double,
            "DECIMAL" | "NUMERIC" => Self::Decimal,
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
            | "SET" | "JSON" | "NULL" => Self::Text,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
                Self::Bytes
            }
            "DATE" => Self::Date,
            "DATETIME" => Self::DateTime,
            "TIMESTAMP" => Self::Timestamp,
            "TIME" => Self::Time,
            _ => return None,
        };
        Some(kind)
    }

    pub(crate) fn arrow_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int => DataType::Int64,
            Self::UInt => DataType::UInt64,
            Self::Float => DataType::Float32,
            Self::Double | Self::Decimal => DataType::Float64,
            Self::Text | Self::Time => DataType::Utf8,
            Self::Bytes => DataType::Binary,
            Self::Date => DataType::Date32,
            Self::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        }
    }
}

/// Column kinds and Arrow schema for `(name, type name)` result columns.
pub(crate) fn build_arrow_schema(
    columns: &[(String, String)],
) -> Result<(Vec<ColumnKind>, SchemaRef), ConnectorError> {
    let mut kinds = Vec::with_capacity(columns.len());
    let mut fields = Vec::with_capacity(columns.len());
    for (name, type_name) in columns {
        let kind = ColumnKind::from_type_name(type_name).ok_or_else(|| {
            ConnectorError::schema(
                "UNSUPPORTED_TYPE",
                format!(
                    "column '{name}' has unsupported type {type_name}; cast it in the query \
                     (e.g. CAST(... AS CHAR))"
                ),
            )
        })?;
        kinds.push(kind);
        fields.push(Field::new(name, kind.arrow_type(), true));
    }
    Ok((kinds, Arc::new(Schema::new(fields))))
}

pub(crate) fn parse_decimal(text: &str) -> Result<f64, ConnectorError> {
    text.trim().parse::<f64>().map_err(|e| {
        ConnectorError::data("DECODE_FAILED", format!("invalid DECIMAL value '{text}': {e}"))
    })
}

fn column<'r, T>(rows: &'r [MySqlRow], idx: usize) -> Result<Vec<Option<T>>, ConnectorError>
where
    T: sqlx::Decode<'r, MySql>,
{
    rows.iter()
        .map(|row| {
            row.try_get_unchecked::<Option<T>, _>(idx).map_err(|e| {
                ConnectorError::data("DECODE_FAILED", format!("column {idx}: {e}"))
            })
        })
        .collect()
}

/// Encode `rows` with the kinds and schema from [`build_arrow_schema`].
pub(crate) fn rows_to_record_batch(
    rows: &[MySqlRow],
    kinds: &[ColumnKind],
    schema: &SchemaRef,
) -> Result<RecordBatch, ConnectorError> {
    let arrays = kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| -> Result<ArrayRef, ConnectorError> {
            let array: ArrayRef = match kind {
                ColumnKind::Boolean => Arc::new(BooleanArray::from(column::<bool>(rows, idx)?)),
                ColumnKind::Int => Arc::new(Int64Array::from(column::<i64>(rows, idx)?)),
                ColumnKind::UInt => Arc::new(UInt64Array::from(column::<u64>(rows, idx)?)),
                ColumnKind::Float => Arc::new(Float32Array::from(column::<f32>(rows, idx)?)),
                ColumnKind::Double => Arc::new(Float64Array::from(column::<f64>(rows, idx)?)),
                ColumnKind::Decimal => {
                    let values = column::<String>(rows, idx)?
                        .into_iter()
                        .map(|v| v.as_deref().map(parse_decimal).transpose())
                        .collect::<Result<Vec<_>, _>>()?;
                    Arc::new(Float64Array::from(values))
                }
                ColumnKind::Text => Arc::new(StringArray::from(column::<String>(rows, idx)?)),
                ColumnKind::Time => {
                    let values = column::<NaiveTime>(rows, idx)?;
                    Arc::new(StringArray::from_iter(
                        values.into_iter().map(|v| v.map(|t| t.to_string())),
                    ))
                }
                ColumnKind::Bytes => {
                    let values = column::<Vec<u8>>(rows, idx)?;
                    Arc::new(values.iter().map(|v| v.as_deref()).collect::<BinaryArray>())
                }
                ColumnKind::Date => {
                    let values = column::<NaiveDate>(rows, idx)?;
                    Arc::new(Date32Array::from(
                        values
                            .into_iter()
                            .map(|v| v.map(Date32Type::from_naive_date))
                            .collect::<Vec<_>>(),
                    ))
                }
                ColumnKind::DateTime => {
                    let values = column::<NaiveDateTime>(rows, idx)?;
                    Arc::new(TimestampMicrosecondArray::from(
                        values
                            .into_iter()
                            .map(|v| v.map(|ts| ts.and_utc().timestamp_micros()))
                            .collect::<Vec<_>>(),
                    ))
                }
                ColumnKind::Timestamp => {
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
            };
            Ok(array)
        })
        .collect::<Result<Vec<_>, _>>()?;

    RecordBatch::try_new(Arc::clone(schema), arrays)
        .map_err(|e| ConnectorError::internal("BATCH_BUILD_FAILED", e.to_string()))
}

/// One cell bound into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue<'a> {
    Null,
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(&'a str),
    Bytes(&'a [u8]),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Cast every column of `batch` to the Arrow type its MySQL column binds.
pub(crate) fn bindable_columns(batch: &RecordBatch) -> Result<Vec<ArrayRef>, ConnectorError> {
    let options = CastOptions {
        safe: false,
        ..CastOptions::default()
    };
    batch
        .columns()
        .iter()
        .zip(batch.schema().fields())
        .map(|(col, field)| {
            let (_, target) = mysql_column_type(field.data_type())?;
            if col.data_type() == &target {
                return Ok(col.clone());
            }
            cast_with_options(col, &target, &options).map_err(|e| {
                ConnectorError::data("CAST_FAILED", format!("column '{}': {e}", field.name()))
            })
        })
        .collect()
}

/// Bind value for one cell of a column returned by [`bindable_columns`].
///
/// Zoned timestamps are written as their UTC wall-clock time.
pub(crate) fn bind_value(col: &ArrayRef, row: usize) -> BindValue<'_> {
    if col.is_null(row) {
        return BindValue::Null;
    }
    match col.data_type() {
        DataType::Boolean => BindValue::Boolean(col.as_boolean().value(row)),
        DataType::Int64 => BindValue::Int(col.as_primitive::<Int64Type>().value(row)),
        DataType::UInt64 => BindValue::UInt(col.as_primitive::<UInt64Type>().value(row)),
        DataType::Float64 => BindValue::Double(col.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => BindValue::Text(col.as_string::<i32>().value(row)),
        DataType::Binary => BindValue::Bytes(col.as_binary::<i32>().value(row)),
        DataType::Date32 => col
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map_or(BindValue::Null, BindValue::Date),
        DataType::Timestamp(_, _) => col
            .as_primitive::<TimestampMicrosecondType>()
            .value_as_datetime(row)
            .map_or(BindValue::Null, BindValue::DateTime),
        _ => BindValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int8Array, StringArray, UInt64Array};

    #[test]
    fn classifies_driver_type_names() {
        assert_eq!(ColumnKind::from_type_name("INT"), Some(ColumnKind::Int));
        assert_eq!(ColumnKind::from_type_name("BIGINT UNSIGNED"), Some(ColumnKind::UInt));
        assert_eq!(ColumnKind::from_type_name("varchar"), Some(ColumnKind::Text));
        assert_eq!(ColumnKind::from_type_name("DECIMAL"), Some(ColumnKind::Decimal));
        assert_eq!(ColumnKind::from_type_name("TIMESTAMP"), Some(ColumnKind::Timestamp));
        assert_eq!(ColumnKind::from_type_name("GEOMETRY"), None);
    }

    #[test]
    fn schema_follows_column_kinds() {
        let columns = vec![
            ("id".to_string(), "BIGINT".to_string()),
            ("price".to_string(), "DECIMAL".to_string()),
            ("created".to_string(), "DATETIME".to_string()),
        ];
        let (kinds, schema) = build_arrow_schema(&columns).unwrap();
        assert_eq!(kinds, vec![ColumnKind::Int, ColumnKind::Decimal, ColumnKind::DateTime]);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(
            schema.field(2).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
    }

    #[test]
    fn unsupported_column_names_the_column() {
        let columns = vec![("shape".to_string(), "GEOMETRY".to_string())];
        let err = build_arrow_schema(&columns).unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_TYPE");
        assert!(err.message.contains("shape"));
    }

    #[test]
    fn parses_decimal_text() {
        assert!((parse_decimal("123.45").unwrap() - 123.45).abs() < 1e-9);
        assert!((parse_decimal("-0.500").unwrap() + 0.5).abs() < 1e-9);
        assert_eq!(parse_decimal("abc").unwrap_err().code, "DECODE_FAILED");
    }

    #[test]
    fn empty_result_builds_empty_batch() {
        let columns = vec![
            ("id".to_string(), "INT".to_string()),
            ("name".to_string(), "TEXT".to_string()),
        ];
        let (kinds, schema) = build_arrow_schema(&columns).unwrap();
        let batch = rows_to_record_batch(&[], &kinds, &schema).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }

    fn batch_of(field: Field, array: ArrayRef) -> RecordBatch {
        RecordBatch::try_new(Arc::new(Schema::new(vec![field])), vec![array]).unwrap()
    }

    #[test]
    fn narrow_ints_bind_as_i64() {
        let batch = batch_of(
            Field::new("n", DataType::Int8, true),
            Arc::new(Int8Array::from(vec![Some(7), None])),
        );
        let cols = bindable_columns(&batch).unwrap();
        assert_eq!(cols[0].data_type(), &DataType::Int64);
        assert_eq!(bind_value(&cols[0], 0), BindValue::Int(7));
        assert_eq!(bind_value(&cols[0], 1), BindValue::Null);
    }

    #[test]
    fn unsigned_keeps_full_range() {
        let batch = batch_of(
            Field::new("n", DataType::UInt64, false),
            Arc::new(UInt64Array::from(vec![u64::MAX])),
        );
        let cols = bindable_columns(&batch).unwrap();
        assert_eq!(bind_value(&cols[0], 0), BindValue::UInt(u64::MAX));
    }

    #[test]
    fn floats_widen_and_text_borrows() {
        let batch = batch_of(
            Field::new("f", DataType::Float32, true),
            Arc::new(Float32Array::from(vec![1.5])),
        );
        let cols = bindable_columns(&batch).unwrap();
        assert_eq!(bind_value(&cols[0], 0), BindValue::Double(1.5));

        let text: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        assert_eq!(bind_value(&text, 0), BindValue::Text("a"));
        assert_eq!(bind_value(&text, 1), BindValue::Null);
    }

    #[test]
    fn zoned_timestamps_bind_as_utc_wall_clock() {
        let array = TimestampMicrosecondArray::from(vec![1_000_000]).with_timezone("+02:00");
        let batch = batch_of(
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Microsecond, Some("+02:00".into())),
                true,
            ),
            Arc::new(array),
        );
        let cols = bindable_columns(&batch).unwrap();
        let expected = DateTime::from_timestamp(1, 0).unwrap().naive_utc();
        assert_eq!(bind_value(&cols[0], 0), BindValue::DateTime(expected));
    }
}
