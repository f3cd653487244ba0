//! Arrow cells → typed Postgres bind parameters.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    TimestampMicrosecondType,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use conveyor_types::error::ConnectorError;
use tokio_postgres::types::ToSql;

use super::ddl::pg_column_type;

pub(crate) enum SqlParamValue<'a> {
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Boolean(Option<bool>),
    Text(Option<&'a str>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
    Bytes(Option<&'a [u8]>),
}

impl SqlParamValue<'_> {
    pub(crate) fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int16(v) => v,
            Self::Int32(v) => v,
            Self::Int64(v) => v,
            Self::Float32(v) => v,
            Self::Float64(v) => v,
            Self::Boolean(v) => v,
            Self::Text(v) => v,
            Self::Timestamp(v) => v,
            Self::TimestampTz(v) => v,
            Self::Date(v) => v,
            Self::Bytes(v) => v,
        }
    }
}

/// Cast every column of `batch` to the Arrow type its Postgres column binds.
///
/// Casts are checked: a value that does not fit (e.g. a `u64` above
/// `i64::MAX`) is an error rather than a silent null.
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
            let (_, target) = pg_column_type(field.data_type())?;
            if col.data_type() == &target {
                return Ok(col.clone());
            }
            cast_with_options(col, &target, &options).map_err(|e| {
                ConnectorError::data(
                    "CAST_FAILED",
                    format!("column '{}': {e}", field.name()),
                )
            })
        })
        .collect()
}

/// Bind value for one cell of a column returned by [`bindable_columns`].
pub(crate) fn sql_param_value(col: &ArrayRef, row: usize) -> SqlParamValue<'_> {
    let present = !col.is_null(row);
    match col.data_type() {
        DataType::Int16 => {
            SqlParamValue::Int16(present.then(|| col.as_primitive::<Int16Type>().value(row)))
        }
        DataType::Int32 => {
            SqlParamValue::Int32(present.then(|| col.as_primitive::<Int32Type>().value(row)))
        }
        DataType::Int64 => {
            SqlParamValue::Int64(present.then(|| col.as_primitive::<Int64Type>().value(row)))
        }
        DataType::Float32 => {
            SqlParamValue::Float32(present.then(|| col.as_primitive::<Float32Type>().value(row)))
        }
        DataType::Float64 => {
            SqlParamValue::Float64(present.then(|| col.as_primitive::<Float64Type>().value(row)))
        }
        DataType::Boolean => SqlParamValue::Boolean(present.then(|| col.as_boolean().value(row))),
        DataType::Utf8 => SqlParamValue::Text(present.then(|| col.as_string::<i32>().value(row))),
        DataType::Binary => SqlParamValue::Bytes(present.then(|| col.as_binary::<i32>().value(row))),
        DataType::Date32 => SqlParamValue::Date(if present {
            col.as_primitive::<Date32Type>().value_as_date(row)
        } else {
            None
        }),
        DataType::Timestamp(_, tz) => {
            let naive = if present {
                col.as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(row)
            } else {
                None
            };
            if tz.is_some() {
                SqlParamValue::TimestampTz(naive.map(|ts| ts.and_utc()))
            } else {
                SqlParamValue::Timestamp(naive)
            }
        }
        _ => SqlParamValue::Text(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int8Array, StringArray, UInt64Array};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    #[test]
    fn casts_narrow_ints_to_smallint() {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int8, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int8Array::from(vec![Some(7), None]))],
        )
        .unwrap();
        let cols = bindable_columns(&batch).unwrap();
        assert_eq!(cols[0].data_type(), &DataType::Int16);
        assert!(matches!(sql_param_value(&cols[0], 0), SqlParamValue::Int16(Some(7))));
        assert!(matches!(sql_param_value(&cols[0], 1), SqlParamValue::Int16(None)));
    }

    #[test]
    fn overflowing_u64_is_an_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::UInt64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(UInt64Array::from(vec![u64::MAX]))])
            .unwrap();
        let err = bindable_columns(&batch).unwrap_err();
        assert_eq!(err.code, "CAST_FAILED");
    }

    #[test]
    fn text_cells_borrow_from_array() {
        let col: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        assert!(matches!(sql_param_value(&col, 0), SqlParamValue::Text(Some("a"))));
        assert!(matches!(sql_param_value(&col, 1), SqlParamValue::Text(None)));
    }
}
