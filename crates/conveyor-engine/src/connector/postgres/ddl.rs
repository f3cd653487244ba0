//! Arrow → Postgres DDL and type mapping.

use std::fmt::Write as _;

use arrow::datatypes::{DataType, Schema, TimeUnit};
use conveyor_types::error::ConnectorError;
use pg_escape::quote_identifier;

use crate::connector::identifier::{validate_identifier, TableRef};

/// Postgres column type for an Arrow type, plus the Arrow type values are
/// cast to before binding.
pub(crate) fn pg_column_type(dt: &DataType) -> Result<(&'static str, DataType), ConnectorError> {
    let mapped = match dt {
        DataType::Int8 | DataType::UInt8 | DataType::Int16 => ("SMALLINT", DataType::Int16),
        DataType::UInt16 | DataType::Int32 => ("INTEGER", DataType::Int32),
        DataType::UInt32 | DataType::Int64 | DataType::UInt64 => ("BIGINT", DataType::Int64),
        DataType::Float16 | DataType::Float32 => ("REAL", DataType::Float32),
        DataType::Float64 | DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => {
            ("DOUBLE PRECISION", DataType::Float64)
        }
        DataType::Boolean => ("BOOLEAN", DataType::Boolean),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
            ("TEXT", DataType::Utf8)
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            ("BYTEA", DataType::Binary)
        }
        DataType::Date32 | DataType::Date64 => ("DATE", DataType::Date32),
        DataType::Timestamp(_, None) => (
            "TIMESTAMP",
            DataType::Timestamp(TimeUnit::Microsecond, None),
        ),
        DataType::Timestamp(_, Some(tz)) => (
            "TIMESTAMPTZ",
            DataType::Timestamp(TimeUnit::Microsecond, Some(tz.clone())),
        ),
        other => {
            return Err(ConnectorError::schema(
                "UNSUPPORTED_TYPE",
                format!("cannot load arrow type {other} into Postgres"),
            ))
        }
    };
    Ok(mapped)
}

/// `CREATE TABLE` statement for `schema`.
pub(crate) fn create_table_sql(
    table: &TableRef,
    schema: &Schema,
    if_not_exists: bool,
) -> Result<String, ConnectorError> {
    if schema.fields().is_empty() {
        return Err(ConnectorError::schema(
            "EMPTY_SCHEMA",
            "cannot create a table with no columns",
        ));
    }
    let mut sql = String::from("CREATE TABLE ");
    if if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&table.quoted());
    sql.push_str(" (");
    for (i, field) in schema.fields().iter().enumerate() {
        validate_identifier(field.name())?;
        let (pg_type, _) = pg_column_type(field.data_type())?;
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {}", quote_identifier(field.name()), pg_type);
        if !field.is_nullable() {
            sql.push_str(" NOT NULL");
        }
    }
    sql.push(')');
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Field;

    #[test]
    fn maps_integer_widths() {
        assert_eq!(pg_column_type(&DataType::UInt8).unwrap().0, "SMALLINT");
        assert_eq!(pg_column_type(&DataType::UInt32).unwrap().1, DataType::Int64);
        assert_eq!(pg_column_type(&DataType::Utf8View).unwrap().0, "TEXT");
    }

    #[test]
    fn rejects_nested_types() {
        let list = DataType::List(Field::new("item", DataType::Int32, true).into());
        assert!(pg_column_type(&list).is_err());
    }

    #[test]
    fn builds_create_table() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("seen_at", DataType::Timestamp(TimeUnit::Millisecond, None), true),
        ]);
        let table = TableRef::parse("public.users").unwrap();
        assert_eq!(
            create_table_sql(&table, &schema, true).unwrap(),
            "CREATE TABLE IF NOT EXISTS public.users (id BIGINT NOT NULL, name TEXT, seen_at TIMESTAMP)"
        );
    }

    #[test]
    fn rejects_unsafe_column_names() {
        let schema = Schema::new(vec![Field::new("bad name", DataType::Int64, true)]);
        let table = TableRef::parse("t").unwrap();
        assert!(create_table_sql(&table, &schema, false).is_err());
    }
}
