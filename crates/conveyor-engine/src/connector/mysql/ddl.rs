//! Arrow → MySQL DDL and type mapping.

use std::fmt::Write as _;

use arrow::datatypes::{DataType, Schema, TimeUnit};
use conveyor_types::error::ConnectorError;

use crate::connector::identifier::{validate_identifier, TableRef};

/// MySQL column type for an Arrow type, plus the Arrow type values are
/// cast to before binding.
pub(crate) fn mysql_column_type(dt: &DataType) -> Result<(&'static str, DataType), ConnectorError> {
    let mapped = match dt {
        DataType::Boolean => ("BOOLEAN", DataType::Boolean),
        DataType::Int8 => ("TINYINT", DataType::Int64),
        DataType::Int16 | DataType::UInt8 => ("SMALLINT", DataType::Int64),
        DataType::Int32 | DataType::UInt16 => ("INT", DataType::Int64),
        DataType::Int64 | DataType::UInt32 => ("BIGINT", DataType::Int64),
        DataType::UInt64 => ("BIGINT UNSIGNED", DataType::UInt64),
        DataType::Float16 | DataType::Float32 => ("FLOAT", DataType::Float64),
        DataType::Float64 | DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => {
            ("DOUBLE", DataType::Float64)
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
            ("LONGTEXT", DataType::Utf8)
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            ("LONGBLOB", DataType::Binary)
        }
        DataType::Date32 | DataType::Date64 => ("DATE", DataType::Date32),
        DataType::Timestamp(_, tz) => (
            "DATETIME(6)",
            DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
        ),
        other => {
            return Err(ConnectorError::schema(
                "UNSUPPORTED_TYPE",
                format!("cannot load arrow type {other} into MySQL"),
            ))
        }
    };
    Ok(mapped)
}

/// Backtick-quote an identifier already accepted by `validate_identifier`.
pub(crate) fn quote(name: &str) -> String {
    format!("`{name}`")
}

pub(crate) fn quoted_table(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote(schema), quote(&table.table)),
        None => quote(&table.table),
    }
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
    sql.push_str(&quoted_table(table));
    sql.push_str(" (");
    for (i, field) in schema.fields().iter().enumerate() {
        validate_identifier(field.name())?;
        let (mysql_type, _) = mysql_column_type(field.data_type())?;
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {mysql_type}", quote(field.name()));
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
    fn maps_unsigned_and_text() {
        assert_eq!(mysql_column_type(&DataType::UInt64).unwrap().0, "BIGINT UNSIGNED");
        assert_eq!(mysql_column_type(&DataType::UInt32).unwrap().1, DataType::Int64);
        assert_eq!(mysql_column_type(&DataType::Utf8View).unwrap().0, "LONGTEXT");
        assert_eq!(mysql_column_type(&DataType::Decimal128(10, 2)).unwrap().0, "DOUBLE");
    }

    #[test]
    fn timestamps_keep_their_zone() {
        let (sql_type, target) = mysql_column_type(&DataType::Timestamp(
            TimeUnit::Millisecond,
            Some("UTC".into()),
        ))
        .unwrap();
        assert_eq!(sql_type, "DATETIME(6)");
        assert_eq!(
            target,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
    }

    #[test]
    fn rejects_nested_types() {
        let list = DataType::List(Field::new("item", DataType::Int32, true).into());
        assert_eq!(mysql_column_type(&list).unwrap_err().code, "UNSUPPORTED_TYPE");
    }

    #[test]
    fn builds_create_table_with_backticks() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("seen_at", DataType::Timestamp(TimeUnit::Second, None), true),
        ]);
        let table = TableRef::parse("shop.users").unwrap();
        assert_eq!(
            create_table_sql(&table, &schema, true).unwrap(),
            "CREATE TABLE IF NOT EXISTS `shop`.`users` \
             (`id` BIGINT NOT NULL, `name` LONGTEXT, `seen_at` DATETIME(6))"
        );
    }

    #[test]
    fn empty_schema_is_rejected() {
        let table = TableRef::parse("t").unwrap();
        let err = create_table_sql(&table, &Schema::empty(), false).unwrap_err();
        assert_eq!(err.code, "EMPTY_SCHEMA");
    }
}
