//! Multi-row INSERT write path.

use arrow::record_batch::RecordBatch;
use conveyor_types::error::ConnectorError;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnection};
use sqlx::query::Query;

use super::classify;
use super::ddl::{quote, quoted_table};
use super::encode::{bind_value, bindable_columns, BindValue};
use crate::connector::identifier::TableRef;

/// Prepared-statement placeholder limit of the MySQL protocol.
const MAX_PLACEHOLDERS: usize = 65_535;
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

/// Rows per INSERT statement for a table `num_columns` wide.
pub(crate) fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_PLACEHOLDERS / num_columns.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
}

/// `INSERT ... VALUES (?, ?), (?, ?)` for `rows` rows of `columns` names.
pub(crate) fn insert_sql(target: &TableRef, columns: &[&str], rows: usize) -> String {
    let col_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({col_list}) VALUES {}",
        quoted_table(target),
        vec![row.as_str(); rows].join(", ")
    )
}

fn bind<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: BindValue<'q>,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Boolean(v) => query.bind(v),
        BindValue::Int(v) => query.bind(v),
        BindValue::UInt(v) => query.bind(v),
        BindValue::Double(v) => query.bind(v),
        BindValue::Text(v) => query.bind(v),
        BindValue::Bytes(v) => query.bind(v),
        BindValue::Date(v) => query.bind(v),
        BindValue::DateTime(v) => query.bind(v),
    }
}

/// Insert every row of `batch` into `target` and return rows written.
pub(crate) async fn insert_batch(
    conn: &mut MySqlConnection,
    target: &TableRef,
    batch: &RecordBatch,
) -> Result<u64, ConnectorError> {
    let num_rows = batch.num_rows();
    if num_rows == 0 {
        return Ok(0);
    }

    let columns = bindable_columns(batch)?;
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let chunk = rows_per_statement(columns.len());

    for chunk_start in (0..num_rows).step_by(chunk) {
        let chunk_end = (chunk_start + chunk).min(num_rows);
        let sql = insert_sql(target, &names, chunk_end - chunk_start);
        let mut query = sqlx::query(&sql);
        for row in chunk_start..chunk_end {
            for col in &columns {
                query = bind(query, bind_value(col, row));
            }
        }
        query.execute(&mut *conn).await.map_err(|e| {
            classify(
                &e,
                &format!(
                    "insert into {} failed for rows {chunk_start}-{chunk_end}",
                    quoted_table(target)
                ),
            )
        })?;
    }

    Ok(num_rows as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_tables_get_fewer_rows_per_statement() {
        assert_eq!(rows_per_statement(1), 1_000);
        assert_eq!(rows_per_statement(100), 655);
        assert_eq!(rows_per_statement(100_000), 1);
        assert_eq!(rows_per_statement(0), 1_000);
    }

    #[test]
    fn builds_placeholder_rows() {
        let target = TableRef::parse("t").unwrap();
        assert_eq!(
            insert_sql(&target, &["a", "b"], 2),
            "INSERT INTO `t` (`a`, `b`) VALUES (?, ?), (?, ?)"
        );
    }
}
