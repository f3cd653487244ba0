//! Multi-value INSERT write path.

use std::fmt::Write as _;

use arrow::record_batch::RecordBatch;
use conveyor_types::error::ConnectorError;
use pg_escape::quote_identifier;
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use super::classify;
use super::params::{bindable_columns, sql_param_value, SqlParamValue};
use crate::connector::identifier::TableRef;

/// Bind parameter limit of the Postgres wire protocol.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

/// Rows per INSERT statement for a table `num_columns` wide.
pub(crate) fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
}

/// Insert every row of `batch` into `target` and return rows written.
pub(crate) async fn insert_batch(
    tx: &Transaction<'_>,
    target: &TableRef,
    batch: &RecordBatch,
) -> Result<u64, ConnectorError> {
    let num_rows = batch.num_rows();
    if num_rows == 0 {
        return Ok(0);
    }

    let columns = bindable_columns(batch)?;
    let schema = batch.schema();
    let col_list = schema
        .fields()
        .iter()
        .map(|f| quote_identifier(f.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let header = format!("INSERT INTO {} ({col_list}) VALUES ", target.quoted());
    let chunk = rows_per_statement(columns.len());

    for chunk_start in (0..num_rows).step_by(chunk) {
        let chunk_end = (chunk_start + chunk).min(num_rows);
        let mut sql = String::with_capacity(header.len() + (chunk_end - chunk_start) * columns.len() * 6);
        sql.push_str(&header);

        let mut params: Vec<SqlParamValue<'_>> =
            Vec::with_capacity((chunk_end - chunk_start).saturating_mul(columns.len()));
        for row in chunk_start..chunk_end {
            if row > chunk_start {
                sql.push_str(", ");
            }
            sql.push('(');
            for (pos, col) in columns.iter().enumerate() {
                if pos > 0 {
                    sql.push_str(", ");
                }
                params.push(sql_param_value(col, row));
                let _ = write!(sql, "${}", params.len());
            }
            sql.push(')');
        }

        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(SqlParamValue::as_tosql).collect();
        tx.execute(&sql, &param_refs).await.map_err(|e| {
            classify(
                &e,
                &format!("insert into {} failed for rows {chunk_start}-{chunk_end}", target.quoted()),
            )
        })?;
    }

    Ok(num_rows as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_size_respects_param_limit() {
        assert_eq!(rows_per_statement(1), MAX_ROWS_PER_STATEMENT);
        assert_eq!(rows_per_statement(100), 655);
        assert_eq!(rows_per_statement(70_000), 1);
        assert_eq!(rows_per_statement(0), MAX_ROWS_PER_STATEMENT);
    }
}
