//! `SQLite` connector.
//!
//! `SQLite` is dynamically typed, so extract resolves each column's Arrow
//! type from its declared type when that is recognizable and from the
//! stored values otherwise. Loads write dates and timestamps as ISO-8601
//! text.

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use conveyor_types::connector::UpdateMode;
use conveyor_types::error::ConnectorError;
use pg_escape::quote_identifier;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use serde::Deserialize;

use super::identifier::{validate_identifier, TableRef};
use super::{parse_params, RelationalExtractParams, RelationalLoadParams, TabularConnector};
use crate::codec::Table;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Path of an existing database file.
    pub database: PathBuf,
}

pub struct SqliteConnector {
    config: SqliteConfig,
    conn: Option<Connection>,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(config: SqliteConfig) -> Self {
        Self { config, conn: None }
    }

    fn conn(&mut self) -> Result<&mut Connection, ConnectorError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                let conn = Connection::open_with_flags(&self.config.database, flags).map_err(|e| {
                    classify(
                        &e,
                        &format!("failed to open {}", self.config.database.display()),
                    )
                })?;
                tracing::debug!(database = %self.config.database.display(), "Opened SQLite database");
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }
}

fn classify(err: &rusqlite::Error, context: &str) -> ConnectorError {
    let message = format!("{context}: {err}");
    match err.sqlite_error_code() {
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => {
            ConnectorError::config("CANNOT_OPEN", message)
        }
        Some(
            ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied,
        ) => ConnectorError::permission("PERMISSION_DENIED", message),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            ConnectorError::transient_db("DATABASE_BUSY", message)
        }
        Some(ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig) => {
            ConnectorError::data("DATA_REJECTED", message)
        }
        Some(ErrorCode::Unknown) => ConnectorError::config("INVALID_STATEMENT", message),
        Some(_) => ConnectorError::internal("SQLITE_ERROR", message),
        None => ConnectorError::internal("SQLITE_ERROR", message),
    }
}

/// Arrow type named by a declared column type, if recognizable.
fn declared_type(decl: &str) -> Option<DataType> {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("BOOL") {
        Some(DataType::Boolean)
    } else if decl.contains("INT") {
        Some(DataType::Int64)
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        Some(DataType::Float64)
    } else if decl.contains("BLOB") {
        Some(DataType::Binary)
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        Some(DataType::Utf8)
    } else {
        None
    }
}

/// Arrow type that holds every value in `values`.
fn inferred_type<'a>(values: impl Iterator<Item = &'a Value>) -> DataType {
    let mut seen: Option<DataType> = None;
    for value in values {
        let dt = match value {
            Value::Null => continue,
            Value::Integer(_) => DataType::Int64,
            Value::Real(_) => DataType::Float64,
            Value::Text(_) => DataType::Utf8,
            Value::Blob(_) => DataType::Binary,
        };
        seen = Some(match seen {
            None => dt,
            Some(prev) if prev == dt => prev,
            Some(DataType::Int64 | DataType::Float64) if dt == DataType::Int64 || dt == DataType::Float64 => {
                DataType::Float64
            }
            Some(_) => DataType::Utf8,
        });
    }
    seen.unwrap_or(DataType::Utf8)
}

fn mismatch(column: &str, expected: &DataType, value: &Value) -> ConnectorError {
    ConnectorError::data(
        "TYPE_MISMATCH",
        format!(
            "column '{column}' is {expected} but holds a {:?} value",
            value.data_type()
        ),
    )
}

fn build_array(
    column: &str,
    dt: &DataType,
    rows: &[Vec<Value>],
    idx: usize,
) -> Result<ArrayRef, ConnectorError> {
    let values = rows.iter().map(|row| &row[idx]);
    let array: ArrayRef = match dt {
        DataType::Int64 => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Integer(i) => Ok(Some(*i)),
                    other => Err(mismatch(column, dt, other)),
                })
                .collect::<Result<Int64Array, _>>()?,
        ),
        DataType::Float64 => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    #[allow(clippy::cast_precision_loss)]
                    Value::Integer(i) => Ok(Some(*i as f64)),
                    Value::Real(f) => Ok(Some(*f)),
                    other => Err(mismatch(column, dt, other)),
                })
                .collect::<Result<Float64Array, _>>()?,
        ),
        DataType::Boolean => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Integer(i) => Ok(Some(*i != 0)),
                    other => Err(mismatch(column, dt, other)),
                })
                .collect::<Result<BooleanArray, _>>()?,
        ),
        DataType::Binary => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Blob(b) => Ok(Some(b.as_slice())),
                    Value::Text(s) => Ok(Some(s.as_bytes())),
                    other => Err(mismatch(column, dt, other)),
                })
                .collect::<Result<BinaryArray, _>>()?,
        ),
        _ => Arc::new(
            values
                .map(|v| match v {
                    Value::Null => None,
                    Value::Integer(i) => Some(i.to_string()),
                    Value::Real(f) => Some(f.to_string()),
                    Value::Text(s) => Some(s.clone()),
                    Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
                })
                .collect::<StringArray>(),
        ),
    };
    Ok(array)
}

/// `SQLite` declared type for an Arrow type, plus the Arrow type values are
/// cast to before binding.
fn sqlite_column_type(dt: &DataType) -> Result<(&'static str, DataType), ConnectorError> {
    let mapped = match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ("INTEGER", DataType::Int64),
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => ("REAL", DataType::Float64),
        DataType::Boolean => ("BOOLEAN", DataType::Boolean),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
            ("TEXT", DataType::Utf8)
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            ("BLOB", DataType::Binary)
        }
        DataType::Date32 | DataType::Date64 => ("DATE", DataType::Utf8),
        DataType::Timestamp(_, _) => ("TIMESTAMP", DataType::Utf8),
        other => {
            return Err(ConnectorError::schema(
                "UNSUPPORTED_TYPE",
                format!("cannot load arrow type {other} into SQLite"),
            ))
        }
    };
    Ok(mapped)
}

fn create_table_sql(
    target: &TableRef,
    schema: &Schema,
    if_not_exists: bool,
) -> Result<String, ConnectorError> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            validate_identifier(field.name())?;
            let (decl, _) = sqlite_column_type(field.data_type())?;
            Ok(format!("{} {decl}", quote_identifier(field.name())))
        })
        .collect::<Result<Vec<_>, ConnectorError>>()?;
    if columns.is_empty() {
        return Err(ConnectorError::schema(
            "EMPTY_SCHEMA",
            "cannot create a table with no columns",
        ));
    }
    Ok(format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        target.quoted(),
        columns.join(", ")
    ))
}

fn bindable_columns(batch: &RecordBatch) -> Result<Vec<ArrayRef>, ConnectorError> {
    let options = CastOptions {
        safe: false,
        ..CastOptions::default()
    };
    batch
        .columns()
        .iter()
        .zip(batch.schema().fields())
        .map(|(col, field)| {
            let (_, target) = sqlite_column_type(field.data_type())?;
            cast_with_options(col, &target, &options).map_err(|e| {
                ConnectorError::data("CAST_FAILED", format!("column '{}': {e}", field.name()))
            })
        })
        .collect()
}

fn sqlite_value(col: &ArrayRef, row: usize) -> Value {
    if col.is_null(row) {
        return Value::Null;
    }
    match col.data_type() {
        DataType::Int64 => Value::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float64 => Value::Real(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => Value::Integer(i64::from(col.as_boolean().value(row))),
        DataType::Utf8 => Value::Text(col.as_string::<i32>().value(row).to_string()),
        DataType::Binary => Value::Blob(col.as_binary::<i32>().value(row).to_vec()),
        _ => Value::Null,
    }
}

fn table_exists(conn: &Connection, target: &TableRef) -> Result<bool, ConnectorError> {
    let master = match &target.schema {
        Some(schema) => format!("{}.sqlite_master", quote_identifier(schema)),
        None => "sqlite_master".to_string(),
    };
    conn.query_row(
        &format!("SELECT EXISTS (SELECT 1 FROM {master} WHERE type = 'table' AND name = ?1)"),
        [&target.table],
        |row| row.get(0),
    )
    .map_err(|e| classify(&e, "table existence check failed"))
}

#[async_trait]
impl TabularConnector for SqliteConnector {
    async fn authenticate(&mut self) -> Result<(), ConnectorError> {
        let conn = self.conn()?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| classify(&e, "connection test failed"))?;
        Ok(())
    }

    async fn extract(&mut self, params: &serde_json::Value) -> Result<Table, ConnectorError> {
        let params: RelationalExtractParams = parse_params(params)?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&params.query)
            .map_err(|e| classify(&e, "failed to prepare extract query"))?;

        let columns: Vec<(String, Option<DataType>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().and_then(declared_type)))
            .collect();
        let width = columns.len();

        let rows = stmt
            .query_map([], |row| {
                (0..width).map(|i| row.get::<_, Value>(i)).collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| classify(&e, "extract query failed"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify(&e, "failed to read extract rows"))?;

        let mut fields = Vec::with_capacity(width);
        let mut arrays = Vec::with_capacity(width);
        for (idx, (name, declared)) in columns.iter().enumerate() {
            let dt = declared
                .clone()
                .unwrap_or_else(|| inferred_type(rows.iter().map(|row| &row[idx])));
            arrays.push(build_array(name, &dt, &rows, idx)?);
            fields.push(Field::new(name, dt, true));
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .map_err(|e| ConnectorError::internal("BATCH_BUILD_FAILED", e.to_string()))?;
        tracing::info!(rows = batch.num_rows(), "Extracted rows");
        Ok(Table::from_batch(batch))
    }

    async fn load(
        &mut self,
        params: &serde_json::Value,
        table: &Table,
    ) -> Result<(), ConnectorError> {
        let params: RelationalLoadParams = parse_params(params)?;
        let target = TableRef::parse(&params.table)?;
        let quoted = target.quoted();
        let create_sql = |if_not_exists| create_table_sql(&target, table.schema(), if_not_exists);

        let conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| classify(&e, "failed to begin transaction"))?;

        match params.update_mode {
            UpdateMode::Replace => {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {quoted}; {};", create_sql(false)?))
                    .map_err(|e| classify(&e, &format!("failed to recreate {quoted}")))?;
            }
            UpdateMode::Append => {
                tx.execute_batch(&create_sql(true)?)
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
            UpdateMode::Fail => {
                if table_exists(&tx, &target)? {
                    return Err(ConnectorError::config(
                        "TABLE_EXISTS",
                        format!("table {quoted} already exists and update_mode is 'fail'"),
                    ));
                }
                tx.execute_batch(&create_sql(false)?)
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
        }

        let col_list = table
            .schema()
            .fields()
            .iter()
            .map(|f| quote_identifier(f.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=table.schema().fields().len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut written = 0usize;
        {
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {quoted} ({col_list}) VALUES ({placeholders})"))
                .map_err(|e| classify(&e, &format!("failed to prepare insert into {quoted}")))?;
            for batch in table.batches() {
                let columns = bindable_columns(batch)?;
                for row in 0..batch.num_rows() {
                    stmt.execute(params_from_iter(columns.iter().map(|c| sqlite_value(c, row))))
                        .map_err(|e| classify(&e, &format!("insert into {quoted} failed")))?;
                }
                written += batch.num_rows();
            }
        }
        tx.commit()
            .map_err(|e| classify(&e, "failed to commit load"))?;

        tracing::info!(table = %quoted, rows = written, mode = ?params.update_mode, "Loaded rows");
        Ok(())
    }

    async fn discover(&mut self) -> Result<Vec<String>, ConnectorError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| classify(&e, "discovery query failed"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| classify(&e, "discovery query failed"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify(&e, "discovery query failed"))?;
        Ok(names)
    }
}
