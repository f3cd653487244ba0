//! MySQL-protocol connector (MySQL, MariaDB).

mod ddl;
mod encode;
mod insert;

use std::time::Duration;

use async_trait::async_trait;
use conveyor_types::connector::UpdateMode;
use conveyor_types::error::ConnectorError;
use serde::Deserialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};

use super::identifier::TableRef;
use super::{parse_params, RelationalExtractParams, RelationalLoadParams, TabularConnector};
use crate::codec::Table;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 3306;

/// Connection settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

pub struct MySqlConnector {
    config: MySqlConfig,
    connection: Option<MySqlConnection>,
}

impl MySqlConnector {
    #[must_use]
    pub fn new(config: MySqlConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    fn port(&self) -> u16 {
        self.config.port.unwrap_or(DEFAULT_PORT)
    }

    async fn connection(&mut self) -> Result<&mut MySqlConnection, ConnectorError> {
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };
        Ok(self.connection.insert(conn))
    }

    async fn connect(&self) -> Result<MySqlConnection, ConnectorError> {
        let mut options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.port())
            .username(&self.config.username)
            .database(&self.config.database);
        if !self.config.password.is_empty() {
            options = options.password(&self.config.password);
        }

        let target = format!("{}:{}/{}", self.config.host, self.port(), self.config.database);
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| {
                ConnectorError::transient_network(
                    "CONNECTION_TIMEOUT",
                    format!("connection to {target} timed out after {CONNECT_TIMEOUT:?}"),
                )
            })?
            .map_err(|e| classify(&e, &format!("connection to {target} failed")))?;

        tracing::debug!(
            host = %self.config.host,
            database = %self.config.database,
            "Connected"
        );
        Ok(conn)
    }
}

/// Map a driver error onto the connector error taxonomy.
pub(crate) fn classify(err: &sqlx::Error, context: &str) -> ConnectorError {
    let message = format!("{context}: {err}");
    match err {
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(MySqlDatabaseError::number);
            classify_server_error(number, db.code().as_deref(), message)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            ConnectorError::transient_network("CONNECTION_FAILED", message)
        }
        sqlx::Error::Configuration(_) => ConnectorError::config("INVALID_CONFIG", message),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ConnectorError::data("DECODE_FAILED", message)
        }
        sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => {
            ConnectorError::schema("TYPE_MISMATCH", message)
        }
        _ => ConnectorError::internal("DRIVER_ERROR", message),
    }
}

/// Classify a server-reported error by MySQL error number, falling back to
/// the SQLSTATE class.
pub(crate) fn classify_server_error(
    number: Option<u16>,
    sqlstate: Option<&str>,
    message: String,
) -> ConnectorError {
    match number {
        Some(1045 | 1698) => return ConnectorError::auth("AUTH_FAILED", message),
        Some(1044 | 1142 | 1143 | 1227) => {
            return ConnectorError::permission("PERMISSION_DENIED", message)
        }
        Some(1049) => return ConnectorError::config("UNKNOWN_DATABASE", message),
        Some(1050 | 1054 | 1064 | 1146) => {
            return ConnectorError::config("INVALID_STATEMENT", message)
        }
        Some(1048 | 1062 | 1264 | 1292 | 1366 | 1406 | 1452) => {
            return ConnectorError::data("DATA_REJECTED", message)
        }
        _ => {}
    }
    let state = sqlstate.unwrap_or("HY000");
    match state.get(..2).unwrap_or(state) {
        "28" => ConnectorError::auth("AUTH_FAILED", message),
        "42" => ConnectorError::config("INVALID_STATEMENT", message),
        "22" | "23" => ConnectorError::data("DATA_REJECTED", message),
        _ => ConnectorError::transient_db("DATABASE_ERROR", message).with_details(
            serde_json::json!({ "mysql_errno": number, "sqlstate": state }),
        ),
    }
}

#[async_trait]
impl TabularConnector for MySqlConnector {
    async fn authenticate(&mut self) -> Result<(), ConnectorError> {
        let conn = self.connection().await?;
        sqlx::query("SELECT 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| classify(&e, "connection test failed"))?;
        Ok(())
    }

    async fn extract(&mut self, params: &serde_json::Value) -> Result<Table, ConnectorError> {
        let params: RelationalExtractParams = parse_params(params)?;
        let conn = self.connection().await?;

        let columns: Vec<(String, String)> = {
            let statement = (&mut *conn)
                .prepare(&params.query)
                .await
                .map_err(|e| classify(&e, "failed to prepare extract query"))?;
            statement
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
                .collect()
        };
        let (kinds, schema) = encode::build_arrow_schema(&columns)?;
        let rows = sqlx::query(&params.query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| classify(&e, "extract query failed"))?;

        let batch = encode::rows_to_record_batch(&rows, &kinds, &schema)?;
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
        let quoted = ddl::quoted_table(&target);
        let conn = self.connection().await?;

        // DDL commits implicitly in MySQL, so only the inserts share a transaction.
        match params.update_mode {
            UpdateMode::Replace => {
                sqlx::query(&format!("DROP TABLE IF EXISTS {quoted}"))
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to drop {quoted}")))?;
                sqlx::query(&ddl::create_table_sql(&target, table.schema(), false)?)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
            UpdateMode::Append => {
                sqlx::query(&ddl::create_table_sql(&target, table.schema(), true)?)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
            UpdateMode::Fail => {
                let existing: i64 = sqlx::query(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?",
                )
                .bind(target.schema.as_deref())
                .bind(target.table.as_str())
                .fetch_one(&mut *conn)
                .await
                .and_then(|row| row.try_get_unchecked::<i64, _>(0))
                .map_err(|e| classify(&e, "table existence check failed"))?;
                if existing > 0 {
                    return Err(ConnectorError::config(
                        "TABLE_EXISTS",
                        format!("table {quoted} already exists and update_mode is 'fail'"),
                    ));
                }
                sqlx::query(&ddl::create_table_sql(&target, table.schema(), false)?)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
        }

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| classify(&e, "failed to begin transaction"))?;
        let mut written = 0;
        for batch in table.batches() {
            written += insert::insert_batch(&mut tx, &target, batch).await?;
        }
        tx.commit()
            .await
            .map_err(|e| classify(&e, "failed to commit load"))?;

        tracing::info!(table = %quoted, rows = written, mode = ?params.update_mode, "Loaded rows");
        Ok(())
    }

    async fn discover(&mut self) -> Result<Vec<String>, ConnectorError> {
        let conn = self.connection().await?;
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| classify(&e, "discovery query failed"))?;

        rows.iter()
            .map(|row| {
                row.try_get_unchecked::<String, _>(0)
                    .map_err(|e| classify(&e, "failed to read table name"))
            })
            .collect()
    }
}
