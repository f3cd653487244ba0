//! PostgreSQL-protocol connector (Postgres, Redshift, Demo).

mod ddl;
mod encode;
mod insert;
mod params;

use std::time::Duration;

use async_trait::async_trait;
use conveyor_types::connector::UpdateMode;
use conveyor_types::error::ConnectorError;
use serde::Deserialize;
use tokio_postgres::types::WrongType;
use tokio_postgres::{Client, Config as PgConfig, NoTls};

use super::identifier::TableRef;
use super::{parse_params, RelationalExtractParams, RelationalLoadParams, TabularConnector};
use crate::codec::Table;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire dialect spoken by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Redshift,
}

impl Dialect {
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Redshift => 5439,
        }
    }
}

/// Connection settings.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

pub struct PostgresConnector {
    dialect: Dialect,
    config: PostgresConfig,
    client: Option<Client>,
}

impl PostgresConnector {
    #[must_use]
    pub fn new(dialect: Dialect, config: PostgresConfig) -> Self {
        Self {
            dialect,
            config,
            client: None,
        }
    }

    fn port(&self) -> u16 {
        self.config.port.unwrap_or_else(|| self.dialect.default_port())
    }

    async fn client(&mut self) -> Result<&mut Client, ConnectorError> {
        let client = match self.client.take() {
            Some(client) if !client.is_closed() => client,
            _ => self.connect().await?,
        };
        Ok(self.client.insert(client))
    }

    async fn connect(&self) -> Result<Client, ConnectorError> {
        let mut pg = PgConfig::new();
        pg.host(&self.config.host)
            .port(self.port())
            .user(&self.config.username)
            .dbname(&self.config.database)
            .connect_timeout(CONNECT_TIMEOUT);
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            classify(
                &e,
                &format!(
                    "connection to {}:{}/{} failed",
                    self.config.host,
                    self.port(),
                    self.config.database
                ),
            )
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection error");
            }
        });

        tracing::debug!(
            dialect = ?self.dialect,
            host = %self.config.host,
            database = %self.config.database,
            "Connected"
        );
        Ok(client)
    }
}

/// Map a driver error onto the connector error taxonomy.
pub(crate) fn classify(err: &tokio_postgres::Error, context: &str) -> ConnectorError {
    let message = format!("{context}: {err}");
    let Some(state) = err.code() else {
        let wrong_type = std::error::Error::source(err).is_some_and(|s| s.is::<WrongType>());
        return if wrong_type {
            ConnectorError::schema("TYPE_MISMATCH", message)
        } else {
            ConnectorError::transient_network("CONNECTION_FAILED", message)
        };
    };
    let code = state.code();
    let class = code.get(..2).unwrap_or(code);
    match (class, code) {
        ("28", _) => ConnectorError::auth("AUTH_FAILED", message),
        (_, "42501") => ConnectorError::permission("PERMISSION_DENIED", message),
        (_, "3D000") => ConnectorError::config("UNKNOWN_DATABASE", message),
        ("42", _) => ConnectorError::config("INVALID_STATEMENT", message),
        ("22" | "23", _) => ConnectorError::data("DATA_REJECTED", message),
        _ => ConnectorError::transient_db("DATABASE_ERROR", message).with_details(
            serde_json::json!({ "sqlstate": code }),
        ),
    }
}

#[async_trait]
impl TabularConnector for PostgresConnector {
    async fn authenticate(&mut self) -> Result<(), ConnectorError> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| classify(&e, "connection test failed"))?;
        Ok(())
    }

    async fn extract(&mut self, params: &serde_json::Value) -> Result<Table, ConnectorError> {
        let params: RelationalExtractParams = parse_params(params)?;
        let client = self.client().await?;

        let statement = client
            .prepare(&params.query)
            .await
            .map_err(|e| classify(&e, "failed to prepare extract query"))?;
        let schema = encode::build_arrow_schema(statement.columns())?;
        let pg_types: Vec<_> = statement.columns().iter().map(|c| c.type_().clone()).collect();
        let rows = client
            .query(&statement, &[])
            .await
            .map_err(|e| classify(&e, "extract query failed"))?;

        let batch = encode::rows_to_record_batch(&rows, &schema, &pg_types)?;
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

        let client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| classify(&e, "failed to begin transaction"))?;

        match params.update_mode {
            UpdateMode::Replace => {
                tx.batch_execute(&format!("DROP TABLE IF EXISTS {quoted}"))
                    .await
                    .map_err(|e| classify(&e, &format!("failed to drop {quoted}")))?;
                tx.batch_execute(&ddl::create_table_sql(&target, table.schema(), false)?)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
            UpdateMode::Append => {
                tx.batch_execute(&ddl::create_table_sql(&target, table.schema(), true)?)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
            UpdateMode::Fail => {
                let exists: bool = tx
                    .query_one(
                        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                         WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
                         AND table_name::text = $2::text)",
                        &[&target.schema, &target.table],
                    )
                    .await
                    .map_err(|e| classify(&e, "table existence check failed"))?
                    .get(0);
                if exists {
                    return Err(ConnectorError::config(
                        "TABLE_EXISTS",
                        format!("table {quoted} already exists and update_mode is 'fail'"),
                    ));
                }
                tx.batch_execute(&ddl::create_table_sql(&target, table.schema(), false)?)
                    .await
                    .map_err(|e| classify(&e, &format!("failed to create {quoted}")))?;
            }
        }

        let mut written = 0;
        for batch in table.batches() {
            written += insert::insert_batch(&tx, &target, batch).await?;
        }
        tx.commit()
            .await
            .map_err(|e| classify(&e, "failed to commit load"))?;

        tracing::info!(table = %quoted, rows = written, mode = ?params.update_mode, "Loaded rows");
        Ok(())
    }

    async fn discover(&mut self) -> Result<Vec<String>, ConnectorError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_schema::text, table_name::text FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' \
                 AND table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_schema, table_name",
                &[],
            )
            .await
            .map_err(|e| classify(&e, "discovery query failed"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let schema: String = row.get(0);
                let table: String = row.get(1);
                if schema == "public" {
                    table
                } else {
                    format!("{schema}.{table}")
                }
            })
            .collect())
    }
}
