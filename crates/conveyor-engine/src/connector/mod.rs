//! Connectors to external data systems.
//!
//! [`TabularConnector`] is the capability set every job kind drives:
//! authenticate, extract, load, discover. [`setup_connector`] resolves a
//! [`ConnectorName`] to exactly one implementation at job start; the
//! connector then connects lazily on its first operation.

pub mod identifier;
pub mod mysql;
pub mod postgres;
pub mod s3;
pub mod sqlite;

use async_trait::async_trait;
use conveyor_types::connector::{ConnectorName, UpdateMode};
use conveyor_types::error::ConnectorError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::codec::Table;
use crate::errors::JobError;

/// Operations a job can run against an external system.
///
/// Implementations translate generic JSON parameters into system
/// semantics and classify every lower-level failure as a
/// [`ConnectorError`]; they never swallow one.
#[async_trait]
pub trait TabularConnector: Send {
    /// Connect and verify credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] if the system is unreachable or refuses
    /// the credentials.
    async fn authenticate(&mut self) -> Result<(), ConnectorError>;

    /// Read one table described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on invalid parameters or system failure.
    async fn extract(&mut self, params: &serde_json::Value) -> Result<Table, ConnectorError>;

    /// Write `table` to the destination described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on invalid parameters or system failure.
    async fn load(
        &mut self,
        params: &serde_json::Value,
        table: &Table,
    ) -> Result<(), ConnectorError>;

    /// List the table identifiers the system exposes.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on system failure.
    async fn discover(&mut self) -> Result<Vec<String>, ConnectorError>;
}

/// Extract parameters shared by the relational connectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationalExtractParams {
    pub query: String,
}

/// Load parameters shared by the relational connectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationalLoadParams {
    pub table: String,
    #[serde(default)]
    pub update_mode: UpdateMode,
}

/// Resolve a spec's connector name.
///
/// # Errors
///
/// Returns [`JobError::UnknownConnector`] for an unrecognized name.
pub fn resolve_name(name: &str) -> Result<ConnectorName, JobError> {
    name.parse::<ConnectorName>()
        .map_err(|e| JobError::UnknownConnector(e.0))
}

/// Build the connector for `name` from its JSON configuration.
///
/// No connection is attempted here.
///
/// # Errors
///
/// Returns a config-category [`ConnectorError`] if `config` does not fit
/// the connector.
pub fn setup_connector(
    name: ConnectorName,
    config: &serde_json::Value,
) -> Result<Box<dyn TabularConnector>, ConnectorError> {
    let connector: Box<dyn TabularConnector> = match name {
        ConnectorName::Postgres | ConnectorName::Demo => Box::new(
            postgres::PostgresConnector::new(postgres::Dialect::Postgres, parse_config(config)?),
        ),
        ConnectorName::Redshift => Box::new(postgres::PostgresConnector::new(
            postgres::Dialect::Redshift,
            parse_config(config)?,
        )),
        ConnectorName::Sqlite => Box::new(sqlite::SqliteConnector::new(parse_config(config)?)),
        ConnectorName::S3 => Box::new(s3::S3Connector::from_config(&parse_config(config)?)?),
        ConnectorName::Mysql | ConnectorName::MariaDb => {
            Box::new(mysql::MySqlConnector::new(parse_config(config)?))
        }
    };
    tracing::debug!(connector = %name, "Connector configured");
    Ok(connector)
}

pub(crate) fn parse_config<T: DeserializeOwned>(
    config: &serde_json::Value,
) -> Result<T, ConnectorError> {
    serde_json::from_value(config.clone())
        .map_err(|e| ConnectorError::config("INVALID_CONFIG", format!("invalid connector config: {e}")))
}

pub(crate) fn parse_params<T: DeserializeOwned>(
    params: &serde_json::Value,
) -> Result<T, ConnectorError> {
    serde_json::from_value(params.clone()).map_err(|e| {
        ConnectorError::config("INVALID_PARAMETERS", format!("invalid connector parameters: {e}"))
    })
}
