//! Connector names and the parameter vocabularies shared by connectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported external data systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorName {
    Postgres,
    Redshift,
    /// Bundled demo database; speaks the Postgres protocol.
    Demo,
    Sqlite,
    S3,
    Mysql,
    /// Speaks the MySQL protocol.
    MariaDb,
}

impl ConnectorName {
    pub const ALL: [ConnectorName; 7] = [
        Self::Postgres,
        Self::Redshift,
        Self::Demo,
        Self::Sqlite,
        Self::S3,
        Self::Mysql,
        Self::MariaDb,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "Postgres",
            Self::Redshift => "Redshift",
            Self::Demo => "Demo",
            Self::Sqlite => "SQLite",
            Self::S3 => "S3",
            Self::Mysql => "MySQL",
            Self::MariaDb => "MariaDB",
        }
    }
}

impl fmt::Display for ConnectorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a connector name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown connector name '{0}'")]
pub struct UnknownConnectorName(pub String);

impl FromStr for ConnectorName {
    type Err = UnknownConnectorName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redshift" => Ok(Self::Redshift),
            "demo" | "aqueduct demo" | "aqueduct_demo" => Ok(Self::Demo),
            "sqlite" => Ok(Self::Sqlite),
            "s3" => Ok(Self::S3),
            "mysql" => Ok(Self::Mysql),
            "mariadb" => Ok(Self::MariaDb),
            _ => Err(UnknownConnectorName(s.to_string())),
        }
    }
}

/// How a relational load treats an existing destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Drop and recreate the table. An empty string also selects it.
    #[default]
    #[serde(alias = "")]
    Replace,
    /// Create the table if missing, then insert.
    Append,
    /// Refuse to write if the table already exists.
    Fail,
}

/// Object format for the S3 connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    /// Newline-delimited JSON.
    Json,
    Parquet,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Json => f.write_str("json"),
            Self::Parquet => f.write_str("parquet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("postgres".parse::<ConnectorName>().unwrap(), ConnectorName::Postgres);
        assert_eq!("SQLite".parse::<ConnectorName>().unwrap(), ConnectorName::Sqlite);
        assert_eq!(" S3 ".parse::<ConnectorName>().unwrap(), ConnectorName::S3);
        assert_eq!("MariaDB".parse::<ConnectorName>().unwrap(), ConnectorName::MariaDb);
    }

    #[test]
    fn aqueduct_demo_is_the_demo_connector() {
        assert_eq!("Aqueduct Demo".parse::<ConnectorName>().unwrap(), ConnectorName::Demo);
        assert_eq!("aqueduct_demo".parse::<ConnectorName>().unwrap(), ConnectorName::Demo);
    }

    #[test]
    fn display_roundtrips_through_from_str() {
        for name in ConnectorName::ALL {
            assert_eq!(name.to_string().parse::<ConnectorName>().unwrap(), name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "Oracle".parse::<ConnectorName>().unwrap_err();
        assert_eq!(err.to_string(), "unknown connector name 'Oracle'");
    }

    #[test]
    fn update_mode_defaults_to_replace() {
        assert_eq!(UpdateMode::default(), UpdateMode::Replace);
        let mode: UpdateMode = serde_json::from_str("\"append\"").unwrap();
        assert_eq!(mode, UpdateMode::Append);
    }

    #[test]
    fn empty_update_mode_is_replace() {
        let mode: UpdateMode = serde_json::from_str("\"\"").unwrap();
        assert_eq!(mode, UpdateMode::Replace);
    }
}
