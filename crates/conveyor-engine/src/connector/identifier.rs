//! SQL identifier validation shared by the relational connectors.

use conveyor_types::error::ConnectorError;
use pg_escape::quote_identifier;

/// Maximum identifier length accepted (PostgreSQL's limit).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a single unquoted identifier.
///
/// # Errors
///
/// Returns a config-category [`ConnectorError`] describing the problem.
pub fn validate_identifier(name: &str) -> Result<(), ConnectorError> {
    let invalid = |msg: String| ConnectorError::config("INVALID_IDENTIFIER", msg);

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("identifier must not be empty".to_string()));
    };
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(format!(
            "identifier '{name}' exceeds the maximum length of {MAX_IDENTIFIER_LEN} bytes (got {})",
            name.len()
        )));
    }
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(invalid(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    if let Some(ch) = chars.find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_') {
        return Err(invalid(format!(
            "identifier '{name}' contains invalid character '{ch}'"
        )));
    }
    Ok(())
}

/// Table reference parsed from `table` or `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    /// Parse and validate a table reference.
    ///
    /// # Errors
    ///
    /// Returns a config-category [`ConnectorError`] for invalid parts.
    pub fn parse(raw: &str) -> Result<Self, ConnectorError> {
        let parts: Vec<&str> = raw.split('.').collect();
        let (schema, table) = match parts.as_slice() {
            [table] => (None, *table),
            [schema, table] => (Some(*schema), *table),
            _ => {
                return Err(ConnectorError::config(
                    "INVALID_IDENTIFIER",
                    format!("table reference '{raw}' has too many parts"),
                ))
            }
        };
        if let Some(schema) = schema {
            validate_identifier(schema)?;
        }
        validate_identifier(table)?;
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    /// Quoted form safe to splice into SQL.
    #[must_use]
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&self.table)
            ),
            None => quote_identifier(&self.table).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        validate_identifier("orders").unwrap();
        validate_identifier("_staging_2024").unwrap();
    }

    #[test]
    fn rejects_bad_identifiers() {
        let long = "x".repeat(64);
        for name in ["", "1abc", "drop table;", "a-b", long.as_str()] {
            assert!(validate_identifier(name).is_err(), "{name}");
        }
    }

    #[test]
    fn parses_qualified_reference() {
        let table = TableRef::parse("analytics.orders").unwrap();
        assert_eq!(table.schema.as_deref(), Some("analytics"));
        assert_eq!(table.quoted(), "analytics.orders");
    }

    #[test]
    fn quotes_mixed_case() {
        let table = TableRef::parse("Orders").unwrap();
        assert_eq!(table.quoted(), "\"Orders\"");
    }

    #[test]
    fn rejects_three_part_reference() {
        assert!(TableRef::parse("db.schema.table").is_err());
    }
}
