//! Warehouse access.
//!
//! A [`Driver`] opens [`Connection`]s; the [`Connector`] owns at most one of
//! them and reopens it lazily. Statements carry positional bind values so
//! that run identifiers and error text never end up inside SQL text.

mod connector;
mod snowflake;
mod split;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::WarehouseError;

pub use connector::Connector;
pub use snowflake::SnowflakeDriver;
pub use split::split_statements;

/// A result row: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A positional bind value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BindValue {
    /// SQL `NULL`.
    Null,
    /// A string.
    Text(String),
    /// An integer.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A boolean.
    Boolean(bool),
}

impl BindValue {
    /// Returns the text value, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for BindValue {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A SQL statement with positional (`?`) binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Values for the `?` placeholders, in order.
    pub binds: Vec<BindValue>,
}

impl Statement {
    /// Creates a statement without binds.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    /// Appends a bind value.
    #[must_use]
    pub fn bind(mut self, value: impl Into<BindValue>) -> Self {
        self.binds.push(value.into());
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Resolved login settings handed to a [`Driver`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Account identifier.
    pub account: String,
    /// Login name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Virtual warehouse.
    pub warehouse: Option<String>,
    /// Default database.
    pub database: Option<String>,
    /// Default schema.
    pub schema: Option<String>,
    /// Role.
    pub role: Option<String>,
    /// Host override.
    pub host: Option<String>,
    /// Protocol override.
    pub protocol: Option<String>,
    /// Port override.
    pub port: Option<u16>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// An open warehouse session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Executes one statement and returns its rows (empty for DML/DDL).
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, WarehouseError>;

    /// Uploads a local file into a named stage.
    async fn put_file(&mut self, local_path: &Path, stage: &str) -> Result<(), WarehouseError>;

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<(), WarehouseError>;

    /// Rolls back the current transaction.
    async fn rollback(&mut self) -> Result<(), WarehouseError>;

    /// Returns true once the session has been closed.
    fn is_closed(&self) -> bool;

    /// Ends the session.
    async fn close(&mut self) -> Result<(), WarehouseError>;
}

/// Opens warehouse sessions.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Authenticates and returns a fresh session.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>, WarehouseError>;
}

/// Builds the `PUT` command that uploads `local_path` into `stage`.
#[must_use]
pub fn put_command(local_path: &Path, stage: &str) -> String {
    let path = local_path.to_string_lossy().replace('\\', "/");
    format!("PUT file://{path} @{stage} AUTO_COMPRESS=FALSE OVERWRITE=TRUE")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statement_binds() {
        let stmt = Statement::new("UPDATE t SET a = ? WHERE b = ? AND c = ?")
            .bind("x")
            .bind(3_i64)
            .bind(None::<String>);
        assert_eq!(
            stmt.binds,
            vec![
                BindValue::Text("x".to_string()),
                BindValue::Integer(3),
                BindValue::Null
            ]
        );
        assert_eq!(stmt.to_string(), "UPDATE t SET a = ? WHERE b = ? AND c = ?");
    }

    #[test]
    fn test_put_command() {
        let cmd = put_command(Path::new("/data/in/orders.csv"), "FILE_STAGE");
        assert_eq!(
            cmd,
            "PUT file:///data/in/orders.csv @FILE_STAGE AUTO_COMPRESS=FALSE OVERWRITE=TRUE"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            account: "acct".to_string(),
            password: "s3cret".to_string(),
            ..Credentials::default()
        };
        assert!(!format!("{creds:?}").contains("s3cret"));
    }
}
