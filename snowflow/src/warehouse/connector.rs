//! Lazily opened, reusable warehouse connection.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{split_statements, Connection, Credentials, Driver, Row, SnowflakeDriver, Statement};
use crate::config::{
    resolve, SharedEnv, SnowflakeConfig, SNOWFLAKE_ACCOUNT, SNOWFLAKE_PASSWORD, SNOWFLAKE_USER,
};
use crate::errors::{ConfigError, Result, WarehouseError};

/// Owns at most one open warehouse connection.
///
/// The connection is opened on first use and reopened if it was closed.
/// Credentials are resolved when the connection is opened, so environment
/// changes between runs are picked up.
pub struct Connector {
    config: SnowflakeConfig,
    env: SharedEnv,
    driver: Arc<dyn Driver>,
    connection: Option<Box<dyn Connection>>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("account", &self.config.account)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector that opens sessions through `driver`.
    #[must_use]
    pub fn new(config: SnowflakeConfig, env: SharedEnv, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            env,
            driver,
            connection: None,
        }
    }

    /// Creates a connector backed by the Snowflake HTTP driver.
    #[must_use]
    pub fn snowflake(config: SnowflakeConfig, env: SharedEnv) -> Self {
        Self::new(config, env, Arc::new(SnowflakeDriver::new()))
    }

    /// Returns a connector sharing this one's settings, without a connection.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::new(self.config.clone(), Arc::clone(&self.env), Arc::clone(&self.driver))
    }

    /// Resolves login settings: environment variables win over the config.
    pub fn credentials(&self) -> Result<Credentials> {
        let env = self.env.as_ref();
        let required = |var: &str, key: &str, value: &str| {
            resolve(env, var, Some(value)).ok_or_else(|| ConfigError::MissingValue {
                key: key.to_string(),
                env_var: var.to_string(),
            })
        };

        Ok(Credentials {
            account: required(SNOWFLAKE_ACCOUNT, "snowflake.account", &self.config.account)?,
            user: required(SNOWFLAKE_USER, "snowflake.user", &self.config.user)?,
            password: resolve(env, SNOWFLAKE_PASSWORD, Some(&self.config.password))
                .unwrap_or_default(),
            warehouse: self.config.warehouse.clone(),
            database: self.config.database.clone(),
            schema: self.config.schema.clone(),
            role: self.config.role.clone(),
            host: self.config.host.clone(),
            protocol: self.config.protocol.clone(),
            port: self.config.port,
        })
    }

    /// Returns the live connection, opening one if needed.
    pub async fn connect(&mut self) -> Result<&mut dyn Connection> {
        let reusable = self.connection.as_ref().is_some_and(|c| !c.is_closed());
        if !reusable {
            let credentials = self.credentials()?;
            let connection = self.driver.connect(&credentials).await?;
            info!(
                account = %credentials.account,
                user = %credentials.user,
                "Connected to Snowflake"
            );
            self.connection = Some(connection);
        }

        match self.connection.as_deref_mut() {
            Some(connection) => Ok(connection),
            None => Err(WarehouseError::Closed.into()),
        }
    }

    /// Returns true while a connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Executes a statement, returning its rows when `fetch` is set.
    pub async fn execute_query(
        &mut self,
        statement: impl Into<Statement> + Send,
        fetch: bool,
    ) -> Result<Option<Vec<Row>>> {
        let statement = statement.into();
        debug!(sql = %statement.sql, binds = statement.binds.len(), "Executing statement");
        let rows = self.connect().await?.execute(&statement).await?;
        Ok(fetch.then_some(rows))
    }

    /// Executes a statement and returns its rows.
    pub async fn query(&mut self, statement: impl Into<Statement> + Send) -> Result<Vec<Row>> {
        Ok(self.execute_query(statement, true).await?.unwrap_or_default())
    }

    /// Executes a statement, discarding any rows.
    pub async fn execute(&mut self, statement: impl Into<Statement> + Send) -> Result<()> {
        self.execute_query(statement, false).await.map(|_| ())
    }

    /// Commits the current transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.connect().await?.commit().await?;
        Ok(())
    }

    /// Rolls back the current transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.connect().await?.rollback().await?;
        Ok(())
    }

    /// Uploads a local file into a named stage.
    pub async fn put_file(&mut self, local_path: &Path, stage: &str) -> Result<()> {
        self.connect().await?.put_file(local_path, stage).await?;
        Ok(())
    }

    /// Runs every statement of a SQL file in one transaction.
    ///
    /// Stops at the first failing statement and rolls back. Returns the number
    /// of statements executed.
    pub async fn execute_file(&mut self, path: &Path) -> Result<usize> {
        let sql = tokio::fs::read_to_string(path).await?;
        let count = self.execute_script(&sql).await?;
        info!(file = %path.display(), statements = count, "Executed SQL file");
        Ok(count)
    }

    /// Runs every statement of a script in one transaction.
    pub async fn execute_script(&mut self, sql: &str) -> Result<usize> {
        let statements = split_statements(sql);
        let connection = self.connect().await?;

        connection.execute(&Statement::new("BEGIN")).await?;
        for (index, sql) in statements.iter().enumerate() {
            debug!(index, sql = %sql, "Executing script statement");
            if let Err(err) = connection.execute(&Statement::new(sql.as_str())).await {
                warn!(index, error = %err, "Script statement failed, rolling back");
                if let Err(rollback_err) = connection.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                return Err(err.into());
            }
        }
        connection.commit().await?;

        Ok(statements.len())
    }

    /// Closes the connection. Closing an absent connection is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut connection) = self.connection.take() {
            if !connection.is_closed() {
                connection.close().await?;
                info!("Snowflake connection closed");
            }
        }
        Ok(())
    }
}
