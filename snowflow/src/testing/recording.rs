//! An in-memory warehouse driver that records every call.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{MapEnv, SnowflakeConfig};
use crate::errors::WarehouseError;
use crate::warehouse::{BindValue, Connection, Connector, Credentials, Driver, Row, Statement};

/// One call made against a [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// A session was opened.
    Connect,
    /// A statement was executed.
    Execute(Statement),
    /// A transaction was committed.
    Commit,
    /// A transaction was rolled back.
    Rollback,
    /// A file was uploaded to a stage.
    Put {
        /// Local file.
        path: PathBuf,
        /// Target stage.
        stage: String,
    },
    /// A session was closed.
    Close,
}

#[derive(Debug, Default)]
struct LogTable {
    table: String,
    rows: Vec<Row>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct State {
    journal: Vec<Call>,
    responses: Vec<(String, Vec<Row>)>,
    failures: Vec<(String, String)>,
    connect_error: Option<String>,
    log: Option<LogTable>,
}

/// A [`Driver`] whose sessions answer from canned rules.
///
/// Clones share the same journal, so a test can keep one handle and give
/// another to the code under test. Statements matching a `fail` rule error,
/// those matching a `respond` rule return its rows, the rest return nothing.
/// With [`RecordingDriver::with_log_table`] the run log table is emulated.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    state: Arc<Mutex<State>>,
}

impl RecordingDriver {
    /// Creates a driver with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` return `rows`.
    #[must_use]
    pub fn respond(self, pattern: impl Into<String>, rows: Vec<Row>) -> Self {
        self.state.lock().responses.push((pattern.into(), rows));
        self
    }

    /// Statements containing `pattern` fail with `message`.
    #[must_use]
    pub fn fail(self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .failures
            .push((pattern.into(), message.into()));
        self
    }

    /// Every connection attempt fails with `message`.
    #[must_use]
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.state.lock().connect_error = Some(message.into());
        self
    }

    /// Emulates the run log table `table`.
    #[must_use]
    pub fn with_log_table(self, table: impl Into<String>) -> Self {
        self.state.lock().log = Some(LogTable {
            table: table.into(),
            ..LogTable::default()
        });
        self
    }

    /// A connector using this driver with placeholder credentials.
    #[must_use]
    pub fn connector(&self) -> Connector {
        let config = SnowflakeConfig {
            account: "test_account".to_string(),
            user: "test_user".to_string(),
            password: "test_password".to_string(),
            ..SnowflakeConfig::default()
        };
        Connector::new(config, Arc::new(MapEnv::new()), Arc::new(self.clone()))
    }

    /// Builds a result row.
    #[must_use]
    pub fn row<const N: usize>(columns: [(&str, Value); N]) -> Row {
        columns
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Every call, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().journal.clone()
    }

    /// Executed statements, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                Call::Execute(statement) => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    /// SQL text of executed statements, in order.
    #[must_use]
    pub fn executed_sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Uploaded files with their stages.
    #[must_use]
    pub fn puts(&self) -> Vec<(PathBuf, String)> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                Call::Put { path, stage } => Some((path.clone(), stage.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, wanted: &Call) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| *call == wanted)
            .count()
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.count(&Call::Connect)
    }

    /// Number of commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(&Call::Commit)
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(&Call::Rollback)
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.count(&Call::Close)
    }

    /// Rows of the emulated run log table, in insertion order.
    #[must_use]
    pub fn log_rows(&self) -> Vec<Row> {
        self.state
            .lock()
            .log
            .as_ref()
            .map(|log| log.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn connect(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Connection>, WarehouseError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.connect_error {
            return Err(WarehouseError::Login {
                code: None,
                message: message.clone(),
            });
        }
        state.journal.push(Call::Connect);
        Ok(Box::new(RecordingConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct RecordingConnection {
    state: Arc<Mutex<State>>,
    closed: bool,
}

fn bind_json(value: &BindValue) -> Value {
    match value {
        BindValue::Null => Value::Null,
        BindValue::Text(s) => Value::from(s.as_str()),
        BindValue::Integer(i) => Value::from(*i),
        BindValue::Float(f) => Value::from(*f),
        BindValue::Boolean(b) => Value::from(*b),
    }
}

impl LogTable {
    /// Applies a run log statement. Returns `None` when the statement does
    /// not touch the table.
    fn apply(&mut self, statement: &Statement) -> Option<Vec<Row>> {
        let sql = statement.sql.as_str();
        let binds: Vec<Value> = statement.binds.iter().map(bind_json).collect();
        let bind = |i: usize| binds.get(i).cloned().unwrap_or(Value::Null);

        if sql.starts_with(&format!("INSERT INTO {} ", self.table)) {
            self.sequence += 1;
            self.rows.push(RecordingDriver::row([
                ("PIPELINE_NAME", bind(0)),
                ("RUN_ID", bind(1)),
                ("STATUS", bind(2)),
                ("START_TIME", Value::from(self.sequence)),
                ("END_TIME", Value::Null),
                ("ROWS_PROCESSED", Value::Null),
                ("ROWS_FAILED", Value::Null),
                ("ERROR_MESSAGE", Value::Null),
                ("EXECUTION_TIME_SECONDS", Value::Null),
            ]));
            return Some(Vec::new());
        }

        if sql.starts_with(&format!("UPDATE {} ", self.table)) {
            self.sequence += 1;
            let (run_id, name) = (bind(4), bind(5));
            for row in &mut self.rows {
                if row.get("RUN_ID") == Some(&run_id) && row.get("PIPELINE_NAME") == Some(&name) {
                    row.insert("STATUS".to_string(), bind(0));
                    row.insert("ROWS_PROCESSED".to_string(), bind(1));
                    row.insert("ROWS_FAILED".to_string(), bind(2));
                    row.insert("ERROR_MESSAGE".to_string(), bind(3));
                    row.insert("END_TIME".to_string(), Value::from(self.sequence));
                    row.insert("EXECUTION_TIME_SECONDS".to_string(), Value::from(0));
                }
            }
            return Some(Vec::new());
        }

        if sql.starts_with("SELECT") && sql.contains(&format!("FROM {} ", self.table)) {
            let run_id = bind(0);
            let mut rows: Vec<Row> = self
                .rows
                .iter()
                .filter(|row| row.get("RUN_ID") == Some(&run_id))
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.get("START_TIME").and_then(Value::as_u64));
            return Some(rows);
        }

        None
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Closed);
        }
        let mut state = self.state.lock();
        state.journal.push(Call::Execute(statement.clone()));

        if let Some((_, message)) = state
            .failures
            .iter()
            .find(|(pattern, _)| statement.sql.contains(pattern.as_str()))
        {
            return Err(WarehouseError::statement("100000", message.clone()));
        }
        if let Some(rows) = state.log.as_mut().and_then(|log| log.apply(statement)) {
            return Ok(rows);
        }
        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| statement.sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn put_file(&mut self, local_path: &Path, stage: &str) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        state.journal.push(Call::Put {
            path: local_path.to_path_buf(),
            stage: stage.to_string(),
        });
        if let Some((_, message)) = state
            .failures
            .iter()
            .find(|(pattern, _)| pattern.starts_with("PUT"))
        {
            return Err(WarehouseError::statement("253006", message.clone()));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        self.state.lock().journal.push(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        self.state.lock().journal.push(Call::Rollback);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<(), WarehouseError> {
        self.closed = true;
        self.state.lock().journal.push(Call::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{PipelineStage, RunId, RunLog, RunStatus, StageEnd};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_rules_and_journal() {
        let driver = RecordingDriver::new()
            .respond("SELECT 1", vec![RecordingDriver::row([("ONE", json!(1))])])
            .fail("DROP", "not allowed");
        let mut connector = driver.connector();

        let rows = connector.query("SELECT 1").await.unwrap();
        assert_eq!(rows[0]["ONE"], json!(1));
        assert!(connector.execute("DROP TABLE X").await.is_err());
        connector.commit().await.unwrap();
        connector.close().await.unwrap();

        assert_eq!(driver.connects(), 1);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.closes(), 1);
        assert_eq!(driver.executed_sql(), vec!["SELECT 1", "DROP TABLE X"]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let driver = RecordingDriver::new().fail_connect("Incorrect username or password");
        let mut connector = driver.connector();
        assert!(connector.execute("SELECT 1").await.is_err());
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn test_log_table_emulation() {
        let driver = RecordingDriver::new().with_log_table("VALIDATION.PIPELINE_LOGS");
        let mut connector = driver.connector();
        let log = RunLog::new("VALIDATION.PIPELINE_LOGS").unwrap();
        let run = RunId::new("RUN_A");

        log.log_start(&mut connector, &run, PipelineStage::Ingestion)
            .await
            .unwrap();
        let end = StageEnd {
            status: RunStatus::Success,
            rows_processed: 5,
            rows_failed: 0,
            error_message: None,
        };
        log.log_end(&mut connector, &run, PipelineStage::Ingestion, &end)
            .await
            .unwrap();

        let rows = log.fetch(&mut connector, &run).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["STATUS"], json!("SUCCESS"));
        assert_eq!(rows[0]["ROWS_PROCESSED"], json!(5));
        assert!(log
            .fetch(&mut connector, &RunId::new("RUN_B"))
            .await
            .unwrap()
            .is_empty());
    }
}
