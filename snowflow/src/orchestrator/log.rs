//! The run log table.
//!
//! One row per stage per run: inserted `IN_PROGRESS` when the stage starts
//! and updated once with the terminal status. All values are bound.

use tracing::debug;

use super::{PipelineStage, RunId, RunStatus, StageOutcome};
use crate::config::is_identifier;
use crate::errors::{Result, SnowflowError};
use crate::warehouse::{Connector, Row, Statement};

/// Terminal values written when a stage ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEnd {
    /// Final status.
    pub status: RunStatus,
    /// Rows processed.
    pub rows_processed: i64,
    /// Rows failed.
    pub rows_failed: i64,
    /// Error message for failures.
    pub error_message: Option<String>,
}

impl From<&StageOutcome> for StageEnd {
    fn from(outcome: &StageOutcome) -> Self {
        let rows_processed = match outcome {
            StageOutcome::Success { rows_processed } => {
                i64::try_from(*rows_processed).unwrap_or(i64::MAX)
            }
            StageOutcome::Failed { .. } => 0,
        };
        Self {
            status: outcome.status(),
            rows_processed,
            rows_failed: 0,
            error_message: outcome.reason().map(str::to_string),
        }
    }
}

/// Reads and writes the run log table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLog {
    table: String,
}

impl RunLog {
    /// Creates a log writer for `table`.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(SnowflowError::InvalidIdentifier(table));
        }
        Ok(Self { table })
    }

    /// The table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Statement inserting the `IN_PROGRESS` row.
    #[must_use]
    pub fn start_statement(&self, run_id: &RunId, stage: PipelineStage) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} (PIPELINE_NAME, RUN_ID, START_TIME, STATUS) \
             VALUES (?, ?, CURRENT_TIMESTAMP(), ?)",
            self.table
        ))
        .bind(stage.log_name())
        .bind(run_id.as_str())
        .bind(RunStatus::InProgress.as_str())
    }

    /// Statement recording the terminal state of the row.
    #[must_use]
    pub fn end_statement(&self, run_id: &RunId, stage: PipelineStage, end: &StageEnd) -> Statement {
        Statement::new(format!(
            "UPDATE {} SET END_TIME = CURRENT_TIMESTAMP(), STATUS = ?, ROWS_PROCESSED = ?, \
             ROWS_FAILED = ?, ERROR_MESSAGE = ?, \
             EXECUTION_TIME_SECONDS = DATEDIFF(SECOND, START_TIME, CURRENT_TIMESTAMP()) \
             WHERE RUN_ID = ? AND PIPELINE_NAME = ?",
            self.table
        ))
        .bind(end.status.as_str())
        .bind(end.rows_processed)
        .bind(end.rows_failed)
        .bind(end.error_message.clone())
        .bind(run_id.as_str())
        .bind(stage.log_name())
    }

    /// Statement selecting all rows of a run, oldest first.
    #[must_use]
    pub fn status_statement(&self, run_id: &RunId) -> Statement {
        Statement::new(format!(
            "SELECT PIPELINE_NAME, STATUS, START_TIME, END_TIME, ROWS_PROCESSED, ROWS_FAILED, \
             ERROR_MESSAGE, EXECUTION_TIME_SECONDS FROM {} WHERE RUN_ID = ? ORDER BY START_TIME",
            self.table
        ))
        .bind(run_id.as_str())
    }

    /// Records that `stage` started.
    pub async fn log_start(
        &self,
        connector: &mut Connector,
        run_id: &RunId,
        stage: PipelineStage,
    ) -> Result<()> {
        connector.execute(self.start_statement(run_id, stage)).await?;
        connector.commit().await?;
        debug!(run_id = %run_id, stage = %stage, "Logged stage start");
        Ok(())
    }

    /// Records how `stage` ended.
    ///
    /// The row is updated exactly once, so `end` must carry a terminal status.
    pub async fn log_end(
        &self,
        connector: &mut Connector,
        run_id: &RunId,
        stage: PipelineStage,
        end: &StageEnd,
    ) -> Result<()> {
        if !end.status.is_terminal() {
            return Err(SnowflowError::stage_failed(
                stage.as_str(),
                format!("cannot end a stage with status {}", end.status),
            ));
        }
        connector.execute(self.end_statement(run_id, stage, end)).await?;
        connector.commit().await?;
        debug!(run_id = %run_id, stage = %stage, status = %end.status, "Logged stage end");
        Ok(())
    }

    /// Returns the log rows of a run ordered by start time.
    pub async fn fetch(&self, connector: &mut Connector, run_id: &RunId) -> Result<Vec<Row>> {
        connector.query(self.status_statement(run_id)).await
    }
}
