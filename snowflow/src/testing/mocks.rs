//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::{Result, SnowflowError};
use crate::orchestrator::{PipelineStage, RunId, StageOutcome};
use crate::stages::{Stage, StageContext};
use crate::warehouse::Statement;

/// A mock stage that records calls and returns a configurable outcome.
///
/// Clones share call tracking, so a test can keep a handle after boxing the
/// stage into an orchestrator.
#[derive(Debug, Clone)]
pub struct MockStage {
    kind: PipelineStage,
    outcome: Arc<Mutex<StageOutcome>>,
    runs: Arc<Mutex<Vec<RunId>>>,
    statements: Arc<Mutex<Vec<Statement>>>,
}

impl MockStage {
    /// Creates a mock stage that succeeds.
    #[must_use]
    pub fn new(kind: PipelineStage) -> Self {
        Self {
            kind,
            outcome: Arc::new(Mutex::new(StageOutcome::success())),
            runs: Arc::new(Mutex::new(Vec::new())),
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the outcome to return.
    #[must_use]
    pub fn with_outcome(self, outcome: StageOutcome) -> Self {
        *self.outcome.lock() = outcome;
        self
    }

    /// Executes `statement` through the connector on every call.
    #[must_use]
    pub fn with_statement(self, statement: impl Into<Statement>) -> Self {
        self.statements.lock().push(statement.into());
        self
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.runs.lock().len()
    }

    /// Returns the run id of each call.
    #[must_use]
    pub fn recorded_runs(&self) -> Vec<RunId> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn kind(&self) -> PipelineStage {
        self.kind
    }

    async fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<StageOutcome> {
        self.runs.lock().push(ctx.run_id.clone());
        let statements = self.statements.lock().clone();
        for statement in statements {
            ctx.connector.execute(statement).await?;
        }
        Ok(self.outcome.lock().clone())
    }
}

/// A stage whose body always returns an error.
#[derive(Debug, Clone)]
pub struct FailingStage {
    kind: PipelineStage,
    error: String,
}

impl FailingStage {
    /// Creates a failing stage.
    #[must_use]
    pub fn new(kind: PipelineStage, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn kind(&self) -> PipelineStage {
        self.kind
    }

    async fn execute(&mut self, _ctx: &mut StageContext<'_>) -> Result<StageOutcome> {
        Err(SnowflowError::stage_failed(self.kind.as_str(), self.error.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;

    #[tokio::test]
    async fn test_mock_stage_records_runs_and_statements() {
        let driver = RecordingDriver::new();
        let mut connector = driver.connector();
        let run_id = RunId::new("RUN_1");
        let stage = MockStage::new(PipelineStage::Transformation).with_statement("SELECT 1");
        let mut boxed: Box<dyn Stage> = Box::new(stage.clone());

        let mut ctx = StageContext {
            run_id: &run_id,
            connector: &mut connector,
        };
        let outcome = boxed.execute(&mut ctx).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(stage.recorded_runs(), vec![run_id.clone()]);
        assert_eq!(driver.executed_sql(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_failing_stage_errors() {
        let driver = RecordingDriver::new();
        let mut connector = driver.connector();
        let run_id = RunId::new("RUN_1");
        let mut ctx = StageContext {
            run_id: &run_id,
            connector: &mut connector,
        };

        let err = FailingStage::new(PipelineStage::Validation, "boom")
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
