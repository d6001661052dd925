//! Pipeline orchestration.
//!
//! A run executes `ingestion → transformation → validation` under one
//! [`RunId`]. Every stage gets a start row and an end row update in the run
//! log, and the orchestrator's connection is released after each stage
//! whatever happened. The first failing stage halts the run.

mod log;
mod run;
mod status;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, SharedEnv};
use crate::errors::Result;
use crate::ingestion::ApiIngestion;
use crate::stages::{IngestionStage, Stage, StageContext, TransformationStage, ValidationStage};
use crate::warehouse::{Connector, Driver, Row};

pub use log::{RunLog, StageEnd};
pub use run::{api_run_tag, RunId};
pub use status::{FailureKind, PipelineStage, RunStatus, StageOutcome};

/// What to run: one stage or the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// A single stage.
    Stage(PipelineStage),
    /// All stages in order.
    All,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "{stage}"),
            Self::All => f.write_str("all"),
        }
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Stage)
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// The run.
    pub run_id: RunId,
    /// Outcome of every stage that was attempted. Stages after a failure
    /// are absent.
    pub stages: BTreeMap<PipelineStage, StageOutcome>,
    /// Wall-clock time in milliseconds.
    pub duration_ms: u64,
}

impl PipelineReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            stages: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    /// True when every attempted stage succeeded and at least one ran.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.stages.is_empty() && self.stages.values().all(StageOutcome::is_success)
    }

    /// Stage name to success flag.
    #[must_use]
    pub fn status_map(&self) -> BTreeMap<PipelineStage, bool> {
        self.stages
            .iter()
            .map(|(stage, outcome)| (*stage, outcome.is_success()))
            .collect()
    }
}

/// Runs pipeline stages under a single run id.
pub struct PipelineOrchestrator {
    run_id: RunId,
    connector: Connector,
    log: RunLog,
    stages: Vec<Box<dyn Stage>>,
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("run_id", &self.run_id)
            .field("log", &self.log)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Builds an orchestrator with the three standard stages and a fresh
    /// run id.
    ///
    /// API ingestion loads through a connector of its own.
    pub fn new(config: &PipelineConfig, env: SharedEnv, driver: Arc<dyn Driver>) -> Result<Self> {
        let connector = Connector::new(config.snowflake.clone(), Arc::clone(&env), driver);
        let api = ApiIngestion::new(config.api_ingestion.clone(), connector.detached(), env)?;

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(IngestionStage::new(api)),
            Box::new(TransformationStage::new(config.transformation.clone())),
            Box::new(ValidationStage::new(config.validation.clone())?),
        ];
        let log = RunLog::new(config.validation.log_table.clone())?;

        Ok(Self::from_parts(RunId::generate(), connector, log, stages))
    }

    /// Assembles an orchestrator from its parts.
    #[must_use]
    pub fn from_parts(
        run_id: RunId,
        connector: Connector,
        log: RunLog,
        stages: Vec<Box<dyn Stage>>,
    ) -> Self {
        info!(run_id = %run_id, "Pipeline orchestrator initialized");
        Self {
            run_id,
            connector,
            log,
            stages,
        }
    }

    /// Replaces the generated run id, e.g. to resume under a known id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// The run id shared by every stage of this orchestrator.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Runs one stage with start/end logging and returns its outcome.
    ///
    /// Errors from the stage body or the log writes become execution
    /// failures. The connection is closed before returning.
    pub async fn run_stage(&mut self, kind: PipelineStage) -> StageOutcome {
        let Some(index) = self.stages.iter().position(|s| s.kind() == kind) else {
            error!(stage = %kind, "Stage is not configured");
            return StageOutcome::execution_failed(format!("stage {kind} is not configured"));
        };

        info!(run_id = %self.run_id, stage = %kind, "Starting stage");
        let outcome = match self.log.log_start(&mut self.connector, &self.run_id, kind).await {
            Ok(()) => {
                let mut ctx = StageContext {
                    run_id: &self.run_id,
                    connector: &mut self.connector,
                };
                match self.stages[index].execute(&mut ctx).await {
                    Ok(outcome) => outcome,
                    Err(err) => StageOutcome::execution_failed(err.to_string()),
                }
            }
            Err(err) => StageOutcome::execution_failed(err.to_string()),
        };

        let end = StageEnd::from(&outcome);
        let outcome = match self
            .log
            .log_end(&mut self.connector, &self.run_id, kind, &end)
            .await
        {
            Ok(()) => outcome,
            Err(err) => {
                error!(run_id = %self.run_id, stage = %kind, error = %err, "Failed to log stage end");
                if outcome.is_success() {
                    StageOutcome::execution_failed(err.to_string())
                } else {
                    outcome
                }
            }
        };

        if let Err(err) = self.connector.close().await {
            warn!(error = %err, "Failed to close connection");
        }

        match &outcome {
            StageOutcome::Success { rows_processed } => {
                info!(run_id = %self.run_id, stage = %kind, rows_processed, "Stage succeeded");
            }
            StageOutcome::Failed { kind: failure, reason } => {
                error!(
                    run_id = %self.run_id,
                    stage = %kind,
                    failure = ?failure,
                    reason = %reason,
                    "Stage failed"
                );
            }
        }
        outcome
    }

    /// Runs the ingestion stage.
    pub async fn run_ingestion(&mut self) -> bool {
        self.run_stage(PipelineStage::Ingestion).await.is_success()
    }

    /// Runs the transformation stage.
    pub async fn run_transformation(&mut self) -> bool {
        self.run_stage(PipelineStage::Transformation).await.is_success()
    }

    /// Runs the validation stage.
    pub async fn run_validation(&mut self) -> bool {
        self.run_stage(PipelineStage::Validation).await.is_success()
    }

    /// Runs every stage in order, stopping at the first failure.
    pub async fn run_full_pipeline(&mut self) -> PipelineReport {
        self.run_stages(&PipelineStage::ALL).await
    }

    /// Runs one stage or the whole pipeline.
    pub async fn run_step(&mut self, step: Step) -> PipelineReport {
        match step {
            Step::All => self.run_full_pipeline().await,
            Step::Stage(stage) => self.run_stages(&[stage]).await,
        }
    }

    async fn run_stages(&mut self, stages: &[PipelineStage]) -> PipelineReport {
        let start = Instant::now();
        let mut report = PipelineReport::new(self.run_id.clone());
        info!(run_id = %self.run_id, stages = stages.len(), "Starting pipeline run");

        for &stage in stages {
            let outcome = self.run_stage(stage).await;
            let failed = !outcome.is_success();
            report.stages.insert(stage, outcome);
            if failed {
                warn!(run_id = %self.run_id, stage = %stage, "Halting pipeline run");
                break;
            }
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            run_id = %self.run_id,
            succeeded = report.succeeded(),
            duration_ms = report.duration_ms,
            "Pipeline run finished"
        );
        report
    }

    /// Returns the run log rows of `run_id`, oldest first.
    pub async fn get_pipeline_status(&mut self, run_id: &RunId) -> Result<Vec<Row>> {
        let rows = self.log.fetch(&mut self.connector, run_id).await;
        if let Err(err) = self.connector.close().await {
            warn!(error = %err, "Failed to close connection");
        }
        rows
    }

    /// Closes the orchestrator's connection.
    pub async fn close(&mut self) -> Result<()> {
        self.connector.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStage, MockStage, RecordingDriver};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LOG_TABLE: &str = "VALIDATION.PIPELINE_LOGS";

    fn orchestrator(driver: &RecordingDriver, stages: Vec<Box<dyn Stage>>) -> PipelineOrchestrator {
        PipelineOrchestrator::from_parts(
            RunId::new("RUN_TEST"),
            driver.connector(),
            RunLog::new(LOG_TABLE).unwrap(),
            stages,
        )
    }

    fn mocks() -> [MockStage; 3] {
        PipelineStage::ALL.map(MockStage::new)
    }

    #[test]
    fn test_step_parsing() {
        assert_eq!("all".parse::<Step>().unwrap(), Step::All);
        assert_eq!(
            "Validation".parse::<Step>().unwrap(),
            Step::Stage(PipelineStage::Validation)
        );
        assert!("deploy".parse::<Step>().is_err());
        assert_eq!(Step::Stage(PipelineStage::Ingestion).to_string(), "ingestion");
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let [a, b, c] = mocks();
        let mut orch = orchestrator(
            &driver,
            vec![Box::new(a.clone()), Box::new(b.clone()), Box::new(c.clone())],
        );

        let report = orch.run_full_pipeline().await;

        assert!(report.succeeded());
        assert_eq!(report.status_map().len(), 3);
        assert_eq!(a.call_count() + b.call_count() + c.call_count(), 3);
        assert!(driver
            .log_rows()
            .iter()
            .all(|row| row["STATUS"] == json!("SUCCESS") && row["RUN_ID"] == json!("RUN_TEST")));
        assert_eq!(driver.closes(), 3);
    }

    #[tokio::test]
    async fn test_failure_halts_later_stages() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let [a, b, c] = mocks();
        let b = b.with_outcome(StageOutcome::execution_failed("procedure missing"));
        let mut orch = orchestrator(
            &driver,
            vec![Box::new(a), Box::new(b), Box::new(c.clone())],
        );

        let report = orch.run_full_pipeline().await;

        assert_eq!(
            report.status_map(),
            BTreeMap::from([
                (PipelineStage::Ingestion, true),
                (PipelineStage::Transformation, false),
            ])
        );
        assert_eq!(c.call_count(), 0);

        let rows = driver.log_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["STATUS"], json!("FAILED"));
        assert_eq!(rows[1]["ERROR_MESSAGE"], json!("procedure missing"));
    }

    #[tokio::test]
    async fn test_stage_error_becomes_failed_row() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let mut orch = orchestrator(
            &driver,
            vec![Box::new(FailingStage::new(PipelineStage::Ingestion, "connection reset"))],
        );

        let outcome = orch.run_stage(PipelineStage::Ingestion).await;

        assert!(!outcome.is_success());
        let rows = driver.log_rows();
        assert_eq!(rows[0]["STATUS"], json!("FAILED"));
        assert!(rows[0]["ERROR_MESSAGE"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_is_failed_status() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let stage = MockStage::new(PipelineStage::Validation)
            .with_outcome(StageOutcome::validation_failed("2 validation checks failed"));
        let mut orch = orchestrator(&driver, vec![Box::new(stage)]);

        assert!(!orch.run_validation().await);
        assert_eq!(driver.log_rows()[0]["STATUS"], json!("FAILED"));
    }

    #[tokio::test]
    async fn test_connection_closed_when_log_write_fails() {
        let driver = RecordingDriver::new().fail("INSERT INTO VALIDATION.PIPELINE_LOGS", "no table");
        let stage = MockStage::new(PipelineStage::Ingestion);
        let mut orch = orchestrator(&driver, vec![Box::new(stage.clone())]);

        assert!(!orch.run_ingestion().await);
        assert_eq!(stage.call_count(), 0);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn test_log_end_failure_turns_success_into_failure() {
        let driver = RecordingDriver::new()
            .with_log_table(LOG_TABLE)
            .fail("UPDATE VALIDATION.PIPELINE_LOGS", "warehouse suspended");
        let mut orch = orchestrator(&driver, vec![Box::new(MockStage::new(PipelineStage::Ingestion))]);

        let outcome = orch.run_stage(PipelineStage::Ingestion).await;
        assert!(outcome.reason().unwrap().contains("warehouse suspended"));
    }

    #[tokio::test]
    async fn test_unconfigured_stage_fails_without_connecting() {
        let driver = RecordingDriver::new();
        let mut orch = orchestrator(&driver, vec![]);
        assert!(!orch.run_transformation().await);
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn test_run_step_single_stage() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let [a, b, c] = mocks();
        let mut orch = orchestrator(
            &driver,
            vec![Box::new(a.clone()), Box::new(b.clone()), Box::new(c)],
        );

        let report = orch.run_step(Step::Stage(PipelineStage::Transformation)).await;
        assert_eq!(
            report.status_map(),
            BTreeMap::from([(PipelineStage::Transformation, true)])
        );
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.recorded_runs(), vec![RunId::new("RUN_TEST")]);
    }

    #[tokio::test]
    async fn test_pipeline_status_ordered_and_unknown_empty() {
        let driver = RecordingDriver::new().with_log_table(LOG_TABLE);
        let [a, b, c] = mocks();
        let mut orch = orchestrator(&driver, vec![Box::new(a), Box::new(b), Box::new(c)]);
        orch.run_full_pipeline().await;

        let rows = orch.get_pipeline_status(&RunId::new("RUN_TEST")).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["PIPELINE_NAME"].clone()).collect();
        assert_eq!(
            names,
            vec![json!("INGESTION"), json!("TRANSFORMATION"), json!("VALIDATION")]
        );
        assert!(orch
            .get_pipeline_status(&RunId::new("RUN_OTHER"))
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_new_builds_standard_stages() {
        let orch = PipelineOrchestrator::new(
            &PipelineConfig::default(),
            Arc::new(crate::config::MapEnv::new()),
            Arc::new(RecordingDriver::new()),
        )
        .unwrap();
        let kinds: Vec<_> = orch.stages.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, PipelineStage::ALL.to_vec());
        assert!(orch.run_id().as_str().starts_with("RUN_"));
    }
}
