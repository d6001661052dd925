//! Validation: data-quality checks.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{Stage, StageContext};
use crate::config::ValidationConfig;
use crate::errors::{Result, SnowflowError};
use crate::orchestrator::{PipelineStage, StageOutcome};
use crate::warehouse::{Row, Statement};

/// Runs the validation procedure and counts failed checks for the run.
#[derive(Debug, Clone)]
pub struct ValidationStage {
    config: ValidationConfig,
}

impl ValidationStage {
    /// Creates the stage.
    pub fn new(config: ValidationConfig) -> Result<Self> {
        if !crate::config::is_identifier(&config.results_table) {
            return Err(SnowflowError::InvalidIdentifier(config.results_table));
        }
        Ok(Self { config })
    }

    fn failed_checks_statement(&self, run_id: &str) -> Statement {
        Statement::new(format!(
            "SELECT COUNT(*) AS FAILED_CHECKS FROM {} WHERE RUN_ID = ? AND STATUS = 'FAIL'",
            self.config.results_table
        ))
        .bind(run_id)
    }
}

/// Reads the `FAILED_CHECKS` count; a missing row counts as zero.
fn failed_checks(rows: &[Row]) -> Result<i64> {
    let Some(row) = rows.first() else {
        return Ok(0);
    };
    let value = row.get("FAILED_CHECKS").unwrap_or(&Value::Null);
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SnowflowError::stage_failed(
            PipelineStage::Validation.as_str(),
            format!("unreadable FAILED_CHECKS value: {value}"),
        )
    })
}

#[async_trait]
impl Stage for ValidationStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Validation
    }

    async fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<StageOutcome> {
        let run_id = ctx.run_id.as_str();
        ctx.connector
            .execute(
                Statement::new("CALL VALIDATION.RUN_ALL_VALIDATIONS(?, ?)")
                    .bind(&self.config.target_table)
                    .bind(run_id),
            )
            .await?;

        let rows = ctx.connector.query(self.failed_checks_statement(run_id)).await?;
        let failed = failed_checks(&rows)?;

        if failed == 0 {
            info!(run_id, "All validation checks passed");
            Ok(StageOutcome::success())
        } else {
            warn!(run_id, failed, "Validation checks failed");
            Ok(StageOutcome::validation_failed(format!(
                "{failed} validation checks failed"
            )))
        }
    }
}
