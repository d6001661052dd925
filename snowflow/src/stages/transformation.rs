//! Transformation: cleaning, deduplication and business transforms.

use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageContext};
use crate::config::TransformationConfig;
use crate::errors::Result;
use crate::orchestrator::{PipelineStage, StageOutcome};
use crate::warehouse::Statement;

/// Calls the cleaning, deduplication and transform procedures in order.
#[derive(Debug, Clone)]
pub struct TransformationStage {
    config: TransformationConfig,
}

impl TransformationStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: TransformationConfig) -> Self {
        Self { config }
    }

    /// The procedure calls, in execution order.
    #[must_use]
    pub fn statements(&self, run_id: &str) -> Vec<Statement> {
        let c = &self.config;
        vec![
            Statement::new("CALL CLEANED.CLEAN_RAW_DATA(?, ?, ?)")
                .bind(&c.source_table)
                .bind(&c.cleaned_table)
                .bind(run_id),
            Statement::new("CALL CLEANED.REMOVE_DUPLICATES(?, ?, ?)")
                .bind(&c.cleaned_table)
                .bind(c.dedup_columns.join(","))
                .bind(run_id),
            Statement::new("CALL CLEANED.APPLY_BUSINESS_TRANSFORMS(?, ?, ?)")
                .bind(&c.cleaned_table)
                .bind(&c.final_table)
                .bind(run_id),
        ]
    }
}

#[async_trait]
impl Stage for TransformationStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Transformation
    }

    async fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<StageOutcome> {
        for statement in self.statements(ctx.run_id.as_str()) {
            ctx.connector.execute(statement).await?;
        }
        ctx.connector.commit().await?;
        info!(run_id = %ctx.run_id, "Transformation procedures completed");
        Ok(StageOutcome::success())
    }
}
