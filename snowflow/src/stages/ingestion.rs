//! Ingestion: fetch every enabled API endpoint.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Stage, StageContext};
use crate::errors::Result;
use crate::ingestion::ApiIngestion;
use crate::orchestrator::{PipelineStage, StageOutcome};

/// Runs API ingestion for all enabled endpoints.
///
/// Loads go through the ingestion client's own connector, which is closed
/// when the stage finishes.
#[derive(Debug)]
pub struct IngestionStage {
    api: ApiIngestion,
}

impl IngestionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(api: ApiIngestion) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Stage for IngestionStage {
    fn kind(&self) -> PipelineStage {
        PipelineStage::Ingestion
    }

    async fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<StageOutcome> {
        let reports = self.api.ingest_all_endpoints().await;
        if let Err(err) = self.api.close().await {
            warn!(error = %err, "Failed to close ingestion connection");
        }

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.name.as_str())
            .collect();
        if !failed.is_empty() {
            return Ok(StageOutcome::execution_failed(format!(
                "API ingestion failed for endpoints: {}",
                failed.join(", ")
            )));
        }

        let rows: usize = reports.iter().map(|r| r.rows_loaded).sum();
        info!(run_id = %ctx.run_id, endpoints = reports.len(), rows, "Ingestion completed");
        Ok(StageOutcome::success_with_rows(
            u64::try_from(rows).unwrap_or(u64::MAX),
        ))
    }
}
