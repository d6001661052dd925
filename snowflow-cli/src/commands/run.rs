use std::sync::Arc;

use anyhow::{bail, Result};
use snowflow::config::{PipelineConfig, SharedEnv};
use snowflow::orchestrator::{PipelineOrchestrator, RunId, Step};
use snowflow::warehouse::SnowflakeDriver;

/// Execute the `run` command.
///
/// With a run id, prints that run's log rows as JSON and runs nothing.
pub async fn execute(
    config: &PipelineConfig,
    env: SharedEnv,
    step: Step,
    run_id: Option<String>,
) -> Result<()> {
    let mut orchestrator =
        PipelineOrchestrator::new(config, env, Arc::new(SnowflakeDriver::new()))?;

    if let Some(run_id) = run_id {
        let rows = orchestrator.get_pipeline_status(&RunId::new(run_id)).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Starting pipeline run: {}", orchestrator.run_id());
    let report = orchestrator.run_step(step).await;
    orchestrator.close().await?;

    for (stage, outcome) in &report.stages {
        match outcome.reason() {
            None => println!("{:16} SUCCESS", format!("{stage}:")),
            Some(reason) => println!("{:16} FAILED ({reason})", format!("{stage}:")),
        }
    }
    println!("Run {} finished in {} ms", report.run_id, report.duration_ms);

    if !report.succeeded() {
        bail!("Pipeline run {} failed", report.run_id);
    }
    Ok(())
}
