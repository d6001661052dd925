use anyhow::{Context, Result};
use snowflow::config::{PipelineConfig, SharedEnv};
use snowflow::setup::SetupRunner;

use super::connector;

/// Execute the `setup` command: run every provisioning file in order.
pub async fn execute(config: &PipelineConfig, env: SharedEnv) -> Result<()> {
    let mut connector = connector(config, env);
    let result = SetupRunner::new(config.setup.clone())
        .run(&mut connector)
        .await;
    connector.close().await?;

    let report = result.context("Setup failed")?;
    for (file, statements) in &report.executed {
        println!("Completed {file} ({statements} statements)");
    }
    for file in &report.skipped {
        println!("Skipped {file} (not found)");
    }
    println!("Setup completed successfully");
    Ok(())
}
