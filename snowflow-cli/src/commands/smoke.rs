use anyhow::{bail, Result};
use snowflow::config::{PipelineConfig, SharedEnv};
use snowflow::smoke::SmokeSuite;

use super::connector;

/// Execute the `smoke` command: check that provisioned objects exist.
pub async fn execute(config: &PipelineConfig, env: SharedEnv) -> Result<()> {
    let suite = SmokeSuite::from_config(config)?;
    let mut connector = connector(config, env);
    let report = suite.run(&mut connector).await;
    connector.close().await?;

    for result in &report.results {
        println!("{result}");
    }
    println!("\n{}", report.summary());

    if !report.succeeded() {
        bail!("Some smoke checks failed");
    }
    println!("All critical checks passed");
    Ok(())
}
