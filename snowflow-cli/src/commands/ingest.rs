use std::path::PathBuf;

use anyhow::{bail, Result};
use snowflow::config::{PipelineConfig, SharedEnv};
use snowflow::ingestion::{ApiIngestion, FileIngestion};

use super::connector;

/// Execute the `ingest-api` command for one endpoint, or all when `None`.
pub async fn api(config: &PipelineConfig, env: SharedEnv, endpoint: Option<&str>) -> Result<()> {
    let mut ingestion = ApiIngestion::new(
        config.api_ingestion.clone(),
        connector(config, env.clone()),
        env,
    )?;

    let failed: Vec<String> = match endpoint {
        Some(name) => {
            let report = ingestion.ingest_endpoint_report(name).await;
            println!("{name}: {} rows", report.rows_loaded);
            if report.success {
                Vec::new()
            } else {
                vec![report.name]
            }
        }
        None => {
            let reports = ingestion.ingest_all_endpoints().await;
            for report in &reports {
                let status = if report.success { "OK" } else { "FAILED" };
                println!("{:24} {status} ({} rows)", format!("{}:", report.name), report.rows_loaded);
            }
            reports
                .into_iter()
                .filter(|r| !r.success)
                .map(|r| r.name)
                .collect()
        }
    };

    if let Err(err) = ingestion.close().await {
        tracing::warn!(error = %err, "Failed to close connection");
    }

    if !failed.is_empty() {
        bail!("Failed endpoints: {}", failed.join(", "));
    }
    Ok(())
}

/// Options of the `ingest-file` command.
pub struct FileArgs {
    pub path: PathBuf,
    pub stage: Option<String>,
    pub trigger_pipe: bool,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
}

/// Execute the `ingest-file` command.
pub async fn file(config: &PipelineConfig, env: SharedEnv, args: &FileArgs) -> Result<()> {
    if !args.path.is_file() {
        bail!("File not found: {}", args.path.display());
    }

    let mut ingestion = FileIngestion::new(
        config.file_ingestion.clone(),
        connector(config, env.clone()),
        env,
    );

    let success = if let Some(bucket) = &args.s3_bucket {
        ingestion
            .upload_to_object_store(&args.path, bucket, args.s3_key.as_deref())
            .await
    } else {
        let stage = args
            .stage
            .clone()
            .unwrap_or_else(|| ingestion.default_stage().to_string());
        let uploaded = ingestion.upload_to_stage(&args.path, &stage).await;
        if uploaded && args.trigger_pipe {
            let pipe = ingestion.default_pipe().to_string();
            ingestion.trigger_pipe_refresh(&pipe).await;
        }
        uploaded
    };

    if let Err(err) = ingestion.close().await {
        tracing::warn!(error = %err, "Failed to close connection");
    }

    if !success {
        bail!("Failed to ingest {}", args.path.display());
    }
    println!("Ingested {}", args.path.display());
    Ok(())
}
