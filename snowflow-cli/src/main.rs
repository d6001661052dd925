mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use snowflow::config::{process_env, PipelineConfig, DEFAULT_CONFIG_PATH};
use snowflow::orchestrator::{PipelineStage, Step};

#[derive(Parser)]
#[command(
    name = "snowflow",
    version,
    about = "Ingest, transform and validate data in Snowflake"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the pipeline configuration file
    #[arg(long, env = "SNOWFLOW_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); overrides the config
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch API endpoints and load them into raw tables
    #[command(group(ArgGroup::new("target").required(true).args(["endpoint", "all"])))]
    IngestApi {
        /// Endpoint to ingest
        #[arg(long)]
        endpoint: Option<String>,
        /// Ingest every enabled endpoint
        #[arg(long)]
        all: bool,
    },
    /// Upload a file to a stage or straight to S3
    IngestFile {
        /// File to upload
        path: PathBuf,
        /// Stage to upload to (defaults to the configured stage)
        #[arg(long)]
        stage: Option<String>,
        /// Refresh the ingestion pipe after a stage upload
        #[arg(long)]
        trigger_pipe: bool,
        /// Upload to this S3 bucket instead of a stage
        #[arg(long)]
        s3_bucket: Option<String>,
        /// Object key (defaults to the file name)
        #[arg(long, requires = "s3_bucket")]
        s3_key: Option<String>,
    },
    /// Run pipeline stages, or print the log rows of a past run
    Run {
        /// Stage to run
        #[arg(long, value_enum, default_value_t = StepArg::All)]
        step: StepArg,
        /// Print the log rows of this run instead of running anything
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Execute the provisioning SQL files in order
    Setup,
    /// Check that the provisioned objects exist
    Smoke,
}

#[derive(Clone, Copy, ValueEnum)]
enum StepArg {
    Ingestion,
    Transformation,
    Validation,
    All,
}

impl From<StepArg> for Step {
    fn from(step: StepArg) -> Self {
        match step {
            StepArg::Ingestion => Self::Stage(PipelineStage::Ingestion),
            StepArg::Transformation => Self::Stage(PipelineStage::Transformation),
            StepArg::Validation => Self::Stage(PipelineStage::Validation),
            StepArg::All => Self::All,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = process_env();

    let config = PipelineConfig::load(&cli.config, env.as_ref())
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    logging::init(&config.logging, cli.log_level.as_deref());

    match cli.command {
        Commands::IngestApi { endpoint, all: _ } => {
            commands::ingest::api(&config, env, endpoint.as_deref()).await
        }
        Commands::IngestFile {
            path,
            stage,
            trigger_pipe,
            s3_bucket,
            s3_key,
        } => {
            let args = commands::ingest::FileArgs {
                path,
                stage,
                trigger_pipe,
                s3_bucket,
                s3_key,
            };
            commands::ingest::file(&config, env, &args).await
        }
        Commands::Run { step, run_id } => {
            commands::run::execute(&config, env, step.into(), run_id).await
        }
        Commands::Setup => commands::setup::execute(&config, env).await,
        Commands::Smoke => commands::smoke::execute(&config, env).await,
    }
}
