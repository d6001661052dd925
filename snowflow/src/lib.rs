//! # Snowflow
//!
//! Run orchestration and ingestion for a Snowflake data pipeline.
//!
//! Snowflow provides:
//!
//! - **API ingestion**: paced, retried JSON fetches loaded into raw tables
//! - **File ingestion**: stage uploads, pipe refreshes and direct S3 uploads
//! - **Orchestration**: ingestion, transformation and validation under one
//!   run id, with a start and end row per stage in the run log
//! - **Provisioning helpers**: ordered setup scripts and smoke checks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use snowflow::prelude::*;
//! use std::sync::Arc;
//!
//! let env = process_env();
//! let config = PipelineConfig::load(DEFAULT_CONFIG_PATH, env.as_ref())?;
//! let mut orchestrator =
//!     PipelineOrchestrator::new(&config, env, Arc::new(SnowflakeDriver::new()))?;
//!
//! let report = orchestrator.run_full_pipeline().await;
//! println!("{}: {:?}", report.run_id, report.status_map());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod ingestion;
pub mod orchestrator;
pub mod setup;
pub mod smoke;
pub mod stages;
pub mod storage;
pub mod testing;
pub mod utils;
pub mod warehouse;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        process_env, EnvSource, MapEnv, PipelineConfig, SharedEnv, DEFAULT_CONFIG_PATH,
    };
    pub use crate::errors::{ConfigError, Result, SnowflowError, WarehouseError};
    pub use crate::ingestion::{ApiIngestion, EndpointReport, FileIngestion, RetryPolicy};
    pub use crate::orchestrator::{
        PipelineOrchestrator, PipelineReport, PipelineStage, RunId, RunStatus, StageOutcome, Step,
    };
    pub use crate::setup::{SetupReport, SetupRunner};
    pub use crate::smoke::{CheckStatus, SmokeReport, SmokeSuite};
    pub use crate::stages::{Stage, StageContext};
    pub use crate::warehouse::{Connector, Driver, Row, SnowflakeDriver, Statement};
}
