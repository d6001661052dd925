//! Stage trait and the three pipeline stages.
//!
//! A stage body does its work through the orchestrator's connector and
//! reports a [`StageOutcome`]. Logging the start and end of a stage, and
//! releasing the connection afterwards, is the orchestrator's job.

mod ingestion;
mod transformation;
mod validation;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::Result;
use crate::orchestrator::{PipelineStage, RunId, StageOutcome};
use crate::warehouse::Connector;

pub use ingestion::IngestionStage;
pub use transformation::TransformationStage;
pub use validation::ValidationStage;

/// What a stage body gets to work with.
#[derive(Debug)]
pub struct StageContext<'a> {
    /// The run being executed.
    pub run_id: &'a RunId,
    /// The orchestrator's warehouse connector.
    pub connector: &'a mut Connector,
}

/// Trait for pipeline stages.
///
/// Returning `Err` is equivalent to returning an execution failure with the
/// error's message; the orchestrator never propagates it.
#[async_trait]
pub trait Stage: Send + Debug {
    /// Which stage this is.
    fn kind(&self) -> PipelineStage;

    /// Executes the stage.
    async fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<StageOutcome>;
}
