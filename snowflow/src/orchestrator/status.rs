//! Run status, stage names and stage outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status stored in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The stage has started and not yet finished.
    InProgress,
    /// The stage finished successfully.
    Success,
    /// The stage failed, either with an error or a failed check.
    Failed,
}

impl RunStatus {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Returns true if this status is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// The stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Pull data from the configured APIs.
    Ingestion,
    /// Clean, deduplicate and transform.
    Transformation,
    /// Run data-quality checks.
    Validation,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [Self; 3] = [Self::Ingestion, Self::Transformation, Self::Validation];

    /// The `PIPELINE_NAME` written to the run log.
    #[must_use]
    pub const fn log_name(&self) -> &'static str {
        match self {
            Self::Ingestion => "INGESTION",
            Self::Transformation => "TRANSFORMATION",
            Self::Validation => "VALIDATION",
        }
    }

    /// The lowercase name used on the command line and in reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Transformation => "transformation",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingestion" => Ok(Self::Ingestion),
            "transformation" => Ok(Self::Transformation),
            "validation" => Ok(Self::Validation),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An operation raised an error or did not complete.
    Execution,
    /// The stage ran but data-quality checks failed.
    Validation,
}

/// What a stage body reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage succeeded.
    Success {
        /// Rows the stage processed, where known.
        rows_processed: u64,
    },
    /// The stage failed.
    Failed {
        /// Failure category.
        kind: FailureKind,
        /// Human-readable reason, stored as the log's error message.
        reason: String,
    },
}

impl StageOutcome {
    /// A success with no row count.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success { rows_processed: 0 }
    }

    /// A success that processed `rows` rows.
    #[must_use]
    pub const fn success_with_rows(rows: u64) -> Self {
        Self::Success {
            rows_processed: rows,
        }
    }

    /// An execution failure.
    #[must_use]
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            kind: FailureKind::Execution,
            reason: reason.into(),
        }
    }

    /// A data-quality failure.
    #[must_use]
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            kind: FailureKind::Validation,
            reason: reason.into(),
        }
    }

    /// Returns true for [`StageOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The status written to the run log.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        match self {
            Self::Success { .. } => RunStatus::Success,
            Self::Failed { .. } => RunStatus::Failed,
        }
    }

    /// The error message, for failures.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failed { reason, .. } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_strings() {
        for status in [RunStatus::InProgress, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&RunStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }

    #[test]
    fn test_stage_order_and_names() {
        let mut stages = vec![
            PipelineStage::Validation,
            PipelineStage::Ingestion,
            PipelineStage::Transformation,
        ];
        stages.sort();
        assert_eq!(stages, PipelineStage::ALL.to_vec());
        assert_eq!(PipelineStage::Transformation.log_name(), "TRANSFORMATION");
        assert_eq!("Validation".parse::<PipelineStage>().unwrap(), PipelineStage::Validation);
        assert!("all".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_validation_failure_is_stored_as_failed() {
        let outcome = StageOutcome::validation_failed("3 validation checks failed");
        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(outcome.reason(), Some("3 validation checks failed"));
        assert!(!outcome.is_success());

        let ok = StageOutcome::success_with_rows(10);
        assert_eq!(ok.status(), RunStatus::Success);
        assert_eq!(ok.reason(), None);
    }
}
