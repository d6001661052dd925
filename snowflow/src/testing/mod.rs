//! Testing utilities for snowflow.
//!
//! This module provides:
//! - A recording warehouse driver with canned responses
//! - Mock stages for orchestrator tests

mod mocks;
mod recording;

pub use mocks::{FailingStage, MockStage};
pub use recording::{Call, RecordingDriver};
