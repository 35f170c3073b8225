//! Ingestion outcomes exposed to the edge layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProcessingStatus;

/// Result of handing an event to the ingestion coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Processed,
    Ignored,
    Failed,
    /// Known event id delivered with different signature material.
    DuplicateRejected,
}

impl Outcome {
    /// Outcome reported for a stored row.
    ///
    /// A row still `received` was never committed past dispatch, so it is
    /// reported as failed.
    pub fn from_status(status: ProcessingStatus) -> Self {
        match status {
            ProcessingStatus::Processed => Outcome::Processed,
            ProcessingStatus::Ignored => Outcome::Ignored,
            ProcessingStatus::Failed | ProcessingStatus::Received => Outcome::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Ignored => "ignored",
            Outcome::Failed => "failed",
            Outcome::DuplicateRejected => "duplicate_rejected",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
