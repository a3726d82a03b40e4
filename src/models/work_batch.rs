//! # Work Batch
//!
//! One batch of prediction work per `(date, system)`. All batch state lives
//! in the durable batch store; the coordinator process holds nothing that
//! must survive a restart.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::stage_completion::RunMode;

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created; no work items published yet
    Pending,
    /// Publish loop in progress
    Dispatching,
    /// All work items published; workers producing staged results
    AwaitingResults,
    /// Staged results merged into the canonical store
    Consolidated,
    /// Aborted by operator reset or partial dispatch failure
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Consolidated | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Dispatching | Self::AwaitingResults)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::AwaitingResults => write!(f, "awaiting_results"),
            Self::Consolidated => write!(f, "consolidated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatching" => Ok(Self::Dispatching),
            "awaiting_results" => Ok(Self::AwaitingResults),
            "consolidated" => Ok(Self::Consolidated),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

/// A batch of entities needing predictions for one `(date, system)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBatch {
    pub batch_id: Uuid,
    pub date: NaiveDate,
    pub system_id: String,
    pub mode: RunMode,
    /// Entities included after line availability and breaker screening
    pub entity_ids: Vec<String>,
    /// Reference line per entity, captured at batch build. Workers read the
    /// line from here; the queue payload does not carry it.
    pub reference_lines: HashMap<String, f64>,
    pub status: BatchStatus,
    /// Work items actually published so far; on partial dispatch failure the
    /// remainder retry resumes from this offset
    pub dispatched_count: usize,
    /// Staged results merged at last consolidation
    pub result_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkBatch {
    pub fn new(
        date: NaiveDate,
        system_id: impl Into<String>,
        mode: RunMode,
        entity_ids: Vec<String>,
        reference_lines: HashMap<String, f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            batch_id: Uuid::new_v4(),
            date,
            system_id: system_id.into(),
            mode,
            entity_ids,
            reference_lines,
            status: BatchStatus::Pending,
            dispatched_count: 0,
            result_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reference_line(&self, entity_id: &str) -> Option<f64> {
        self.reference_lines.get(entity_id).copied()
    }

    /// Entities not yet published, for remainder redispatch
    pub fn undispatched(&self) -> &[String] {
        &self.entity_ids[self.dispatched_count.min(self.entity_ids.len())..]
    }
}
