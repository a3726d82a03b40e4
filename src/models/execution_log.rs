//! # Worker Execution Log
//!
//! One row per work-item execution, written for every outcome including
//! skips. Repeated fields carry warehouse "repeated" semantics: at the point
//! of write they must be arrays, possibly empty, never null. The sink
//! rejects null-valued repeated fields outright rather than letting the
//! warehouse load fail hours later.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::feature_vector::FeatureSource;

/// Terminal classification of one work-item execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Prediction written to staging
    Staged,
    /// Item older than the staleness threshold; acknowledged untouched
    StaleDropped,
    /// Deterministic skip; acknowledged, never redelivered
    PermanentSkip,
    /// Transient failure; negative-acknowledged for redelivery
    Retryable,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staged => write!(f, "staged"),
            Self::StaleDropped => write!(f, "stale_dropped"),
            Self::PermanentSkip => write!(f, "permanent_skip"),
            Self::Retryable => write!(f, "retryable"),
        }
    }
}

/// Execution log row.
///
/// Repeated fields are `Option<Vec<_>>` because upstream writers have
/// historically produced nulls where arrays belonged; the constructor
/// normalizes to empty arrays and the sink refuses any row where a repeated
/// field is still `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub log_id: Uuid,
    pub entity_id: String,
    pub batch_id: Uuid,
    pub date: NaiveDate,
    pub system_id: String,
    pub attempt: u32,
    pub outcome: ExecutionOutcome,
    pub skip_reason: Option<String>,
    pub duration_ms: u64,
    /// Repeated: provenance of the features loaded for this execution
    pub input_sources: Option<Vec<FeatureSource>>,
    /// Repeated: feature indices flagged as contaminated
    pub contaminated_indices: Option<Vec<usize>>,
    /// Repeated: non-fatal warnings emitted during processing
    pub warnings: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    /// New log row with all repeated fields initialized to empty arrays.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_id: impl Into<String>,
        batch_id: Uuid,
        date: NaiveDate,
        system_id: impl Into<String>,
        attempt: u32,
        outcome: ExecutionOutcome,
        duration_ms: u64,
    ) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            batch_id,
            date,
            system_id: system_id.into(),
            attempt,
            outcome,
            skip_reason: None,
            duration_ms,
            input_sources: Some(Vec::new()),
            contaminated_indices: Some(Vec::new()),
            warnings: Some(Vec::new()),
            created_at: Utc::now(),
        }
    }

    pub fn with_skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_input_sources(mut self, sources: Vec<FeatureSource>) -> Self {
        self.input_sources = Some(sources);
        self
    }

    pub fn with_contaminated_indices(mut self, indices: Vec<usize>) -> Self {
        self.contaminated_indices = Some(indices);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.get_or_insert_with(Vec::new).push(warning.into());
        self
    }

    /// Names of repeated fields currently null. Empty means writable.
    pub fn null_repeated_fields(&self) -> Vec<&'static str> {
        let mut nulls = Vec::new();
        if self.input_sources.is_none() {
            nulls.push("input_sources");
        }
        if self.contaminated_indices.is_none() {
            nulls.push("contaminated_indices");
        }
        if self.warnings.is_none() {
            nulls.push("warnings");
        }
        nulls
    }
}
