//! # System Constants
//!
//! Core constants and enums that define the operational boundaries of the
//! prediction pipeline: stage ordering, lifecycle event names, and the
//! sentinel values the quality gate screens for.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle and alert events published on the event bus
pub mod events {
    // Stage orchestration events
    pub const STAGE_PRODUCER_COMPLETED: &str = "stage.producer_completed";
    pub const STAGE_READY: &str = "stage.ready";
    pub const STAGE_TRIGGERED: &str = "stage.triggered";
    pub const STAGE_TRIGGER_FAILED: &str = "stage.trigger_failed";

    // Batch lifecycle events
    pub const BATCH_CREATED: &str = "batch.created";
    pub const BATCH_DISPATCHED: &str = "batch.dispatched";
    pub const BATCH_DISPATCH_FAILED: &str = "batch.dispatch_failed";
    pub const BATCH_CONSOLIDATED: &str = "batch.consolidated";
    pub const BATCH_RESET: &str = "batch.reset";

    // Worker events
    pub const PREDICTION_STAGED: &str = "prediction.staged";
    pub const PREDICTION_SKIPPED: &str = "prediction.skipped";
    pub const STALE_ITEM_DROPPED: &str = "work_item.stale_dropped";

    // Data-quality alerts (distinct from ordinary failures)
    pub const CONTAMINATION_DETECTED: &str = "quality.contamination_detected";
    pub const BREAKER_TRIPPED: &str = "breaker.tripped";
}

/// Pipeline stages in dependency order, leaves first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Raw event ingestion from scraper/feed producers
    RawIngest,
    /// Derived analytics computed over raw records
    Analytics,
    /// Feature/cache materialization for the prediction systems
    Features,
    /// Prediction batch build, dispatch, and consolidation
    Predictions,
}

impl PipelineStage {
    /// The stage that runs after this one, if any
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            Self::RawIngest => Some(Self::Analytics),
            Self::Analytics => Some(Self::Features),
            Self::Features => Some(Self::Predictions),
            Self::Predictions => None,
        }
    }

    /// Stages in execution order
    pub fn ordered() -> [PipelineStage; 4] {
        [
            Self::RawIngest,
            Self::Analytics,
            Self::Features,
            Self::Predictions,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawIngest => write!(f, "raw_ingest"),
            Self::Analytics => write!(f, "analytics"),
            Self::Features => write!(f, "features"),
            Self::Predictions => write!(f, "predictions"),
        }
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw_ingest" => Ok(Self::RawIngest),
            "analytics" => Ok(Self::Analytics),
            "features" => Ok(Self::Features),
            "predictions" => Ok(Self::Predictions),
            _ => Err(format!("Invalid pipeline stage: {s}")),
        }
    }
}

/// System-wide constants
pub mod system {
    /// Sentinel constants historically observed masquerading as real values
    /// in default-substituted features. The quality gate screens Default
    /// sources against this list; config may extend it.
    pub const KNOWN_SENTINELS: &[f64] = &[112.0, -1.0, 999.0];

    /// Tolerance when comparing a feature value against a sentinel constant
    pub const SENTINEL_EPSILON: f64 = 1e-9;

    /// Upper bound on entities per work batch
    pub const MAX_BATCH_ENTITIES: usize = 2_000;

    /// Upper bound on feature vector width accepted from the feature
    /// store; wider vectors fail the quality gate's schema check
    pub const MAX_FEATURE_WIDTH: usize = 512;
}

/// Status groupings for validation and operational queries
pub mod status_groups {
    use crate::models::BatchStatus;

    /// Batch statuses from which consolidation may run
    pub const CONSOLIDATABLE_BATCH_STATES: &[BatchStatus] =
        &[BatchStatus::AwaitingResults, BatchStatus::Failed];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert_eq!(PipelineStage::RawIngest.next(), Some(PipelineStage::Analytics));
        assert_eq!(PipelineStage::Features.next(), Some(PipelineStage::Predictions));
        assert_eq!(PipelineStage::Predictions.next(), None);
        assert!(PipelineStage::Predictions.is_terminal());
        assert!(!PipelineStage::RawIngest.is_terminal());
    }

    #[test]
    fn test_stage_string_conversion() {
        assert_eq!(PipelineStage::Features.to_string(), "features");
        assert_eq!(
            "raw_ingest".parse::<PipelineStage>().unwrap(),
            PipelineStage::RawIngest
        );
        assert!("warehouse".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&PipelineStage::Analytics).unwrap();
        assert_eq!(json, "\"analytics\"");
        let parsed: PipelineStage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PipelineStage::Analytics);
    }
}
