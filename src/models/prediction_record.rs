//! # Prediction Records
//!
//! Canonical prediction output plus the staged form workers write before
//! consolidation. The canonical invariant: at most one active record per
//! `(entity, date, system)`, with supersession links retained for audit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::feature_vector::{FeatureSource, SampleQuality};

/// Directional recommendation against the reference line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Over,
    Under,
    /// Edge below the actionable threshold; abstain rather than pick
    Hold,
}

impl Recommendation {
    /// Recommendation from a predicted value against the reference line.
    ///
    /// Edges smaller than `min_edge` in absolute value produce `Hold`:
    /// acting on negligible edges is worse than abstaining.
    pub fn from_edge(predicted_value: f64, reference_line: f64, min_edge: f64) -> Self {
        let edge = predicted_value - reference_line;
        if edge.abs() < min_edge {
            Self::Hold
        } else if edge > 0.0 {
            Self::Over
        } else {
            Self::Under
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Over => write!(f, "over"),
            Self::Under => write!(f, "under"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

impl std::str::FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "over" => Ok(Self::Over),
            "under" => Ok(Self::Under),
            "hold" => Ok(Self::Hold),
            _ => Err(format!("Invalid recommendation: {s}")),
        }
    }
}

/// Canonical prediction record served to downstream consumers.
///
/// Consumers only ever see `is_active = true` rows; superseded rows stay in
/// the store with their `superseded_by` link for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub record_id: Uuid,
    pub entity_id: String,
    pub date: NaiveDate,
    pub system_id: String,
    /// Scoring artifact file name, for provenance
    pub model_file: String,
    pub predicted_value: f64,
    pub reference_line: f64,
    pub recommendation: Recommendation,
    /// Calibrated confidence in [0, 1]
    pub confidence: f64,
    pub is_active: bool,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Dedup key for the at-most-one-active invariant
    pub fn dedup_key(&self) -> (String, NaiveDate, String) {
        (
            self.entity_id.clone(),
            self.date,
            self.system_id.clone(),
        )
    }
}

/// Worker output staged for consolidation.
///
/// Staged rows are keyed `(entity, date, system)` ignoring attempt; the
/// staging store overwrites on that key with last-write-wins by
/// `created_at`, so redelivered work items never accumulate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedPrediction {
    pub staged_id: Uuid,
    pub batch_id: Uuid,
    pub entity_id: String,
    pub date: NaiveDate,
    pub system_id: String,
    pub model_file: String,
    pub predicted_value: f64,
    pub reference_line: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    /// Delivery attempt that produced this row; recorded for audit, ignored
    /// by dedup
    pub attempt: u32,
    /// Provenance of the features that went into the score
    pub input_sources: Vec<FeatureSource>,
    /// Indices of features the gate flagged but did not reject on
    pub skipped_features: Vec<usize>,
    pub sample_quality: Option<SampleQuality>,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl StagedPrediction {
    /// Dedup key for staging writes
    pub fn dedup_key(&self) -> (String, NaiveDate, String) {
        (
            self.entity_id.clone(),
            self.date,
            self.system_id.clone(),
        )
    }

    /// Snapshot completeness, used to pick between duplicate staged rows
    /// before falling back to `created_at`. More populated provenance wins.
    pub fn completeness_rank(&self) -> u32 {
        let mut rank = 0;
        if !self.input_sources.is_empty() {
            rank += 1;
        }
        if self.sample_quality.is_some() {
            rank += 1;
        }
        if self.quality_score.is_some() {
            rank += 1;
        }
        rank
    }

    /// Promote this staged row to a canonical record. The canonical id is
    /// the staged id, so re-running consolidation over the same staged rows
    /// merges the same records and changes nothing.
    pub fn to_prediction_record(&self) -> PredictionRecord {
        PredictionRecord {
            record_id: self.staged_id,
            entity_id: self.entity_id.clone(),
            date: self.date,
            system_id: self.system_id.clone(),
            model_file: self.model_file.clone(),
            predicted_value: self.predicted_value,
            reference_line: self.reference_line,
            recommendation: self.recommendation,
            confidence: self.confidence,
            is_active: true,
            superseded_by: None,
            created_at: self.created_at,
        }
    }
}
