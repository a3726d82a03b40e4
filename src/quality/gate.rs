//! Per-record usability evaluation with contamination screening.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::SystemQualityConfig;
use crate::constants::system::{MAX_FEATURE_WIDTH, SENTINEL_EPSILON};
use crate::models::{FeatureSource, FeatureVector};

/// Why a feature vector was judged unusable.
///
/// Every reason here is deterministic: redelivering the same work item
/// cannot change the verdict, so all of these map to permanent skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnusableReason {
    /// `values` and `sources` describe different feature counts, the
    /// vector exceeds the accepted feature width, or a Real-sourced
    /// feature carries a null value
    SchemaViolation,
    /// Upstream quality score below the per-system floor
    BelowQualityFloor,
    /// More Default-sourced features than the per-system ceiling allows
    TooManyDefaults,
    /// A feature critical to this system was default-substituted
    CriticalFeatureDefaulted,
    /// A Default-sourced feature carries a known sentinel constant
    Contaminated,
}

impl fmt::Display for UnusableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaViolation => write!(f, "schema_violation"),
            Self::BelowQualityFloor => write!(f, "below_quality_floor"),
            Self::TooManyDefaults => write!(f, "too_many_defaults"),
            Self::CriticalFeatureDefaulted => write!(f, "critical_feature_defaulted"),
            Self::Contaminated => write!(f, "contaminated"),
        }
    }
}

/// Outcome of evaluating one feature vector for one consuming system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub usable: bool,
    pub reasons: Vec<UnusableReason>,
    /// Features carrying a Default provenance tag
    pub default_count: usize,
    /// Indices of Default-sourced features carrying a sentinel constant
    pub contaminated_indices: Vec<usize>,
}

impl QualityVerdict {
    pub fn is_contaminated(&self) -> bool {
        !self.contaminated_indices.is_empty()
    }

    /// The single reason reported on a skip log line; contamination
    /// outranks the ordinary reasons since it signals an upstream bug.
    pub fn primary_reason(&self) -> Option<UnusableReason> {
        if self.is_contaminated() {
            return Some(UnusableReason::Contaminated);
        }
        self.reasons.first().copied()
    }
}

/// Pure evaluation component for feature usability.
///
/// Holds only the sentinel list; per-system thresholds arrive with each
/// call, since different scoring artifacts depend on different feature
/// subsets.
#[derive(Debug, Clone)]
pub struct QualityGate {
    sentinels: Vec<f64>,
}

impl QualityGate {
    pub fn new(sentinels: Vec<f64>) -> Self {
        Self { sentinels }
    }

    /// Evaluate one feature vector against one system's quality policy.
    pub fn evaluate(&self, features: &FeatureVector, policy: &SystemQualityConfig) -> QualityVerdict {
        let mut reasons = Vec::new();

        if !self.schema_valid(features) {
            // Nothing else is meaningful over a malformed vector
            return QualityVerdict {
                usable: false,
                reasons: vec![UnusableReason::SchemaViolation],
                default_count: features.default_count(),
                contaminated_indices: Vec::new(),
            };
        }

        let default_count = features.default_count();
        let contaminated_indices = self.contaminated_indices(features);

        if features.quality_score < policy.quality_floor {
            reasons.push(UnusableReason::BelowQualityFloor);
        }

        if default_count > policy.max_default_features {
            reasons.push(UnusableReason::TooManyDefaults);
        }

        if policy
            .critical_features
            .iter()
            .any(|&idx| features.sources.get(idx) == Some(&FeatureSource::Default))
        {
            reasons.push(UnusableReason::CriticalFeatureDefaulted);
        }

        if !contaminated_indices.is_empty() {
            warn!(
                entity_id = %features.entity_id,
                date = %features.date,
                indices = ?contaminated_indices,
                "Sentinel constants found in default-sourced features"
            );
            reasons.push(UnusableReason::Contaminated);
        }

        let usable = reasons.is_empty();
        if !usable {
            debug!(
                entity_id = %features.entity_id,
                reasons = ?reasons,
                default_count,
                "Feature vector rejected by quality gate"
            );
        }

        QualityVerdict {
            usable,
            reasons,
            default_count,
            contaminated_indices,
        }
    }

    fn schema_valid(&self, features: &FeatureVector) -> bool {
        if !features.schema_consistent() {
            return false;
        }
        if features.values.len() > MAX_FEATURE_WIDTH {
            return false;
        }
        // A null value is only legal where the source is Default
        features
            .values
            .iter()
            .zip(features.sources.iter())
            .all(|(value, source)| value.is_some() || *source == FeatureSource::Default)
    }

    fn contaminated_indices(&self, features: &FeatureVector) -> Vec<usize> {
        features
            .values
            .iter()
            .zip(features.sources.iter())
            .enumerate()
            .filter_map(|(idx, (value, source))| match (value, source) {
                (Some(v), FeatureSource::Default) if self.is_sentinel(*v) => Some(idx),
                _ => None,
            })
            .collect()
    }

    fn is_sentinel(&self, value: f64) -> bool {
        self.sentinels
            .iter()
            .any(|s| (value - s).abs() < SENTINEL_EPSILON)
    }
}
