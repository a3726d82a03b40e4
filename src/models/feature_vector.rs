//! # Feature Vector
//!
//! Per-entity feature snapshot read from the feature store, with per-feature
//! provenance tags. This core never writes feature data; it validates and
//! consumes it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of a single feature value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// Computed from actual historical records
    Real,
    /// Substituted because the underlying history was missing
    Default,
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Coarse tier describing how much real history backed a windowed statistic.
///
/// The tier is always relative to the window size it was computed over; a
/// raw event count means nothing without knowing the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleQuality {
    Insufficient,
    Limited,
    Good,
    Excellent,
}

impl SampleQuality {
    /// Tier for `used` qualifying events found against a window of `window`.
    ///
    /// Thresholds are fractions of the window: full window is Excellent,
    /// 70% is Good, 50% is Limited, anything less is Insufficient.
    pub fn from_window(used: u32, window: u32) -> Self {
        if window == 0 {
            return Self::Insufficient;
        }
        let used = f64::from(used);
        let window = f64::from(window);
        if used >= window {
            Self::Excellent
        } else if used >= 0.7 * window {
            Self::Good
        } else if used >= 0.5 * window {
            Self::Limited
        } else {
            Self::Insufficient
        }
    }

    /// Multiplier applied during confidence calibration
    pub fn confidence_factor(&self) -> f64 {
        match self {
            Self::Excellent => 1.0,
            Self::Good => 0.9,
            Self::Limited => 0.75,
            Self::Insufficient => 0.5,
        }
    }
}

impl fmt::Display for SampleQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Limited => write!(f, "limited"),
            Self::Insufficient => write!(f, "insufficient"),
        }
    }
}

/// Per-entity feature snapshot with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity_id: String,
    pub date: NaiveDate,
    /// Feature values; None is only legal for Default-sourced features
    pub values: Vec<Option<f64>>,
    /// Provenance tag per feature, same length as `values`
    pub sources: Vec<FeatureSource>,
    /// Upstream-computed quality score in [0, 100]
    pub quality_score: f64,
    pub sample_quality: SampleQuality,
    /// Qualifying historical events found for the rolling window
    pub window_used: u32,
    /// Rolling window size the statistics were computed over
    pub window_size: u32,
}

impl FeatureVector {
    /// Number of features carrying a Default provenance tag
    pub fn default_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| **s == FeatureSource::Default)
            .count()
    }

    /// Values and sources must describe the same features
    pub fn schema_consistent(&self) -> bool {
        self.values.len() == self.sources.len()
    }

    /// Dense values for scoring; missing features resolve to 0.0 only after
    /// the quality gate has already accepted the vector
    pub fn dense_values(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(0.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_quality_boundaries() {
        // W = 100: exact fraction boundaries
        assert_eq!(SampleQuality::from_window(100, 100), SampleQuality::Excellent);
        assert_eq!(SampleQuality::from_window(70, 100), SampleQuality::Good);
        assert_eq!(SampleQuality::from_window(69, 100), SampleQuality::Limited);
        assert_eq!(SampleQuality::from_window(50, 100), SampleQuality::Limited);
        assert_eq!(SampleQuality::from_window(49, 100), SampleQuality::Insufficient);
    }

    #[test]
    fn test_sample_quality_small_window() {
        // W = 10, the usual "last 10 events" window
        assert_eq!(SampleQuality::from_window(10, 10), SampleQuality::Excellent);
        assert_eq!(SampleQuality::from_window(7, 10), SampleQuality::Good);
        assert_eq!(SampleQuality::from_window(6, 10), SampleQuality::Limited);
        assert_eq!(SampleQuality::from_window(5, 10), SampleQuality::Limited);
        assert_eq!(SampleQuality::from_window(4, 10), SampleQuality::Insufficient);
        assert_eq!(SampleQuality::from_window(0, 0), SampleQuality::Insufficient);
    }

    #[test]
    fn test_default_count() {
        let fv = FeatureVector {
            entity_id: "e1".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            values: vec![Some(21.5), None, Some(3.0)],
            sources: vec![
                FeatureSource::Real,
                FeatureSource::Default,
                FeatureSource::Real,
            ],
            quality_score: 88.0,
            sample_quality: SampleQuality::Good,
            window_used: 7,
            window_size: 10,
        };
        assert_eq!(fv.default_count(), 1);
        assert!(fv.schema_consistent());
        assert_eq!(fv.dense_values(), vec![21.5, 0.0, 3.0]);
    }
}
