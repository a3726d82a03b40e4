//! # Feature Quality Gate
//!
//! Pure evaluation over a feature vector and its provenance. Two independent
//! computations live here: the per-record usability verdict (default-source
//! ceiling, critical-feature check, quality floor, schema validation,
//! contamination screening) and the sample-quality tier for windowed
//! statistics.
//!
//! Contamination is the historically-observed failure mode where a default
//! substitution silently injected a sentinel constant instead of a null,
//! poisoning downstream statistics. It is detected and surfaced as a
//! data-quality alert distinct from ordinary unusability, because it means
//! an upstream bug is fabricating data rather than merely missing it.

mod gate;

pub use gate::{QualityGate, QualityVerdict, UnusableReason};

pub use crate::models::feature_vector::SampleQuality;

/// Sample-quality tier for `used` qualifying events against a window of
/// size `window`. The thresholds are relative to the window, never absolute.
pub fn sample_quality(used: u32, window: u32) -> SampleQuality {
    SampleQuality::from_window(used, window)
}
