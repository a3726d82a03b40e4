//! # Data Model Layer
//!
//! Core domain types for the prediction pipeline: stage completion records,
//! work batches, feature vectors with provenance, and prediction records in
//! staged and canonical form. Illegal states are kept unrepresentable:
//! modes, trigger states, batch statuses, provenance tags, and skip reasons
//! are all closed enums, never free-form strings.

pub mod execution_log;
pub mod feature_vector;
pub mod prediction_record;
pub mod stage_completion;
pub mod work_batch;

pub use execution_log::{ExecutionLog, ExecutionOutcome};
pub use feature_vector::{FeatureSource, FeatureVector, SampleQuality};
pub use prediction_record::{PredictionRecord, Recommendation, StagedPrediction};
pub use stage_completion::{InvalidTransition, RunMode, StageCompletion, TriggerState};
pub use work_batch::{BatchStatus, WorkBatch};
