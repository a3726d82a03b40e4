//! Versioned, file-addressable scoring function.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::models::FeatureVector;

/// Errors from artifact loading and scoring
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Failed to read artifact {path}: {source}")]
    ArtifactRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse artifact {path}: {source}")]
    ArtifactParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Feature width mismatch: artifact expects {expected}, vector has {actual}")]
    FeatureWidth { expected: usize, actual: usize },
}

/// Scoring seam the worker calls through.
///
/// Implementations must be pure with respect to the feature vector: the
/// same input always yields the same value, so redelivered work items
/// re-stage identical predictions.
pub trait Scorer: Send + Sync {
    /// Artifact file name recorded on every prediction for provenance
    fn model_file(&self) -> &str;

    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError>;
}

/// On-disk artifact format produced by the training pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactFile {
    version: String,
    weights: Vec<f64>,
    intercept: f64,
}

/// Linear scoring artifact loaded from a JSON file.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    model_file: String,
    version: String,
    weights: Vec<f64>,
    intercept: f64,
}

impl ModelArtifact {
    /// Load an artifact from disk. The file name (not the full path) is
    /// what gets stamped onto predictions.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScoringError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ScoringError::ArtifactRead {
            path: display.clone(),
            source,
        })?;
        let parsed: ArtifactFile =
            serde_json::from_str(&raw).map_err(|source| ScoringError::ArtifactParse {
                path: display.clone(),
                source,
            })?;

        let model_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);

        info!(
            model_file = %model_file,
            version = %parsed.version,
            feature_width = parsed.weights.len(),
            "Scoring artifact loaded"
        );

        Ok(Self {
            model_file,
            version: parsed.version,
            weights: parsed.weights,
            intercept: parsed.intercept,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn feature_width(&self) -> usize {
        self.weights.len()
    }
}

impl Scorer for ModelArtifact {
    fn model_file(&self) -> &str {
        &self.model_file
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let dense = features.dense_values();
        if dense.len() != self.weights.len() {
            return Err(ScoringError::FeatureWidth {
                expected: self.weights.len(),
                actual: dense.len(),
            });
        }
        let dot: f64 = self
            .weights
            .iter()
            .zip(dense.iter())
            .map(|(w, v)| w * v)
            .sum();
        Ok(self.intercept + dot)
    }
}
