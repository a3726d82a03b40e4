//! # Scoring Artifacts
//!
//! The model training pipeline is an external collaborator; what this core
//! sees is a versioned, file-addressable scoring function. `Scorer` is the
//! seam workers call through; `ModelArtifact` is the production
//! implementation, a linear scorer loaded from a JSON artifact file whose
//! file name travels with every prediction for provenance.

mod artifact;

pub use artifact::{ModelArtifact, Scorer, ScoringError};
