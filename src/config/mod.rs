//! # Configuration Management
//!
//! Serde-backed configuration for the prediction pipeline, loaded from YAML
//! with environment overlays (see [`loader`]). All tunables the spec treats
//! as configuration data live here: the mode-to-required-producer table,
//! per-system quality policies, breaker cooldown curve, staleness threshold,
//! and dispatch pacing. Nothing in this file is inferred at runtime.

pub mod loader;

pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::constants::PipelineStage;
use crate::error::{PropcastError, Result};
use crate::models::RunMode;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropcastConfig {
    /// Database connection and pooling
    pub database: DatabaseConfig,

    /// Stage orchestration: producer rosters, mode policies, trigger bounds
    pub orchestration: OrchestrationConfig,

    /// Coordinator dispatch pacing and queue names
    pub dispatch: DispatchConfig,

    /// Worker-side processing thresholds
    pub worker: WorkerConfig,

    /// Feature quality policies, global and per-system
    pub quality: QualityConfig,

    /// Per-entity circuit breaker tuning
    pub breaker: crate::resilience::BreakerConfig,

    /// Scoring artifact location
    pub scoring: ScoringConfig,

    /// Web API bind settings
    pub web: WebConfig,

    /// Event channel settings
    pub events: EventConfig,
}

impl Default for PropcastConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            orchestration: OrchestrationConfig::default(),
            dispatch: DispatchConfig::default(),
            worker: WorkerConfig::default(),
            quality: QualityConfig::default(),
            breaker: crate::resilience::BreakerConfig::default(),
            scoring: ScoringConfig::default(),
            web: WebConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl PropcastConfig {
    /// Validate cross-field consistency after loading.
    pub fn validate(&self) -> Result<()> {
        if self.orchestration.max_trigger_attempts == 0 {
            return Err(PropcastError::configuration(
                "orchestration.max_trigger_attempts must be at least 1",
            ));
        }
        if self.worker.stale_after_days < 0 {
            return Err(PropcastError::configuration(
                "worker.stale_after_days must be non-negative",
            ));
        }
        for (system_id, policy) in &self.quality.systems {
            if !(0.0..=100.0).contains(&policy.quality_floor) {
                return Err(PropcastError::configuration(format!(
                    "quality floor for system '{system_id}' must be in [0, 100]"
                )));
            }
            if policy.min_edge < 0.0 {
                return Err(PropcastError::configuration(format!(
                    "min_edge for system '{system_id}' must be non-negative"
                )));
            }
        }
        for stage in PipelineStage::ordered() {
            if !stage.is_terminal() && !self.orchestration.producers.contains_key(&stage.to_string())
            {
                return Err(PropcastError::configuration(format!(
                    "orchestration.producers missing roster for stage '{stage}'"
                )));
            }
        }
        Ok(())
    }

    /// Quality policy for one consuming system. Unknown systems are a
    /// permanent configuration error, never a silent default.
    pub fn system_quality(&self, system_id: &str) -> Result<&SystemQualityConfig> {
        self.quality.systems.get(system_id).ok_or_else(|| {
            PropcastError::configuration(format!("no quality policy for system '{system_id}'"))
        })
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub pool: u32,
    pub checkout_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "propcast_development".to_string(),
            username: "propcast".to_string(),
            password: String::new(),
            pool: 10,
            checkout_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL; DATABASE_URL wins when set
    pub fn url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// Stage orchestration configuration.
///
/// The mode-to-required-producer mapping is the part of this system that
/// historically rotted when treated as implicit knowledge; here it is
/// explicit data, keyed by stage name then mode name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Full producer roster per stage, keyed by stage name
    pub producers: HashMap<String, Vec<String>>,

    /// Required producer subset per stage for non-Full modes, keyed by
    /// stage name then mode name. Full mode always requires the whole
    /// roster and needs no entry here.
    pub mode_required: HashMap<String, HashMap<String, Vec<String>>>,

    /// Failed invocation attempts tolerated before a record advances to
    /// TriggerFailed and an operator alert fires
    pub max_trigger_attempts: u32,

    /// Bound on a single downstream invocation call
    pub invoke_timeout_ms: u64,

    /// Entry-point URL per stage for the HTTP stage invoker
    pub stage_endpoints: HashMap<String, String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        let mut producers = HashMap::new();
        producers.insert(
            "raw_ingest".to_string(),
            vec![
                "box_scores".to_string(),
                "play_by_play".to_string(),
                "injury_report".to_string(),
                "schedules".to_string(),
                "odds_lines".to_string(),
            ],
        );
        producers.insert(
            "analytics".to_string(),
            vec!["rolling_averages".to_string(), "matchup_scores".to_string()],
        );
        producers.insert("features".to_string(), vec!["feature_cache".to_string()]);

        let mut mode_required = HashMap::new();
        let mut raw_same_day = HashMap::new();
        raw_same_day.insert("same_day".to_string(), vec!["odds_lines".to_string()]);
        raw_same_day.insert("replay".to_string(), vec!["box_scores".to_string()]);
        mode_required.insert("raw_ingest".to_string(), raw_same_day);

        Self {
            producers,
            mode_required,
            max_trigger_attempts: 3,
            invoke_timeout_ms: 10_000,
            stage_endpoints: HashMap::new(),
        }
    }
}

impl OrchestrationConfig {
    /// Required producer set for a `(stage, mode)` pair.
    ///
    /// Full mode requires the stage's whole roster. Other modes must have an
    /// explicit entry; a missing entry is a permanent configuration error,
    /// because guessing a required set is exactly how false completeness
    /// alerts are born.
    pub fn required_producers(
        &self,
        stage: PipelineStage,
        mode: RunMode,
    ) -> Result<BTreeSet<String>> {
        let stage_key = stage.to_string();
        match mode {
            RunMode::Full => self
                .producers
                .get(&stage_key)
                .map(|roster| roster.iter().cloned().collect())
                .ok_or_else(|| {
                    PropcastError::configuration(format!(
                        "no producer roster configured for stage '{stage_key}'"
                    ))
                }),
            RunMode::SameDay | RunMode::Replay => self
                .mode_required
                .get(&stage_key)
                .and_then(|by_mode| by_mode.get(&mode.to_string()))
                .map(|required| required.iter().cloned().collect())
                .ok_or_else(|| {
                    PropcastError::configuration(format!(
                        "no required-producer set configured for stage '{stage_key}' mode '{mode}'"
                    ))
                }),
        }
    }

    pub fn stage_endpoint(&self, stage: PipelineStage) -> Option<&str> {
        self.stage_endpoints.get(&stage.to_string()).map(String::as_str)
    }
}

/// Coordinator dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Fixed delay between successive work-item publishes. Deliberate
    /// backpressure for the queue autoscaler, not an optimization knob.
    pub inter_publish_delay_ms: u64,

    /// Queue carrying work items to the worker fleet
    pub work_queue: String,

    /// Queue carrying completion signals to the orchestrator
    pub completion_queue: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            inter_publish_delay_ms: 10,
            work_queue: "prediction_work_items".to_string(),
            completion_queue: "stage_completion_signals".to_string(),
        }
    }
}

/// Worker processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Work items older than this many days are acknowledged unprocessed
    pub stale_after_days: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { stale_after_days: 1 }
    }
}

/// Quality gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Sentinel constants screened for in default-sourced features,
    /// extending the built-in list
    pub sentinels: Vec<f64>,

    /// Per-system quality policies, keyed by system id
    pub systems: HashMap<String, SystemQualityConfig>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let mut systems = HashMap::new();
        systems.insert("points_v3".to_string(), SystemQualityConfig::default());
        Self {
            sentinels: crate::constants::system::KNOWN_SENTINELS.to_vec(),
            systems,
        }
    }
}

/// Quality thresholds for one consuming system.
///
/// Tunable per system because different scoring artifacts depend on
/// different feature subsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemQualityConfig {
    /// Quality score below this is unusable
    pub quality_floor: f64,

    /// Default-sourced features tolerated before the record is unusable
    pub max_default_features: usize,

    /// Feature indices that must be Real-sourced for this system
    pub critical_features: Vec<usize>,

    /// Minimum |predicted - line| edge for a directional recommendation
    pub min_edge: f64,
}

impl Default for SystemQualityConfig {
    fn default() -> Self {
        Self {
            quality_floor: 40.0,
            max_default_features: 3,
            critical_features: Vec::new(),
            min_edge: 0.5,
        }
    }
}

/// Scoring artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Directory holding versioned artifact files
    pub artifact_dir: String,

    /// Artifact file per system id
    pub artifacts: HashMap<String, String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            artifact_dir: "artifacts".to_string(),
            artifacts: HashMap::new(),
        }
    }
}

/// Web API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
    pub request_timeout_seconds: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = PropcastConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_required_producers_full_mode_uses_roster() {
        let config = OrchestrationConfig::default();
        let required = config
            .required_producers(PipelineStage::RawIngest, RunMode::Full)
            .unwrap();
        assert_eq!(required.len(), 5);
        assert!(required.contains("box_scores"));
    }

    #[test]
    fn test_required_producers_same_day_uses_subset() {
        let config = OrchestrationConfig::default();
        let required = config
            .required_producers(PipelineStage::RawIngest, RunMode::SameDay)
            .unwrap();
        assert_eq!(required.len(), 1);
        assert!(required.contains("odds_lines"));
    }

    #[test]
    fn test_required_producers_unconfigured_mode_errors() {
        let config = OrchestrationConfig::default();
        let err = config
            .required_producers(PipelineStage::Analytics, RunMode::SameDay)
            .unwrap_err();
        assert!(format!("{err}").contains("same_day"));
    }

    #[test]
    fn test_unknown_system_quality_errors() {
        let config = PropcastConfig::default();
        assert!(config.system_quality("points_v3").is_ok());
        assert!(config.system_quality("rebounds_v1").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_floor() {
        let mut config = PropcastConfig::default();
        config
            .quality
            .systems
            .get_mut("points_v3")
            .unwrap()
            .quality_floor = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_trigger_attempts() {
        let mut config = PropcastConfig::default();
        config.orchestration.max_trigger_attempts = 0;
        assert!(config.validate().is_err());
    }
}
