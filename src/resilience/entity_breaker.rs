//! Per-entity failure counting with exponential cooldown.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Breaker tuning parameters, loaded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures at which the breaker trips
    pub failure_threshold: u32,
    /// Cooldown applied at the threshold; doubles per additional failure
    pub base_cooldown_seconds: u64,
    /// Cooldown ceiling
    pub max_cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown_seconds: 300,
            max_cooldown_seconds: 14_400,
        }
    }
}

impl BreakerConfig {
    /// Cooldown for a given consecutive-failure count, exponential past the
    /// threshold and capped at the configured ceiling.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Duration {
        let excess = consecutive_failures.saturating_sub(self.failure_threshold);
        let exponent = excess.min(16);
        let seconds = self
            .base_cooldown_seconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_cooldown_seconds);
        Duration::seconds(seconds as i64)
    }
}

/// Per-entity breaker state, created lazily on first failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerState {
    pub entity_id: String,
    pub consecutive_failures: u32,
    pub tripped_until: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            consecutive_failures: 0,
            tripped_until: None,
        }
    }

    /// Whether this state reads as tripped at `now`
    pub fn is_tripped_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.tripped_until, Some(until) if until > now)
    }
}

/// Registry of per-entity circuit breakers.
///
/// Consulted by the coordinator before including an entity in a batch and
/// by the worker when deciding whether a failure is worth redelivering.
/// Lock-free reads via dashmap; entities with no recorded failures carry
/// no entry at all.
#[derive(Debug)]
pub struct EntityBreakerRegistry {
    states: DashMap<String, BreakerState>,
    config: BreakerConfig,
}

impl EntityBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            config,
        }
    }

    /// Record a transient failure for an entity. Returns true if this
    /// failure tripped (or extended the trip of) the breaker.
    pub fn record_failure(&self, entity_id: &str) -> bool {
        let now = Utc::now();
        let mut entry = self
            .states
            .entry(entity_id.to_string())
            .or_insert_with(|| BreakerState::new(entity_id));

        entry.consecutive_failures += 1;
        let tripped = entry.consecutive_failures >= self.config.failure_threshold;
        if tripped {
            let cooldown = self.config.cooldown_for(entry.consecutive_failures);
            entry.tripped_until = Some(now + cooldown);
            info!(
                entity_id = %entity_id,
                consecutive_failures = entry.consecutive_failures,
                cooldown_seconds = cooldown.num_seconds(),
                "Entity circuit breaker tripped"
            );
        } else {
            debug!(
                entity_id = %entity_id,
                consecutive_failures = entry.consecutive_failures,
                "Transient failure recorded"
            );
        }
        tripped
    }

    /// Reset an entity's breaker after a successful execution.
    pub fn record_success(&self, entity_id: &str) {
        if let Some(mut entry) = self.states.get_mut(entity_id) {
            if entry.consecutive_failures > 0 {
                debug!(entity_id = %entity_id, "Entity circuit breaker reset");
            }
            entry.consecutive_failures = 0;
            entry.tripped_until = None;
        }
    }

    /// Read-only trip check. Entities with no failure history are never
    /// tripped.
    pub fn is_tripped(&self, entity_id: &str) -> bool {
        self.states
            .get(entity_id)
            .map(|state| state.is_tripped_at(Utc::now()))
            .unwrap_or(false)
    }

    /// Snapshot of one entity's state, if any failures were recorded
    pub fn state(&self, entity_id: &str) -> Option<BreakerState> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Entities currently tripped, for operational visibility
    pub fn tripped_entities(&self) -> Vec<String> {
        let now = Utc::now();
        self.states
            .iter()
            .filter(|entry| entry.is_tripped_at(now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}
