//! # Stage Completion Record
//!
//! Durable per-`(stage, date)` record of which upstream producers have
//! reported completion, plus the trigger-state flag guarding the transition
//! to the next stage.
//!
//! The trigger state is deliberately two-phase: observing "ready" and
//! recording "triggered" are separate transactions, with the downstream
//! invocation happening between them. Collapsing them was the original
//! production defect this design exists to prevent: a record marked done
//! whose side effect never ran, with no redelivery to pick it back up.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::constants::PipelineStage;

/// Completeness policy for a processing run.
///
/// Determines which producer set is *required* for a stage to count as done,
/// not merely which producers are observed. The mode-to-required-set mapping
/// is configuration data; it is never inferred at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full slate run: every producer of the stage is required
    Full,
    /// Same-day incremental refresh: only the designated refresher producer
    SameDay,
    /// Historical replay over an already-ingested date
    Replay,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::SameDay => write!(f, "same_day"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "same_day" => Ok(Self::SameDay),
            "replay" => Ok(Self::Replay),
            _ => Err(format!("Invalid run mode: {s}")),
        }
    }
}

/// Trigger-state flag guarding the hand-off to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Required producer set not yet satisfied
    Waiting,
    /// Readiness committed; downstream invocation not yet confirmed
    ReadyPending,
    /// Downstream invocation returned success; terminal
    Triggered,
    /// Invocation attempts exhausted; re-armed by the next real signal
    TriggerFailed,
}

impl TriggerState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Triggered)
    }

    /// States from which an invocation attempt may proceed
    pub fn is_invocable(&self) -> bool {
        matches!(self, Self::ReadyPending)
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::ReadyPending => write!(f, "ready_pending"),
            Self::Triggered => write!(f, "triggered"),
            Self::TriggerFailed => write!(f, "trigger_failed"),
        }
    }
}

impl std::str::FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "ready_pending" => Ok(Self::ReadyPending),
            "triggered" => Ok(Self::Triggered),
            "trigger_failed" => Ok(Self::TriggerFailed),
            _ => Err(format!("Invalid trigger state: {s}")),
        }
    }
}

impl Default for TriggerState {
    fn default() -> Self {
        Self::Waiting
    }
}

/// Rejected trigger-state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid trigger transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TriggerState,
    pub to: TriggerState,
}

/// Durable completion record for one `(stage, date)` key.
///
/// Created on the first producer signal, mutated by every subsequent signal,
/// terminal once `trigger_state` reaches `Triggered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCompletion {
    pub stage: PipelineStage,
    pub date: NaiveDate,
    pub mode: RunMode,
    pub required_producers: BTreeSet<String>,
    pub completed_producers: BTreeSet<String>,
    pub trigger_state: TriggerState,
    /// Durable count of failed downstream invocation attempts, backing the
    /// bounded-retry alert rule
    pub trigger_attempts: u32,
    pub triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StageCompletion {
    pub fn new(
        stage: PipelineStage,
        date: NaiveDate,
        mode: RunMode,
        required_producers: BTreeSet<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            stage,
            date,
            mode,
            required_producers,
            completed_producers: BTreeSet::new(),
            trigger_state: TriggerState::Waiting,
            trigger_attempts: 0,
            triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a producer completion. Returns true if the producer was new.
    pub fn record_producer(&mut self, producer_id: &str) -> bool {
        let added = self.completed_producers.insert(producer_id.to_string());
        if added {
            self.updated_at = Utc::now();
        }
        added
    }

    /// Whether the mode's required set is satisfied.
    ///
    /// Only the required set matters: optional producers still outstanding
    /// never make a satisfied record read as incomplete.
    pub fn is_satisfied(&self) -> bool {
        self.required_producers
            .is_subset(&self.completed_producers)
    }

    /// Promote `Waiting` to `ReadyPending` when the required set is
    /// satisfied. Returns true if the promotion happened in this call.
    pub fn promote_if_ready(&mut self) -> bool {
        if self.trigger_state == TriggerState::Waiting && self.is_satisfied() {
            self.trigger_state = TriggerState::ReadyPending;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Record a successful downstream invocation. Idempotent: calling on an
    /// already-`Triggered` record is a no-op.
    pub fn mark_triggered(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        match self.trigger_state {
            TriggerState::Triggered => Ok(()),
            TriggerState::ReadyPending => {
                self.trigger_state = TriggerState::Triggered;
                self.triggered_at = Some(at);
                self.updated_at = Utc::now();
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                to: TriggerState::Triggered,
            }),
        }
    }

    /// Record one failed invocation attempt; returns the new attempt count.
    pub fn note_trigger_attempt(&mut self) -> u32 {
        self.trigger_attempts += 1;
        self.updated_at = Utc::now();
        self.trigger_attempts
    }

    /// Advance `ReadyPending` to `TriggerFailed` once attempts are exhausted.
    pub fn mark_trigger_failed(&mut self) -> Result<(), InvalidTransition> {
        match self.trigger_state {
            TriggerState::ReadyPending | TriggerState::TriggerFailed => {
                self.trigger_state = TriggerState::TriggerFailed;
                self.updated_at = Utc::now();
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                to: TriggerState::TriggerFailed,
            }),
        }
    }

    /// Re-arm a failed record so a later real signal can retry the
    /// invocation. Returns true if the state changed.
    pub fn rearm(&mut self) -> bool {
        if self.trigger_state == TriggerState::TriggerFailed {
            self.trigger_state = TriggerState::ReadyPending;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(required: &[&str]) -> StageCompletion {
        StageCompletion::new(
            PipelineStage::Analytics,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            RunMode::Full,
            required.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_satisfaction_tracks_required_set_only() {
        let mut rec = sample_record(&["box_scores", "play_by_play"]);
        assert!(!rec.is_satisfied());

        rec.record_producer("box_scores");
        rec.record_producer("injury_report"); // observed but not required
        assert!(!rec.is_satisfied());

        rec.record_producer("play_by_play");
        assert!(rec.is_satisfied());
    }

    #[test]
    fn test_promotion_only_from_waiting() {
        let mut rec = sample_record(&["box_scores"]);
        rec.record_producer("box_scores");
        assert!(rec.promote_if_ready());
        assert_eq!(rec.trigger_state, TriggerState::ReadyPending);

        // Second promotion attempt is a no-op
        assert!(!rec.promote_if_ready());
    }

    #[test]
    fn test_triggered_requires_ready_pending() {
        let mut rec = sample_record(&["box_scores"]);
        let err = rec.mark_triggered(Utc::now()).unwrap_err();
        assert_eq!(err.from, TriggerState::Waiting);

        rec.record_producer("box_scores");
        rec.promote_if_ready();
        rec.mark_triggered(Utc::now()).unwrap();
        assert_eq!(rec.trigger_state, TriggerState::Triggered);
        assert!(rec.triggered_at.is_some());

        // Idempotent once triggered
        rec.mark_triggered(Utc::now()).unwrap();
        assert_eq!(rec.trigger_state, TriggerState::Triggered);
    }

    #[test]
    fn test_failed_records_rearm() {
        let mut rec = sample_record(&["box_scores"]);
        rec.record_producer("box_scores");
        rec.promote_if_ready();
        rec.note_trigger_attempt();
        rec.note_trigger_attempt();
        rec.mark_trigger_failed().unwrap();
        assert_eq!(rec.trigger_state, TriggerState::TriggerFailed);

        assert!(rec.rearm());
        assert_eq!(rec.trigger_state, TriggerState::ReadyPending);
        assert_eq!(rec.trigger_attempts, 2);
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&RunMode::SameDay).unwrap();
        assert_eq!(json, "\"same_day\"");
        assert_eq!("replay".parse::<RunMode>().unwrap(), RunMode::Replay);
    }
}
