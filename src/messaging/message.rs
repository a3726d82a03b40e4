//! Queue payload structures.
//!
//! Two message shapes cross the queues: completion signals from ingestion
//! producers to the stage orchestrator, and work items from the coordinator
//! to the worker fleet.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PipelineStage;
use crate::models::RunMode;

/// Signal that one producer has finished its share of a stage for a date.
///
/// Delivered at-least-once; the orchestrator treats duplicates as free
/// retry opportunities for a pending trigger, never as new information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub stage: PipelineStage,
    pub date: NaiveDate,
    pub producer_id: String,
    pub mode: RunMode,
    /// When the producer emitted the signal
    pub emitted_at: DateTime<Utc>,
}

impl CompletionSignal {
    pub fn new(
        stage: PipelineStage,
        date: NaiveDate,
        producer_id: impl Into<String>,
        mode: RunMode,
    ) -> Self {
        Self {
            stage,
            date,
            producer_id: producer_id.into(),
            mode,
            emitted_at: Utc::now(),
        }
    }
}

/// One entity's worth of prediction work.
///
/// The payload deliberately carries ids only: reference lines and feature
/// data are read back from the durable stores at consumption time, so a
/// message that sits in a backlog never acts on stale inline data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub entity_id: String,
    pub batch_id: Uuid,
    pub date: NaiveDate,
    pub system_id: String,
    /// Delivery attempt, starting at 0 for the original publish
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        entity_id: impl Into<String>,
        batch_id: Uuid,
        date: NaiveDate,
        system_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            batch_id,
            date,
            system_id: system_id.into(),
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Copy for redelivery with the attempt counter advanced
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_signal_round_trip() {
        let signal = CompletionSignal::new(
            PipelineStage::RawIngest,
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            "box_scores",
            RunMode::Full,
        );
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"raw_ingest\""));
        assert!(json.contains("\"full\""));
        let parsed: CompletionSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, signal);
    }

    #[test]
    fn test_work_item_attempt_advances() {
        let item = WorkItem::new(
            "e1",
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            "points_v3",
        );
        assert_eq!(item.attempt, 0);
        let redelivered = item.next_attempt();
        assert_eq!(redelivered.attempt, 1);
        assert_eq!(redelivered.entity_id, item.entity_id);
    }
}
