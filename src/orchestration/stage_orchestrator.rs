//! Two-phase stage trigger handling.
//!
//! The handler never persists "triggered" in the transaction that observed
//! readiness. Phase one commits the decision (`ReadyPending`); the
//! downstream invocation runs outside any transaction; phase two commits
//! the outcome (`Triggered`) only after the call returned success. A
//! failure in between leaves `ReadyPending` for the next signal to retry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::invoker::StageInvoker;
use crate::config::OrchestrationConfig;
use crate::constants::{events, PipelineStage};
use crate::error::{PropcastError, Result};
use crate::events::EventPublisher;
use crate::messaging::CompletionSignal;
use crate::models::TriggerState;
use crate::store::CompletionStore;

/// What one completion signal amounted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TriggerOutcome {
    /// Required set not yet satisfied
    Waiting,
    /// Invocation succeeded; trigger state committed as Triggered
    Triggered { next_stage: PipelineStage },
    /// Final stage readiness; nothing downstream to invoke
    PipelineComplete,
    /// Invocation failed; record stays ReadyPending for a later signal
    InvokeFailed { attempts: u32 },
    /// Attempts exhausted; record advanced to TriggerFailed and alerted
    AttemptsExhausted { attempts: u32 },
    /// Record was already Triggered; duplicate signal acknowledged
    AlreadyTriggered,
}

/// Orchestrates stage hand-offs from producer completion signals.
pub struct StageOrchestrator {
    completion_store: Arc<dyn CompletionStore>,
    invoker: Arc<dyn StageInvoker>,
    events: EventPublisher,
    config: OrchestrationConfig,
}

impl StageOrchestrator {
    pub fn new(
        completion_store: Arc<dyn CompletionStore>,
        invoker: Arc<dyn StageInvoker>,
        events: EventPublisher,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            completion_store,
            invoker,
            events,
            config,
        }
    }

    /// Handle one producer completion signal.
    ///
    /// Duplicate and late signals are welcome: each one re-checks the
    /// record and, while it reads `ReadyPending` (or re-arms a
    /// `TriggerFailed`), retries the downstream invocation. Exactly one
    /// invocation attempt happens per delivered signal.
    #[instrument(skip(self), fields(stage = %signal.stage, date = %signal.date, producer_id = %signal.producer_id))]
    pub async fn handle_completion(&self, signal: &CompletionSignal) -> Result<TriggerOutcome> {
        // Unknown (stage, mode) pairings surface here as a permanent
        // configuration error before any state is touched
        let required = self
            .config
            .required_producers(signal.stage, signal.mode)?;

        let record = self
            .completion_store
            .record_producer(
                signal.stage,
                signal.date,
                &signal.producer_id,
                signal.mode,
                required,
            )
            .await?;

        self.events.publish(
            events::STAGE_PRODUCER_COMPLETED,
            json!({
                "stage": signal.stage,
                "date": signal.date,
                "producer_id": signal.producer_id,
                "completed": record.completed_producers.len(),
                "required": record.required_producers.len(),
            }),
        );

        match record.trigger_state {
            TriggerState::Waiting => Ok(TriggerOutcome::Waiting),
            TriggerState::Triggered => Ok(TriggerOutcome::AlreadyTriggered),
            TriggerState::TriggerFailed => {
                // A real signal re-arms the record and earns one more attempt
                if self
                    .completion_store
                    .rearm(signal.stage, signal.date)
                    .await?
                {
                    info!(stage = %signal.stage, date = %signal.date, "Re-armed failed trigger");
                }
                self.attempt_trigger(signal).await
            }
            TriggerState::ReadyPending => self.attempt_trigger(signal).await,
        }
    }

    /// One bounded invocation attempt from `ReadyPending`.
    async fn attempt_trigger(&self, signal: &CompletionSignal) -> Result<TriggerOutcome> {
        let stage = signal.stage;
        let date = signal.date;

        let Some(next_stage) = stage.next() else {
            // Final stage: readiness is completion, nothing to invoke
            self.completion_store
                .mark_triggered(stage, date, Utc::now())
                .await?;
            info!(stage = %stage, date = %date, "Final stage complete");
            return Ok(TriggerOutcome::PipelineComplete);
        };

        self.events.publish(
            events::STAGE_READY,
            json!({ "stage": stage, "date": date, "next_stage": next_stage }),
        );

        let invocation = tokio::time::timeout(
            Duration::from_millis(self.config.invoke_timeout_ms),
            self.invoker.invoke(next_stage, date),
        )
        .await
        .unwrap_or_else(|_| {
            Err(PropcastError::timeout(
                "invoke_next_stage",
                self.config.invoke_timeout_ms,
            ))
        });

        match invocation {
            Ok(()) => {
                // Outcome transaction, separate from the readiness one.
                // Idempotent: a concurrent handler landing first is fine.
                self.completion_store
                    .mark_triggered(stage, date, Utc::now())
                    .await?;
                self.events.publish(
                    events::STAGE_TRIGGERED,
                    json!({ "stage": stage, "date": date, "next_stage": next_stage }),
                );
                info!(stage = %stage, date = %date, next_stage = %next_stage, "Next stage triggered");
                Ok(TriggerOutcome::Triggered { next_stage })
            }
            Err(e) => {
                let attempts = self
                    .completion_store
                    .note_trigger_attempt(stage, date)
                    .await?;
                warn!(
                    stage = %stage,
                    date = %date,
                    attempts,
                    error = %e,
                    "Next-stage invocation failed"
                );

                if attempts >= self.config.max_trigger_attempts {
                    self.completion_store.mark_trigger_failed(stage, date).await?;
                    self.events.publish(
                        events::STAGE_TRIGGER_FAILED,
                        json!({
                            "stage": stage,
                            "date": date,
                            "attempts": attempts,
                            "error": e.to_string(),
                        }),
                    );
                    error!(
                        stage = %stage,
                        date = %date,
                        attempts,
                        "Trigger attempts exhausted; operator attention required"
                    );
                    Ok(TriggerOutcome::AttemptsExhausted { attempts })
                } else {
                    Ok(TriggerOutcome::InvokeFailed { attempts })
                }
            }
        }
    }
}
