//! Push-delivery endpoints.
//!
//! The queue provider POSTs messages here. Status codes are the contract:
//! 2xx acknowledges, 4xx-class acknowledges as a permanent skip (no
//! redelivery), 5xx negative-acknowledges for provider-managed redelivery
//! with backoff.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tracing::debug;

use crate::error::ErrorClass;
use crate::messaging::{CompletionSignal, WorkItem};
use crate::web::state::AppState;
use crate::worker::WorkOutcome;

/// POST /push/completion: completion-signal delivery to the orchestrator.
///
/// Invocation failures return 200: the retry path is the next real signal,
/// not a tight redelivery loop of this one. Only transient store errors
/// earn a 503.
pub async fn completion_signal(
    State(state): State<AppState>,
    Json(signal): Json<CompletionSignal>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.orchestrator.handle_completion(&signal).await {
        Ok(outcome) => {
            debug!(stage = %signal.stage, outcome = ?outcome, "Completion signal handled");
            (StatusCode::OK, Json(json!({ "outcome": outcome })))
        }
        Err(e) if e.class() == ErrorClass::Transient => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            // Permanent (bad mode, unknown stage config): ack so the
            // provider stops redelivering; aggregate rate is monitored
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// POST /push/work: work-item delivery to the worker.
pub async fn work_item(
    State(state): State<AppState>,
    Json(item): Json<WorkItem>,
) -> (StatusCode, Json<serde_json::Value>) {
    let outcome = state.worker.process(&item).await;
    let status = match &outcome {
        WorkOutcome::Ack { .. } => StatusCode::OK,
        WorkOutcome::PermanentSkip { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkOutcome::Retryable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "outcome": outcome })))
}
