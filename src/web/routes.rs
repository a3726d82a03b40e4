//! Route table.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{control, health, push};
use super::state::AppState;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Coordinator control
        .route("/start", post(control::start_batch))
        .route("/consolidate", post(control::consolidate))
        .route("/dispatch/remainder", post(control::dispatch_remainder))
        .route("/reset", post(control::reset))
        .route("/batches/:batch_id", get(control::get_batch))
        // Push delivery
        .route("/push/completion", post(push::completion_signal))
        .route("/push/work", post(push::work_item))
        // Health
        .route("/health", get(health::health))
        .route("/health/deep", get(health::deep_health))
        .with_state(state)
}
