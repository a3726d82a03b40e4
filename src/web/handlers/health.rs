//! Health check endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::web::state::AppState;

/// Response for the basic health probe
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Response for the deep health probe
#[derive(Debug, Serialize)]
pub struct DeepHealthResponse {
    pub status: String,
    pub timestamp: String,
    pub checks: HashMap<String, String>,
}

/// GET /health: liveness. Always available while the process runs.
pub async fn health(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /health/deep: also probes connectivity to the completion tracker
/// and the canonical store.
pub async fn deep_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<DeepHealthResponse>) {
    debug!("Performing deep health check");

    let mut checks = HashMap::new();
    let mut healthy = true;

    match state.completion_store.ping().await {
        Ok(()) => {
            checks.insert("completion_store".to_string(), "healthy".to_string());
        }
        Err(e) => {
            healthy = false;
            checks.insert("completion_store".to_string(), format!("unhealthy: {e}"));
        }
    }

    match state.canonical_store.ping().await {
        Ok(()) => {
            checks.insert("canonical_store".to_string(), "healthy".to_string());
        }
        Err(e) => {
            healthy = false;
            checks.insert("canonical_store".to_string(), format!("unhealthy: {e}"));
        }
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(DeepHealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            checks,
        }),
    )
}
