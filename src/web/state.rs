//! Shared application state for the web API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::PropcastConfig;
use crate::coordinator::BatchCoordinator;
use crate::error::{ErrorClass, PropcastError};
use crate::orchestration::StageOrchestrator;
use crate::store::{CanonicalStore, CompletionStore};
use crate::worker::PredictionWorker;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PropcastConfig>,
    pub orchestrator: Arc<StageOrchestrator>,
    pub coordinator: Arc<BatchCoordinator>,
    pub worker: Arc<PredictionWorker>,
    pub completion_store: Arc<dyn CompletionStore>,
    pub canonical_store: Arc<dyn CanonicalStore>,
}

/// HTTP-facing error wrapper.
///
/// Transient errors surface as 503 so the push provider redelivers;
/// permanent ones surface as 4xx and are acknowledged by the provider.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<PropcastError> for ApiError {
    fn from(err: PropcastError) -> Self {
        let status = match err.class() {
            ErrorClass::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorClass::Permanent => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
