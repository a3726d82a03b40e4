//! Coordinator control endpoints.

use axum::extract::State;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::coordinator::{ConsolidationResult, DispatchResult};
use crate::models::RunMode;
use crate::web::state::{ApiError, ApiResult, AppState};

/// Request body for POST /start
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    pub date: NaiveDate,
    pub system_id: String,
    pub mode: RunMode,
}

/// Response for POST /start
#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub batch_id: Uuid,
    pub entity_count: usize,
    pub dispatch: DispatchResult,
}

/// POST /start: build a batch and dispatch it.
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<Json<StartBatchResponse>> {
    info!(
        date = %request.date,
        system_id = %request.system_id,
        mode = %request.mode,
        "Batch start requested"
    );

    let batch = state
        .coordinator
        .start_batch(request.date, &request.system_id, request.mode)
        .await?;
    let entity_count = batch.entity_ids.len();
    let dispatch = state.coordinator.dispatch(batch.batch_id).await?;

    Ok(Json(StartBatchResponse {
        batch_id: batch.batch_id,
        entity_count,
        dispatch,
    }))
}

/// Request body for POST /consolidate
#[derive(Debug, Deserialize)]
pub struct ConsolidateRequest {
    pub batch_id: Uuid,
}

/// POST /consolidate: merge staged results for a batch.
pub async fn consolidate(
    State(state): State<AppState>,
    Json(request): Json<ConsolidateRequest>,
) -> ApiResult<Json<ConsolidationResult>> {
    let result = state.coordinator.consolidate(request.batch_id).await?;
    Ok(Json(result))
}

/// Request body for POST /dispatch/remainder
#[derive(Debug, Deserialize)]
pub struct RemainderRequest {
    pub batch_id: Uuid,
}

/// POST /dispatch/remainder: republish only the un-enqueued tail of a
/// partially failed batch.
pub async fn dispatch_remainder(
    State(state): State<AppState>,
    Json(request): Json<RemainderRequest>,
) -> ApiResult<Json<DispatchResult>> {
    let result = state
        .coordinator
        .dispatch_remainder(request.batch_id)
        .await?;
    Ok(Json(result))
}

/// Response for POST /reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset_batch_ids: Vec<Uuid>,
}

/// POST /reset: abort all in-flight batch state.
pub async fn reset(State(state): State<AppState>) -> ApiResult<Json<ResetResponse>> {
    let reset_batch_ids = state.coordinator.reset().await?;
    Ok(Json(ResetResponse { reset_batch_ids }))
}

/// GET /batches/{batch_id}: batch status for operators.
pub async fn get_batch(
    State(state): State<AppState>,
    axum::extract::Path(batch_id): axum::extract::Path<Uuid>,
) -> ApiResult<Json<crate::models::WorkBatch>> {
    state
        .coordinator
        .batch(batch_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no batch {batch_id}")))
}
