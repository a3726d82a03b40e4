//! Downstream stage invocation seam.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OrchestrationConfig;
use crate::constants::PipelineStage;
use crate::error::{PropcastError, Result};

/// Entry point of the next stage.
///
/// Invocation happens outside any transaction and may take seconds; the
/// call itself must carry a bounded timeout. Retry lives with the caller
/// (one attempt per delivered signal), never inside the invoker.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(&self, stage: PipelineStage, date: NaiveDate) -> Result<()>;
}

/// HTTP invoker posting to each stage's configured entry-point URL.
#[derive(Debug, Clone)]
pub struct HttpStageInvoker {
    client: Client,
    config: OrchestrationConfig,
}

impl HttpStageInvoker {
    pub fn new(config: OrchestrationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.invoke_timeout_ms))
            .build()
            .map_err(|e| {
                PropcastError::configuration(format!("cannot build invoker HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl StageInvoker for HttpStageInvoker {
    async fn invoke(&self, stage: PipelineStage, date: NaiveDate) -> Result<()> {
        let endpoint = self.config.stage_endpoint(stage).ok_or_else(|| {
            PropcastError::configuration(format!("no entry-point URL for stage '{stage}'"))
        })?;

        debug!(stage = %stage, date = %date, endpoint = %endpoint, "Invoking next stage");

        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "stage": stage, "date": date }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PropcastError::timeout("invoke_next_stage", self.config.invoke_timeout_ms)
                } else {
                    PropcastError::upstream_unavailable(format!("stage '{stage}' entry point: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            stage = %stage,
            date = %date,
            status = %status,
            "Next stage rejected invocation"
        );
        if status.is_client_error() {
            // Entry validation rejected the call; the completion record
            // stays ReadyPending and a later signal retries
            Err(PropcastError::orchestration(format!(
                "stage '{stage}' rejected invocation ({status}): {body}"
            )))
        } else {
            Err(PropcastError::upstream_unavailable(format!(
                "stage '{stage}' entry point returned {status}"
            )))
        }
    }
}

/// Scriptable invoker for tests: records calls and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingInvoker {
    calls: Mutex<Vec<(PipelineStage, NaiveDate)>>,
    failures_remaining: Mutex<u32>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` invocations before succeeding again
    pub fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock() = count;
    }

    /// Successful invocations in order; scripted failures are not recorded
    pub fn calls(&self) -> Vec<(PipelineStage, NaiveDate)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl StageInvoker for RecordingInvoker {
    async fn invoke(&self, stage: PipelineStage, date: NaiveDate) -> Result<()> {
        {
            let mut failures = self.failures_remaining.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(PropcastError::upstream_unavailable(
                    "scripted invocation failure",
                ));
            }
        }
        self.calls.lock().push((stage, date));
        Ok(())
    }
}
