//! Shared harness for the integration tests.
//!
//! Wires the full pipeline (orchestrator, coordinator, worker) over the
//! in-memory store backends so tests exercise real control flow with no
//! external services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use propcast_core::config::PropcastConfig;
use propcast_core::coordinator::{BatchCoordinator, StagingConsolidator};
use propcast_core::events::EventPublisher;
use propcast_core::messaging::{InMemoryQueue, MessagingError, QueuePublisher};
use propcast_core::models::{FeatureSource, FeatureVector, SampleQuality};
use propcast_core::orchestration::{RecordingInvoker, StageOrchestrator};
use propcast_core::resilience::EntityBreakerRegistry;
use propcast_core::scoring::{Scorer, ScoringError};
use propcast_core::store::{
    InMemoryBatchStore, InMemoryCanonicalStore, InMemoryCompletionStore, InMemoryEntityUniverse,
    InMemoryFeatureStore, InMemoryLineSource, InMemoryLogSink, InMemoryStagingStore,
};
use propcast_core::worker::PredictionWorker;

/// The date every test fixture runs on
pub fn game_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
}

pub const SYSTEM_ID: &str = "points_v3";

/// Queue publisher that starts failing after a configured number of
/// successful publishes. Delegates to the in-memory queue otherwise.
pub struct FlakyQueue {
    inner: InMemoryQueue,
    allow: Mutex<Option<usize>>,
}

impl FlakyQueue {
    pub fn new() -> Self {
        Self {
            inner: InMemoryQueue::new(),
            allow: Mutex::new(None),
        }
    }

    /// Fail every publish after the next `count` successes
    pub fn fail_after(&self, count: usize) {
        *self.allow.lock() = Some(count);
    }

    /// Stop failing
    pub fn heal(&self) {
        *self.allow.lock() = None;
    }

    pub fn len(&self, queue_name: &str) -> usize {
        self.inner.len(queue_name)
    }

    pub fn drain(&self, queue_name: &str) -> Vec<Value> {
        self.inner.drain(queue_name)
    }

    pub fn messages(&self, queue_name: &str) -> Vec<Value> {
        self.inner.messages(queue_name)
    }
}

#[async_trait]
impl QueuePublisher for FlakyQueue {
    async fn publish(&self, queue_name: &str, payload: &Value) -> Result<i64, MessagingError> {
        {
            let mut allow = self.allow.lock();
            if let Some(remaining) = allow.as_mut() {
                if *remaining == 0 {
                    return Err(MessagingError::queue_operation(
                        queue_name,
                        "publish",
                        "injected publish failure",
                    ));
                }
                *remaining -= 1;
            }
        }
        self.inner.publish(queue_name, payload).await
    }
}

/// Fixed-output scorer for tests
pub struct FixedScorer {
    pub value: f64,
}

impl Scorer for FixedScorer {
    fn model_file(&self) -> &str {
        "points_v3_test.json"
    }

    fn score(&self, _features: &FeatureVector) -> Result<f64, ScoringError> {
        Ok(self.value)
    }
}

/// A clean feature vector that passes the default quality policy
pub fn good_features(entity_id: &str) -> FeatureVector {
    FeatureVector {
        entity_id: entity_id.to_string(),
        date: game_date(),
        values: vec![Some(24.0), Some(3.5), Some(0.31)],
        sources: vec![FeatureSource::Real; 3],
        quality_score: 88.0,
        sample_quality: SampleQuality::Good,
        window_used: 7,
        window_size: 10,
    }
}

/// Full in-memory pipeline fixture
pub struct PipelineHarness {
    pub config: Arc<PropcastConfig>,
    pub events: EventPublisher,
    pub completion_store: Arc<InMemoryCompletionStore>,
    pub batch_store: Arc<InMemoryBatchStore>,
    pub staging_store: Arc<InMemoryStagingStore>,
    pub canonical_store: Arc<InMemoryCanonicalStore>,
    pub feature_store: Arc<InMemoryFeatureStore>,
    pub line_source: Arc<InMemoryLineSource>,
    pub universe: Arc<InMemoryEntityUniverse>,
    pub log_sink: Arc<InMemoryLogSink>,
    pub queue: Arc<FlakyQueue>,
    pub invoker: Arc<RecordingInvoker>,
    pub breakers: Arc<EntityBreakerRegistry>,
    pub orchestrator: StageOrchestrator,
    pub coordinator: BatchCoordinator,
    pub worker: PredictionWorker,
}

impl PipelineHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PropcastConfig) -> Self {
        let config = Arc::new(config);
        let events = EventPublisher::new(256);

        let completion_store = Arc::new(InMemoryCompletionStore::new());
        let batch_store = Arc::new(InMemoryBatchStore::new());
        let staging_store = Arc::new(InMemoryStagingStore::new());
        let canonical_store = Arc::new(InMemoryCanonicalStore::new());
        let feature_store = Arc::new(InMemoryFeatureStore::new());
        let line_source = Arc::new(InMemoryLineSource::new());
        let universe = Arc::new(InMemoryEntityUniverse::new());
        let log_sink = Arc::new(InMemoryLogSink::new());
        let queue = Arc::new(FlakyQueue::new());
        let invoker = Arc::new(RecordingInvoker::new());
        let breakers = Arc::new(EntityBreakerRegistry::new(config.breaker.clone()));

        let orchestrator = StageOrchestrator::new(
            completion_store.clone(),
            invoker.clone(),
            events.clone(),
            config.orchestration.clone(),
        );

        let consolidator =
            StagingConsolidator::new(staging_store.clone(), canonical_store.clone());
        let coordinator = BatchCoordinator::new(
            batch_store.clone(),
            universe.clone(),
            line_source.clone(),
            queue.clone(),
            breakers.clone(),
            consolidator,
            events.clone(),
            config.dispatch.clone(),
        );

        let worker = PredictionWorker::new(
            feature_store.clone(),
            batch_store.clone(),
            staging_store.clone(),
            log_sink.clone(),
            breakers.clone(),
            Arc::new(FixedScorer { value: 24.0 }),
            events.clone(),
            config.clone(),
        );

        Self {
            config,
            events,
            completion_store,
            batch_store,
            staging_store,
            canonical_store,
            feature_store,
            line_source,
            universe,
            log_sink,
            queue,
            invoker,
            breakers,
            orchestrator,
            coordinator,
            worker,
        }
    }

    /// Seed `count` entities with schedule slots, lines, and clean features
    pub fn seed_entities(&self, count: usize) -> Vec<String> {
        let entities: Vec<String> = (0..count).map(|i| format!("entity_{i}")).collect();
        self.universe.set_entities(game_date(), entities.clone());
        for entity_id in &entities {
            self.line_source
                .set_line(entity_id, game_date(), SYSTEM_ID, 22.5);
            self.feature_store.insert(good_features(entity_id));
        }
        entities
    }
}

/// Config tuned for fast tests: no dispatch pacing, stale window wide
/// enough that fixture dates stay fresh relative to the wall clock.
pub fn test_config() -> PropcastConfig {
    let mut config = PropcastConfig::default();
    config.dispatch.inter_publish_delay_ms = 0;
    config.worker.stale_after_days =
        (Utc::now().date_naive() - game_date()).num_days() + 30;
    config
}
