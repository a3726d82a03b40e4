//! Work-item processing: staleness, quality gating, contamination alerts,
//! transient-vs-permanent classification, and breaker feedback.

mod common;

use chrono::{Duration, Utc};
use common::{game_date, good_features, PipelineHarness, SYSTEM_ID};
use propcast_core::constants::events;
use propcast_core::messaging::WorkItem;
use propcast_core::models::{
    ExecutionOutcome, FeatureSource, Recommendation, RunMode, SampleQuality,
};
use propcast_core::store::StagingStore;
use propcast_core::worker::WorkOutcome;
use uuid::Uuid;

async fn dispatched_items(h: &PipelineHarness, entities: usize) -> Vec<WorkItem> {
    h.seed_entities(entities);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    h.coordinator.dispatch(batch.batch_id).await.unwrap();
    h.queue
        .drain(&h.config.dispatch.work_queue)
        .into_iter()
        .map(|m| serde_json::from_value(m).unwrap())
        .collect()
}

#[tokio::test]
async fn clean_item_stages_a_prediction() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;

    let outcome = h.worker.process(&items[0]).await;
    assert_eq!(outcome, WorkOutcome::Ack { staged: true });

    let staged = h
        .staging_store
        .staged_for(game_date(), SYSTEM_ID)
        .await
        .unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].entity_id, "entity_0");
    // FixedScorer says 24.0 against a 22.5 line with min_edge 0.5
    assert_eq!(staged[0].recommendation, Recommendation::Over);
    // quality 88 with the Good tier factor 0.9
    assert!((staged[0].confidence - 0.792).abs() < 1e-9);

    let logs = h.log_sink.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, ExecutionOutcome::Staged);
}

#[tokio::test]
async fn stale_item_is_acked_without_staging() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;
    let mut events_rx = h.events.subscribe();

    let mut stale = items[0].clone();
    stale.date = Utc::now().date_naive()
        - Duration::days(h.config.worker.stale_after_days + 1);

    let outcome = h.worker.process(&stale).await;
    assert_eq!(outcome, WorkOutcome::Ack { staged: false });

    // Nothing read, nothing staged, nothing against the breaker
    assert!(h.staging_store.is_empty());
    assert!(!h.breakers.is_tripped(&stale.entity_id));

    let logs = h.log_sink.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, ExecutionOutcome::StaleDropped);

    let mut saw_drop = false;
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::STALE_ITEM_DROPPED {
            saw_drop = true;
        }
    }
    assert!(saw_drop);
}

#[tokio::test]
async fn missing_features_are_retryable_and_count_against_breaker() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;
    h.feature_store.fail_reads_for("entity_0");

    let outcome = h.worker.process(&items[0]).await;
    assert!(matches!(outcome, WorkOutcome::Retryable { .. }));
    assert!(h.staging_store.is_empty());

    let state = h.breakers.state("entity_0").unwrap();
    assert_eq!(state.consecutive_failures, 1);

    // Recovery clears the count through record_success
    h.feature_store.clear_failure("entity_0");
    let outcome = h.worker.process(&items[0]).await;
    assert_eq!(outcome, WorkOutcome::Ack { staged: true });
    assert!(h.breakers.state("entity_0").unwrap().consecutive_failures == 0);
}

#[tokio::test]
async fn unknown_batch_is_a_permanent_skip() {
    let h = PipelineHarness::new();
    h.seed_entities(1);

    let orphan = WorkItem::new("entity_0", Uuid::new_v4(), game_date(), SYSTEM_ID);
    let outcome = h.worker.process(&orphan).await;
    assert!(matches!(outcome, WorkOutcome::PermanentSkip { .. }));

    // Deterministic failures never feed the breaker
    assert!(h.breakers.state("entity_0").is_none());
}

#[tokio::test]
async fn unusable_features_skip_with_reasoned_log() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;

    let mut bad = good_features("entity_0");
    bad.quality_score = 10.0; // below the 40.0 floor
    h.feature_store.insert(bad);

    let outcome = h.worker.process(&items[0]).await;
    let WorkOutcome::PermanentSkip { reason } = outcome else {
        panic!("expected permanent skip");
    };
    assert!(reason.contains("quality"), "reason was: {reason}");

    let logs = h.log_sink.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, ExecutionOutcome::PermanentSkip);
    assert!(logs[0].skip_reason.is_some());
    // Repeated fields are arrays even when empty, never null
    assert!(logs[0].null_repeated_fields().is_empty());
}

#[tokio::test]
async fn contamination_fires_distinct_alert() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;
    let mut events_rx = h.events.subscribe();

    // A Default-sourced feature carrying a known sentinel value
    let mut poisoned = good_features("entity_0");
    poisoned.values[1] = Some(112.0);
    poisoned.sources[1] = FeatureSource::Default;
    h.feature_store.insert(poisoned);

    let outcome = h.worker.process(&items[0]).await;
    assert!(matches!(outcome, WorkOutcome::PermanentSkip { .. }));

    let mut saw_contamination = false;
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::CONTAMINATION_DETECTED {
            saw_contamination = true;
            assert_eq!(event.context["indices"], serde_json::json!([1]));
        }
    }
    assert!(saw_contamination);

    let logs = h.log_sink.logs();
    assert_eq!(logs[0].contaminated_indices, Some(vec![1]));
}

#[tokio::test]
async fn repeated_transient_failures_trip_breaker_and_exclude_entity() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 2).await;
    h.feature_store.fail_reads_for("entity_0");

    for _ in 0..h.config.breaker.failure_threshold {
        let outcome = h.worker.process(&items[0]).await;
        assert!(matches!(outcome, WorkOutcome::Retryable { .. }));
    }
    assert!(h.breakers.is_tripped("entity_0"));

    // The next batch build leaves the tripped entity out
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    assert_eq!(batch.entity_ids, vec!["entity_1".to_string()]);
}

#[tokio::test]
async fn tripped_entity_redeliveries_are_acked_during_cooldown() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;
    h.feature_store.fail_reads_for("entity_0");

    for _ in 0..h.config.breaker.failure_threshold {
        let outcome = h.worker.process(&items[0]).await;
        assert!(matches!(outcome, WorkOutcome::Retryable { .. }));
    }
    assert!(h.breakers.is_tripped("entity_0"));
    let failures_at_trip = h.breakers.state("entity_0").unwrap().consecutive_failures;

    // During the cooldown a redelivery still fails transiently, but it is
    // acknowledged rather than negative-acked back into the queue
    let outcome = h.worker.process(&items[0].next_attempt()).await;
    assert_eq!(outcome, WorkOutcome::Ack { staged: false });

    // The dropped delivery stages nothing and extends nothing
    let staged = h
        .staging_store
        .staged_for(game_date(), SYSTEM_ID)
        .await
        .unwrap();
    assert!(staged.is_empty());
    assert_eq!(
        h.breakers.state("entity_0").unwrap().consecutive_failures,
        failures_at_trip
    );
}

#[tokio::test]
async fn redelivered_item_restages_under_same_dedup_key() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;

    h.worker.process(&items[0]).await;
    let redelivery = items[0].next_attempt();
    h.worker.process(&redelivery).await;

    // One staged row per (entity, date, system) no matter the attempts
    let staged = h
        .staging_store
        .staged_for(game_date(), SYSTEM_ID)
        .await
        .unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].attempt, 1);

    // Both deliveries left an execution log
    assert_eq!(h.log_sink.logs().len(), 2);
}

#[tokio::test]
async fn low_sample_quality_still_stages_with_scaled_confidence() {
    let h = PipelineHarness::new();
    let items = dispatched_items(&h, 1).await;

    let mut limited = good_features("entity_0");
    limited.sample_quality = SampleQuality::Limited;
    limited.window_used = 5;
    h.feature_store.insert(limited);

    let outcome = h.worker.process(&items[0]).await;
    assert_eq!(outcome, WorkOutcome::Ack { staged: true });

    let staged = h
        .staging_store
        .staged_for(game_date(), SYSTEM_ID)
        .await
        .unwrap();
    // quality 88 with the Limited tier factor 0.75
    assert!((staged[0].confidence - 0.66).abs() < 1e-9);
    assert_eq!(staged[0].sample_quality, Some(SampleQuality::Limited));
}
