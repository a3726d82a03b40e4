//! Batch build and rate-limited dispatch, including the partial-failure
//! remainder path.

mod common;

use common::{game_date, PipelineHarness, SYSTEM_ID};
use propcast_core::constants::events;
use propcast_core::messaging::WorkItem;
use propcast_core::models::{BatchStatus, RunMode};

#[tokio::test]
async fn start_batch_snapshots_universe_and_lines() {
    let h = PipelineHarness::new();
    let entities = h.seed_entities(4);

    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    assert_eq!(batch.entity_ids.len(), 4);
    assert_eq!(batch.status, BatchStatus::Pending);
    for entity_id in &entities {
        assert_eq!(batch.reference_line(entity_id), Some(22.5));
    }
}

#[tokio::test]
async fn start_batch_rejects_empty_universe() {
    let h = PipelineHarness::new();
    let err = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn entities_without_lines_are_excluded_not_fatal() {
    let h = PipelineHarness::new();
    h.seed_entities(3);
    // A fourth scheduled entity with no posted line
    h.universe.set_entities(
        game_date(),
        vec![
            "entity_0".into(),
            "entity_1".into(),
            "entity_2".into(),
            "no_line".into(),
        ],
    );

    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    assert_eq!(batch.entity_ids.len(), 3);
    assert!(!batch.entity_ids.contains(&"no_line".to_string()));
}

#[tokio::test]
async fn tripped_entities_are_excluded_at_batch_build() {
    let h = PipelineHarness::new();
    h.seed_entities(3);
    for _ in 0..h.config.breaker.failure_threshold {
        h.breakers.record_failure("entity_1");
    }
    assert!(h.breakers.is_tripped("entity_1"));

    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    assert_eq!(batch.entity_ids.len(), 2);
    assert!(!batch.entity_ids.contains(&"entity_1".to_string()));
}

#[tokio::test]
async fn dispatch_publishes_one_item_per_entity_in_order() {
    let h = PipelineHarness::new();
    h.seed_entities(5);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    let result = h.coordinator.dispatch(batch.batch_id).await.unwrap();
    assert!(result.complete);
    assert_eq!(result.published, 5);

    let messages = h.queue.drain(&h.config.dispatch.work_queue);
    assert_eq!(messages.len(), 5);
    let items: Vec<WorkItem> = messages
        .into_iter()
        .map(|m| serde_json::from_value(m).unwrap())
        .collect();
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.entity_id, format!("entity_{i}"));
        assert_eq!(item.batch_id, batch.batch_id);
        assert_eq!(item.attempt, 0);
    }

    let stored = h.coordinator.batch(batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::AwaitingResults);
    assert_eq!(stored.dispatched_count, 5);
}

#[tokio::test]
async fn partial_publish_failure_marks_failed_with_exact_offset() {
    let h = PipelineHarness::new();
    h.seed_entities(5);
    let mut alerts = h.events.subscribe();
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    h.queue.fail_after(2);
    let result = h.coordinator.dispatch(batch.batch_id).await.unwrap();
    assert!(!result.complete);
    assert_eq!(result.published, 2);

    let stored = h.coordinator.batch(batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Failed);
    assert_eq!(stored.dispatched_count, 2);

    let mut saw_failure = false;
    while let Ok(event) = alerts.try_recv() {
        if event.name == events::BATCH_DISPATCH_FAILED {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn remainder_retry_resumes_from_offset_without_republishing() {
    let h = PipelineHarness::new();
    h.seed_entities(5);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    h.queue.fail_after(2);
    h.coordinator.dispatch(batch.batch_id).await.unwrap();
    assert_eq!(h.queue.len(&h.config.dispatch.work_queue), 2);

    h.queue.heal();
    let result = h
        .coordinator
        .dispatch_remainder(batch.batch_id)
        .await
        .unwrap();
    assert!(result.complete);
    assert_eq!(result.published, 3);
    assert_eq!(result.total_dispatched, 5);

    // Exactly five messages total: entities 0 and 1 were never republished
    let items: Vec<WorkItem> = h
        .queue
        .drain(&h.config.dispatch.work_queue)
        .into_iter()
        .map(|m| serde_json::from_value(m).unwrap())
        .collect();
    assert_eq!(items.len(), 5);
    let ids: Vec<&str> = items.iter().map(|i| i.entity_id.as_str()).collect();
    assert_eq!(ids, ["entity_0", "entity_1", "entity_2", "entity_3", "entity_4"]);

    let stored = h.coordinator.batch(batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::AwaitingResults);
}

#[tokio::test]
async fn remainder_requires_a_failed_batch() {
    let h = PipelineHarness::new();
    h.seed_entities(2);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    // Pending, not failed
    assert!(h.coordinator.dispatch_remainder(batch.batch_id).await.is_err());

    h.coordinator.dispatch(batch.batch_id).await.unwrap();
    // AwaitingResults, not failed
    assert!(h.coordinator.dispatch_remainder(batch.batch_id).await.is_err());
}

#[tokio::test]
async fn reset_fails_all_in_flight_batches() {
    let h = PipelineHarness::new();
    h.seed_entities(2);
    let pending = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    let dispatched = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    h.coordinator.dispatch(dispatched.batch_id).await.unwrap();

    let reset_ids = h.coordinator.reset().await.unwrap();
    assert_eq!(reset_ids.len(), 2);
    for batch_id in [pending.batch_id, dispatched.batch_id] {
        let stored = h.coordinator.batch(batch_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
    }

    // Reset is idempotent: nothing left in flight
    assert!(h.coordinator.reset().await.unwrap().is_empty());
}
