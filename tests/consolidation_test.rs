//! Exactly-once consolidation: dedup pick, supersession, and re-run
//! idempotence under concurrent invocation.

mod common;

use chrono::{Duration, Utc};
use common::{game_date, PipelineHarness, SYSTEM_ID};
use proptest::prelude::*;
use propcast_core::coordinator::StagingConsolidator;
use propcast_core::models::{BatchStatus, Recommendation, RunMode, SampleQuality, StagedPrediction};
use propcast_core::store::{
    CanonicalStore, InMemoryCanonicalStore, InMemoryStagingStore, StagingStore,
};
use std::sync::Arc;
use uuid::Uuid;

fn staged(entity: &str, minutes_ago: i64, attempt: u32) -> StagedPrediction {
    StagedPrediction {
        staged_id: Uuid::new_v4(),
        batch_id: Uuid::new_v4(),
        entity_id: entity.to_string(),
        date: game_date(),
        system_id: SYSTEM_ID.to_string(),
        model_file: "points_v3_test.json".to_string(),
        predicted_value: 24.0,
        reference_line: 22.5,
        recommendation: Recommendation::Over,
        confidence: 0.8,
        attempt,
        input_sources: vec![],
        skipped_features: vec![],
        sample_quality: Some(SampleQuality::Good),
        quality_score: Some(88.0),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

#[tokio::test]
async fn consolidate_promotes_one_record_per_entity() {
    let h = PipelineHarness::new();
    h.seed_entities(3);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();
    h.coordinator.dispatch(batch.batch_id).await.unwrap();

    for message in h.queue.drain(&h.config.dispatch.work_queue) {
        let item = serde_json::from_value(message).unwrap();
        h.worker.process(&item).await;
    }
    assert_eq!(h.staging_store.len(), 3);

    let result = h.coordinator.consolidate(batch.batch_id).await.unwrap();
    assert_eq!(result.staged_rows, 3);
    assert_eq!(result.distinct_entities, 3);
    assert_eq!(result.merge.activated, 3);

    let stored = h.coordinator.batch(batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Consolidated);
    assert_eq!(stored.result_count, 3);

    let active = h
        .canonical_store
        .active("entity_0", game_date(), SYSTEM_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(active.is_active);
    assert!((active.predicted_value - 24.0).abs() < 1e-12);
}

#[tokio::test]
async fn consolidate_requires_awaiting_or_failed_batch() {
    let h = PipelineHarness::new();
    h.seed_entities(1);
    let batch = h
        .coordinator
        .start_batch(game_date(), SYSTEM_ID, RunMode::Full)
        .await
        .unwrap();

    // Pending is not consolidatable
    assert!(h.coordinator.consolidate(batch.batch_id).await.is_err());
}

#[tokio::test]
async fn newer_consolidation_supersedes_prior_active_atomically() {
    let staging = Arc::new(InMemoryStagingStore::new());
    let canonical = Arc::new(InMemoryCanonicalStore::new());
    let consolidator = StagingConsolidator::new(staging.clone(), canonical.clone());

    staging.put(staged("e1", 60, 0)).await.unwrap();
    consolidator.consolidate(game_date(), SYSTEM_ID).await.unwrap();
    let first = canonical
        .active("e1", game_date(), SYSTEM_ID)
        .await
        .unwrap()
        .unwrap();

    // A fresher staged row replaces the old one under the same dedup key
    let fresh = staged("e1", 0, 1);
    let fresh_id = fresh.staged_id;
    staging.put(fresh).await.unwrap();
    let result = consolidator.consolidate(game_date(), SYSTEM_ID).await.unwrap();
    assert_eq!(result.merge.activated, 1);
    assert_eq!(result.merge.superseded, 1);

    let active = canonical
        .active("e1", game_date(), SYSTEM_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.record_id, fresh_id);

    // History keeps the superseded record with its forward link
    let all = canonical.all_for("e1", game_date(), SYSTEM_ID).await.unwrap();
    assert_eq!(all.len(), 2);
    let old = all.iter().find(|r| r.record_id == first.record_id).unwrap();
    assert!(!old.is_active);
    assert_eq!(old.superseded_by, Some(fresh_id));
}

#[tokio::test]
async fn redelivered_stage_write_keeps_latest_snapshot_only() {
    let staging = Arc::new(InMemoryStagingStore::new());

    // Same dedup key, three attempts; the staging upsert keeps the newest
    let newest = staged("e1", 0, 2);
    let newest_id = newest.staged_id;
    staging.put(staged("e1", 60, 0)).await.unwrap();
    staging.put(newest).await.unwrap();
    staging.put(staged("e1", 30, 1)).await.unwrap();

    let rows = staging.staged_for(game_date(), SYSTEM_ID).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].staged_id, newest_id);
    assert_eq!(rows[0].attempt, 2);
}

#[tokio::test]
async fn concurrent_consolidation_activates_each_record_exactly_once() {
    let staging = Arc::new(InMemoryStagingStore::new());
    let canonical = Arc::new(InMemoryCanonicalStore::new());

    for i in 0..20 {
        staging.put(staged(&format!("e{i}"), 10, 0)).await.unwrap();
    }

    let consolidator = Arc::new(StagingConsolidator::new(staging, canonical.clone()));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let consolidator = consolidator.clone();
        handles.push(tokio::spawn(async move {
            consolidator.consolidate(game_date(), SYSTEM_ID).await.unwrap()
        }));
    }

    let mut total_activated = 0;
    for handle in handles {
        total_activated += handle.await.unwrap().merge.activated;
    }
    assert_eq!(total_activated, 20);

    for i in 0..20 {
        let all = canonical
            .all_for(&format!("e{i}"), game_date(), SYSTEM_ID)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_active);
    }
}

proptest! {
    // Re-running consolidation any number of times after convergence never
    // activates or supersedes anything further.
    #[test]
    fn consolidation_rerun_is_a_fixed_point(
        entity_count in 1usize..12,
        reruns in 1usize..5,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let staging = Arc::new(InMemoryStagingStore::new());
            let canonical = Arc::new(InMemoryCanonicalStore::new());
            for i in 0..entity_count {
                staging.put(staged(&format!("e{i}"), 10, 0)).await.unwrap();
            }
            let consolidator = StagingConsolidator::new(staging, canonical.clone());

            let first = consolidator.consolidate(game_date(), SYSTEM_ID).await.unwrap();
            prop_assert_eq!(first.merge.activated, entity_count);

            for _ in 0..reruns {
                let rerun = consolidator.consolidate(game_date(), SYSTEM_ID).await.unwrap();
                prop_assert_eq!(rerun.merge.activated, 0);
                prop_assert_eq!(rerun.merge.superseded, 0);
                prop_assert_eq!(rerun.merge.unchanged, entity_count);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
