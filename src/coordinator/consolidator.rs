//! Staged-result consolidation into the canonical store.
//!
//! The single point where predictions become canonical. Staged rows are
//! grouped by `(entity, date, system)`, the best snapshot per group wins,
//! and `merge_active` applies activation plus supersession atomically per
//! key. Re-running after a partial failure merges the same record ids and
//! changes nothing, so at-least-once invocation yields exactly-once effect.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::models::StagedPrediction;
use crate::store::{CanonicalStore, MergeOutcome, StagingStore};

/// Summary of one consolidation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    /// Staged rows read for the `(date, system)` pair
    pub staged_rows: usize,
    /// Distinct entities after grouping
    pub distinct_entities: usize,
    /// Duplicate staged rows dropped by the dedup pick
    pub duplicates_dropped: usize,
    pub merge: MergeOutcome,
}

/// Merges staged worker output into the canonical store.
pub struct StagingConsolidator {
    staging: Arc<dyn StagingStore>,
    canonical: Arc<dyn CanonicalStore>,
}

impl StagingConsolidator {
    pub fn new(staging: Arc<dyn StagingStore>, canonical: Arc<dyn CanonicalStore>) -> Self {
        Self { staging, canonical }
    }

    /// Consolidate everything staged for a `(date, system)` pair.
    #[instrument(skip(self), fields(date = %date, system_id = %system_id))]
    pub async fn consolidate(
        &self,
        date: NaiveDate,
        system_id: &str,
    ) -> Result<ConsolidationResult> {
        let staged = self.staging.staged_for(date, system_id).await?;
        let staged_count = staged.len();

        let mut groups: HashMap<(String, NaiveDate, String), Vec<StagedPrediction>> =
            HashMap::new();
        for row in staged {
            groups.entry(row.dedup_key()).or_default().push(row);
        }

        let distinct_entities = groups.len();
        let duplicates_dropped = staged_count - distinct_entities;

        let records = groups
            .into_values()
            .filter_map(|mut candidates| {
                candidates.sort_by(Self::snapshot_order);
                // Best candidate sorts last
                candidates.pop().map(|winner| winner.to_prediction_record())
            })
            .collect();

        let merge = self.canonical.merge_active(records).await?;

        if merge.activated > 0 {
            info!(
                staged_rows = staged_count,
                activated = merge.activated,
                superseded = merge.superseded,
                "Consolidation merged new active records"
            );
        } else {
            debug!(staged_rows = staged_count, "Consolidation found nothing new");
        }

        Ok(ConsolidationResult {
            staged_rows: staged_count,
            distinct_entities,
            duplicates_dropped,
            merge,
        })
    }

    /// Ascending order over duplicate staged rows: the most complete
    /// snapshot wins, then the latest `created_at`, then the highest
    /// attempt as a deterministic final tie-break.
    fn snapshot_order(a: &StagedPrediction, b: &StagedPrediction) -> Ordering {
        a.completeness_rank()
            .cmp(&b.completeness_rank())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.attempt.cmp(&b.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recommendation, SampleQuality};
    use crate::store::{InMemoryCanonicalStore, InMemoryStagingStore, StagingStore};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn staged(entity: &str, minutes_ago: i64) -> StagedPrediction {
        StagedPrediction {
            staged_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            entity_id: entity.into(),
            date: date(),
            system_id: "points_v3".into(),
            model_file: "m.json".into(),
            predicted_value: 24.0,
            reference_line: 22.5,
            recommendation: Recommendation::Over,
            confidence: 0.8,
            attempt: 0,
            input_sources: vec![],
            skipped_features: vec![],
            sample_quality: Some(SampleQuality::Good),
            quality_score: Some(88.0),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_consolidate_rerun_changes_nothing() {
        let staging = Arc::new(InMemoryStagingStore::new());
        let canonical = Arc::new(InMemoryCanonicalStore::new());
        staging.put(staged("e1", 10)).await.unwrap();
        staging.put(staged("e2", 10)).await.unwrap();

        let consolidator = StagingConsolidator::new(staging, canonical.clone());
        let first = consolidator.consolidate(date(), "points_v3").await.unwrap();
        assert_eq!(first.merge.activated, 2);

        let second = consolidator.consolidate(date(), "points_v3").await.unwrap();
        assert_eq!(second.merge.activated, 0);
        assert_eq!(second.merge.unchanged, 2);
    }

    #[test]
    fn test_completeness_outranks_recency() {
        let mut sparse = staged("e1", 1);
        sparse.sample_quality = None;
        sparse.quality_score = None;
        let full = staged("e1", 30);

        // Full snapshot wins despite being older
        assert_eq!(
            StagingConsolidator::snapshot_order(&sparse, &full),
            Ordering::Less
        );

        // Equal completeness falls back to created_at
        let newer = staged("e1", 1);
        let older = staged("e1", 30);
        assert_eq!(
            StagingConsolidator::snapshot_order(&older, &newer),
            Ordering::Less
        );
    }
}
