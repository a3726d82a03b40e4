//! Propcast pipeline server.
//!
//! Wires the Postgres-backed stores, pgmq publisher, scoring artifact, and
//! web API into one process: orchestrator push endpoint, coordinator
//! control endpoints, and worker push endpoint.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use propcast_core::config::ConfigManager;
use propcast_core::coordinator::{BatchCoordinator, StagingConsolidator};
use propcast_core::events::EventPublisher;
use propcast_core::logging::init_structured_logging;
use propcast_core::messaging::PgmqPublisher;
use propcast_core::orchestration::{HttpStageInvoker, StageOrchestrator};
use propcast_core::resilience::EntityBreakerRegistry;
use propcast_core::scoring::ModelArtifact;
use propcast_core::store::{
    PgBatchStore, PgCanonicalStore, PgCompletionStore, PgLogSink, PgStagingStore,
};
use propcast_core::web::{build_router, AppState};
use propcast_core::worker::PredictionWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = ConfigManager::load().context("configuration load failed")?;
    let config = Arc::new(manager.config().clone());

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool)
        .acquire_timeout(Duration::from_secs(config.database.checkout_timeout_seconds))
        .connect(&config.database.url())
        .await
        .context("database connection failed")?;

    let events = EventPublisher::new(config.events.channel_capacity);

    let completion_store = Arc::new(PgCompletionStore::new(pool.clone()));
    let batch_store = Arc::new(PgBatchStore::new(pool.clone()));
    let staging_store = Arc::new(PgStagingStore::new(pool.clone()));
    let canonical_store = Arc::new(PgCanonicalStore::new(pool.clone()));
    let log_sink = Arc::new(PgLogSink::new(pool.clone()));

    let queue = Arc::new(PgmqPublisher::new(pool.clone()));
    queue.ensure_queue(&config.dispatch.work_queue).await?;
    queue.ensure_queue(&config.dispatch.completion_queue).await?;

    let invoker = Arc::new(HttpStageInvoker::new(config.orchestration.clone())?);
    let orchestrator = Arc::new(StageOrchestrator::new(
        completion_store.clone(),
        invoker,
        events.clone(),
        config.orchestration.clone(),
    ));

    let breakers = Arc::new(EntityBreakerRegistry::new(config.breaker.clone()));
    let consolidator = StagingConsolidator::new(staging_store.clone(), canonical_store.clone());

    let coordinator = Arc::new(BatchCoordinator::new(
        batch_store.clone(),
        load_universe(&pool),
        load_line_source(&pool),
        queue,
        breakers.clone(),
        consolidator,
        events.clone(),
        config.dispatch.clone(),
    ));

    let artifact_path = config
        .scoring
        .artifacts
        .values()
        .next()
        .map(|file| Path::new(&config.scoring.artifact_dir).join(file))
        .context("no scoring artifact configured")?;
    let scorer = Arc::new(ModelArtifact::from_file(&artifact_path)?);

    let worker = Arc::new(PredictionWorker::new(
        load_feature_store(&pool),
        batch_store,
        staging_store,
        log_sink,
        breakers,
        scorer,
        events,
        config.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        orchestrator,
        coordinator,
        worker,
        completion_store,
        canonical_store,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
        .await
        .with_context(|| format!("cannot bind {}", config.web.bind_address))?;
    info!(bind_address = %config.web.bind_address, "Propcast server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_universe(pool: &sqlx::PgPool) -> Arc<dyn propcast_core::store::EntityUniverse> {
    Arc::new(readers::PgEntityUniverse::new(pool.clone()))
}

fn load_line_source(pool: &sqlx::PgPool) -> Arc<dyn propcast_core::store::LineSource> {
    Arc::new(readers::PgLineSource::new(pool.clone()))
}

fn load_feature_store(pool: &sqlx::PgPool) -> Arc<dyn propcast_core::store::FeatureStore> {
    Arc::new(readers::PgFeatureStore::new(pool.clone()))
}

/// Read-only adapters over the externally-owned tables (schedules, odds
/// lines, feature cache). These tables are written by the ingestion and
/// feature stages, never by this process.
mod readers {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use sqlx::PgPool;

    use propcast_core::error::{PropcastError, Result};
    use propcast_core::models::FeatureVector;
    use propcast_core::store::{EntityUniverse, FeatureStore, LineSource};

    pub struct PgEntityUniverse {
        pool: PgPool,
    }

    impl PgEntityUniverse {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl EntityUniverse for PgEntityUniverse {
        async fn entities_for(&self, date: NaiveDate) -> Result<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT DISTINCT entity_id FROM scheduled_participants WHERE date = $1",
            )
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        }
    }

    pub struct PgLineSource {
        pool: PgPool,
    }

    impl PgLineSource {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl LineSource for PgLineSource {
        async fn latest_line(
            &self,
            entity_id: &str,
            date: NaiveDate,
            system_id: &str,
        ) -> Result<Option<f64>> {
            let row: Option<(f64,)> = sqlx::query_as(
                r#"
                SELECT line FROM reference_lines
                WHERE entity_id = $1 AND date = $2 AND system_id = $3
                ORDER BY fetched_at DESC
                LIMIT 1
                "#,
            )
            .bind(entity_id)
            .bind(date)
            .bind(system_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|(line,)| line))
        }
    }

    pub struct PgFeatureStore {
        pool: PgPool,
    }

    impl PgFeatureStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl FeatureStore for PgFeatureStore {
        async fn get_features(
            &self,
            entity_id: &str,
            date: NaiveDate,
        ) -> Result<Option<FeatureVector>> {
            let row: Option<(serde_json::Value,)> = sqlx::query_as(
                "SELECT payload FROM feature_cache WHERE entity_id = $1 AND date = $2",
            )
            .bind(entity_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
            row.map(|(payload,)| {
                serde_json::from_value(payload)
                    .map_err(|e| PropcastError::store("feature_cache", e.to_string()))
            })
            .transpose()
        }
    }
}
