//! Production sync execution: warehouse extraction through quality checks.
//!
//! The scheduler drives a `SyncExecutor`; this module provides the
//! production implementation wiring the warehouse pool, the query builder,
//! the transformer, and the quality checker together.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::domain::{DataQualityCheck, PeriodType, SyncError, SyncRunCounts, SyncWindow};
use crate::infrastructure::store::PerformanceRepository;
use crate::infrastructure::warehouse::{
    AggregationQueryBuilder, AsinFilterStrategy, WarehousePool,
};

use super::quality::DataQualityChecker;
use super::transformer::NestedDataTransformer;

/// One sync attempt's input.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub window: SyncWindow,
    pub period_type: PeriodType,
    pub sync_run_id: String,
    pub dry_run: bool,
}

/// One sync attempt's result, before the run record is finalized.
#[derive(Debug, Default)]
pub struct SyncExecution {
    pub counts: SyncRunCounts,
    /// Batch errors collected by the transformer, already rendered.
    pub batch_errors: Vec<String>,
    pub quality_checks: Vec<DataQualityCheck>,
}

/// Seam between the scheduler and the pipeline so retry, concurrency, and
/// window logic are testable without a warehouse or store.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// Latest period end already materialized in the destination.
    async fn latest_synced_boundary(&self) -> Result<Option<NaiveDate>, SyncError>;

    /// Latest period end available in the warehouse.
    async fn warehouse_boundary(&self) -> Result<Option<NaiveDate>, SyncError>;

    /// Run one sync attempt over the request's window.
    async fn execute(&self, request: &SyncRequest) -> Result<SyncExecution, SyncError>;
}

pub struct SyncPipeline {
    pool: WarehousePool,
    query_builder: AggregationQueryBuilder,
    filter: AsinFilterStrategy,
    transformer: NestedDataTransformer,
    checker: DataQualityChecker,
    repo: PerformanceRepository,
}

impl SyncPipeline {
    pub fn new(
        pool: WarehousePool,
        query_builder: AggregationQueryBuilder,
        filter: AsinFilterStrategy,
        transformer: NestedDataTransformer,
        repo: PerformanceRepository,
    ) -> Self {
        Self {
            pool,
            query_builder,
            filter,
            transformer,
            checker: DataQualityChecker::new(),
            repo,
        }
    }
}

#[async_trait]
impl SyncExecutor for SyncPipeline {
    async fn latest_synced_boundary(&self) -> Result<Option<NaiveDate>, SyncError> {
        self.repo.latest_summary_period_end().await
    }

    async fn warehouse_boundary(&self) -> Result<Option<NaiveDate>, SyncError> {
        let client = self.pool.acquire().await?;
        client
            .latest_boundary(&self.query_builder.boundary_probe())
            .await
    }

    async fn execute(&self, request: &SyncRequest) -> Result<SyncExecution, SyncError> {
        let sql = self
            .query_builder
            .build(request.period_type, &request.window, &self.filter);

        // The guard scope bounds the client checkout; it is released on
        // every path, including the early `?` returns.
        let rows = {
            let client = self.pool.acquire().await?;
            client.execute_query(&sql).await?
        };
        info!(
            rows = rows.len(),
            window = %request.window,
            period_type = %request.period_type,
            "extracted warehouse rows"
        );

        // Fatal on structural violations, before any write.
        let groups = NestedDataTransformer::prepare(rows)?;

        if request.dry_run {
            let would_write: i64 = groups.iter().map(|g| g.queries.len() as i64).sum();
            info!(would_write, "dry run: skipping write phases");
            return Ok(SyncExecution {
                counts: SyncRunCounts {
                    processed: would_write,
                    ..SyncRunCounts::default()
                },
                batch_errors: Vec::new(),
                quality_checks: Vec::new(),
            });
        }

        let outcome = self
            .transformer
            .write(&groups, request.period_type, &request.sync_run_id, Utc::now())
            .await;

        // Quality checks run after all write phases, batch failures or not.
        let quality_checks = self
            .checker
            .run_checks(&request.sync_run_id, &groups, &outcome);

        Ok(SyncExecution {
            counts: outcome.counts,
            batch_errors: outcome.errors.iter().map(ToString::to_string).collect(),
            quality_checks,
        })
    }
}
