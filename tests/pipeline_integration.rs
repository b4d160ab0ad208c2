//! End-to-end pipeline tests: a fake warehouse client feeding the real
//! transformer, store, quality checker, logger, and scheduler over a
//! scratch SQLite database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use sqp_sync::application::{
    ManualSyncOptions, NestedDataTransformer, SchedulerSettings, SyncLogger, SyncPipeline,
    SyncScheduler,
};
use sqp_sync::domain::{
    CartAddData, CheckStatus, CheckType, ClickData, ImpressionData, PeriodType, PurchaseData,
    SourceRow, SyncError, SyncStatus, SyncWindow,
};
use sqp_sync::infrastructure::config::AlertConfig;
use sqp_sync::infrastructure::store::{PerformanceRepository, StoreConnection};
use sqp_sync::infrastructure::warehouse::{
    AggregationQueryBuilder, AsinFilterStrategy, WarehouseClient, WarehousePool,
};

#[derive(Clone)]
struct FakeWarehouseClient {
    rows: Arc<Vec<SourceRow>>,
    boundary: Option<NaiveDate>,
}

#[async_trait]
impl WarehouseClient for FakeWarehouseClient {
    async fn execute_query(&self, _sql: &str) -> Result<Vec<SourceRow>, SyncError> {
        Ok(self.rows.as_ref().clone())
    }

    async fn latest_boundary(&self, _sql: &str) -> Result<Option<NaiveDate>, SyncError> {
        Ok(self.boundary)
    }
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn source_row(start: &str, end: &str, asin: &str, query: &str, impressions: i64) -> SourceRow {
    let asin_impressions = impressions / 10;
    let clicks = impressions / 10;
    let asin_clicks = clicks / 10;
    SourceRow {
        start_date: d(start),
        end_date: d(end),
        asin: asin.to_string(),
        search_query: query.to_string(),
        search_query_score: Some(2),
        search_query_volume: Some(900),
        impressions: Some(ImpressionData {
            total_count: impressions,
            asin_count: asin_impressions,
            asin_share: 0.1,
        }),
        clicks: Some(ClickData {
            total_count: clicks,
            total_rate: 0.1,
            asin_count: asin_clicks,
            asin_share: 0.1,
            total_median_price: Some(14.99),
            asin_median_price: Some(13.99),
            same_day_shipping_count: Some(2),
            one_day_shipping_count: Some(5),
            two_day_shipping_count: Some(8),
        }),
        cart_adds: Some(CartAddData {
            total_count: clicks / 2,
            total_rate: 0.5,
            asin_count: asin_clicks / 2,
            asin_share: 0.1,
            total_median_price: None,
            asin_median_price: None,
            same_day_shipping_count: None,
            one_day_shipping_count: None,
            two_day_shipping_count: None,
        }),
        purchases: Some(PurchaseData {
            total_count: clicks / 5,
            total_rate: 0.2,
            asin_count: asin_clicks / 5,
            asin_share: 0.1,
            total_median_price: Some(15.49),
            asin_median_price: Some(15.49),
            same_day_shipping_count: None,
            one_day_shipping_count: None,
            two_day_shipping_count: None,
        }),
        impression_stats: None,
        active_weeks: None,
    }
}

struct Harness {
    scheduler: SyncScheduler<SyncPipeline>,
    logger: Arc<SyncLogger>,
    pool: sqlx::SqlitePool,
    _dir: TempDir,
}

async fn harness(rows: Vec<SourceRow>, boundary: Option<NaiveDate>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("integration.db").display());
    let store = StoreConnection::connect(&url, 3).await.unwrap();
    store.migrate().await.unwrap();
    let pool = store.pool().clone();

    let client = FakeWarehouseClient {
        rows: Arc::new(rows),
        boundary,
    };
    let warehouse_pool = WarehousePool::new(2, move || {
        Box::new(client.clone()) as Box<dyn WarehouseClient>
    });

    let repo = PerformanceRepository::new(pool.clone());
    let transformer = NestedDataTransformer::new(repo.clone(), 100, 50);
    let pipeline = SyncPipeline::new(
        warehouse_pool,
        AggregationQueryBuilder::new("analytics.search_query_performance"),
        AsinFilterStrategy::All,
        transformer,
        repo,
    );

    let logger = Arc::new(SyncLogger::new(pool.clone(), AlertConfig::default()));
    let settings = SchedulerSettings {
        sync_type: "sqp_performance".into(),
        source_ref: "analytics.search_query_performance".into(),
        target_ref: "query_performance".into(),
        period_type: PeriodType::Weekly,
        interval: std::time::Duration::from_secs(3600),
        retry_attempts: 3,
        retry_delay: std::time::Duration::from_millis(1),
        initial_lookback_days: 28,
    };
    let scheduler = SyncScheduler::new(Arc::new(pipeline), Arc::clone(&logger), settings);

    Harness {
        scheduler,
        logger,
        pool,
        _dir: dir,
    }
}

fn manual_window(start: &str, end: &str) -> ManualSyncOptions {
    ManualSyncOptions {
        window: Some(SyncWindow::new(d(start), d(end)).unwrap()),
        dry_run: false,
        force: false,
    }
}

async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn full_sync_persists_hierarchy_run_record_and_checks() {
    let rows = vec![
        source_row("2025-03-02", "2025-03-08", "B00AAA", "usb hub", 5000),
        source_row("2025-03-02", "2025-03-08", "B00AAA", "usb dock", 3000),
        source_row("2025-03-02", "2025-03-08", "B00BBB", "usb hub", 2000),
    ];
    let h = harness(rows, Some(d("2025-03-08"))).await;

    let result = h
        .scheduler
        .trigger_manual_sync(manual_window("2025-03-02", "2025-03-08"))
        .await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.records_processed, 3);
    assert_eq!(result.triggered_by, "manual");
    let run_id = result.sync_run_id.unwrap();

    assert_eq!(table_count(&h.pool, "entity_performance").await, 2);
    assert_eq!(table_count(&h.pool, "query_performance").await, 3);
    assert_eq!(table_count(&h.pool, "weekly_summary").await, 3);

    // Run record finalized as completed with the processed count.
    let history = h.logger.get_sync_history(&Default::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SyncStatus::Completed);
    assert_eq!(history[0].records_processed, 3);

    // Quality checks attached: a single passed row-count reconciliation.
    let checks = h.logger.get_quality_checks(&run_id).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].check_type, CheckType::RowCount);
    assert_eq!(checks[0].check_status, CheckStatus::Passed);
}

#[tokio::test]
async fn second_run_over_same_window_is_idempotent() {
    let rows = vec![
        source_row("2025-03-02", "2025-03-08", "B00AAA", "usb hub", 5000),
        source_row("2025-03-02", "2025-03-08", "B00AAA", "usb dock", 3000),
    ];
    let h = harness(rows, Some(d("2025-03-08"))).await;

    let first = h
        .scheduler
        .trigger_manual_sync(manual_window("2025-03-02", "2025-03-08"))
        .await;
    assert!(first.success);

    let counts_before = (
        table_count(&h.pool, "entity_performance").await,
        table_count(&h.pool, "query_performance").await,
        table_count(&h.pool, "weekly_summary").await,
    );
    let impressions_before: i64 =
        sqlx::query_scalar("SELECT SUM(total_impressions) FROM query_performance")
            .fetch_one(&h.pool)
            .await
            .unwrap();

    let second = h
        .scheduler
        .trigger_manual_sync(manual_window("2025-03-02", "2025-03-08"))
        .await;
    assert!(second.success);
    assert_eq!(second.records_processed, first.records_processed);

    let counts_after = (
        table_count(&h.pool, "entity_performance").await,
        table_count(&h.pool, "query_performance").await,
        table_count(&h.pool, "weekly_summary").await,
    );
    let impressions_after: i64 =
        sqlx::query_scalar("SELECT SUM(total_impressions) FROM query_performance")
            .fetch_one(&h.pool)
            .await
            .unwrap();

    assert_eq!(counts_before, counts_after);
    assert_eq!(impressions_before, impressions_after);

    // The second run updated in place rather than inserting.
    let history = h.logger.get_sync_history(&Default::default()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].records_inserted, 0);
    assert_eq!(history[0].records_updated, 2);
}

#[tokio::test]
async fn empty_window_completes_with_passing_row_count_check() {
    let h = harness(Vec::new(), None).await;

    let result = h
        .scheduler
        .trigger_manual_sync(manual_window("2025-03-02", "2025-03-08"))
        .await;
    assert!(result.success);
    assert_eq!(result.records_processed, 0);
    assert!(result.errors.is_empty());

    let run_id = result.sync_run_id.unwrap();
    let checks = h.logger.get_quality_checks(&run_id).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].check_type, CheckType::RowCount);
    assert_eq!(checks[0].check_status, CheckStatus::Passed);
}

#[tokio::test]
async fn funnel_violation_is_recorded_as_failed_check_without_failing_the_sync() {
    let mut row = source_row("2025-03-02", "2025-03-08", "B00AAA", "usb hub", 5000);
    // Clicks above impressions: a warehouse data integrity problem.
    if let Some(clicks) = row.clicks.as_mut() {
        clicks.asin_count = 10_000;
    }
    let h = harness(vec![row], Some(d("2025-03-08"))).await;

    let result = h
        .scheduler
        .trigger_manual_sync(manual_window("2025-03-02", "2025-03-08"))
        .await;
    assert!(result.success);

    let run_id = result.sync_run_id.unwrap();
    let checks = h.logger.get_quality_checks(&run_id).await.unwrap();
    let failed: Vec<_> = checks
        .iter()
        .filter(|check| check.check_status == CheckStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].column_name.as_deref(), Some("funnel_counts"));
    assert_eq!(failed[0].metadata["asin"], "B00AAA");
}

#[tokio::test]
async fn dry_run_reports_counts_without_writing() {
    let rows = vec![
        source_row("2025-03-02", "2025-03-08", "B00AAA", "usb hub", 5000),
        source_row("2025-03-02", "2025-03-08", "B00BBB", "usb hub", 2000),
    ];
    let h = harness(rows, Some(d("2025-03-08"))).await;

    let result = h
        .scheduler
        .trigger_manual_sync(ManualSyncOptions {
            window: Some(SyncWindow::new(d("2025-03-02"), d("2025-03-08")).unwrap()),
            dry_run: true,
            force: false,
        })
        .await;
    assert!(result.success);
    assert!(result.dry_run);
    assert_eq!(result.records_processed, 2);

    assert_eq!(table_count(&h.pool, "entity_performance").await, 0);
    assert_eq!(table_count(&h.pool, "query_performance").await, 0);
    assert_eq!(table_count(&h.pool, "weekly_summary").await, 0);
}

#[tokio::test]
async fn scheduled_check_sees_new_data_and_syncs_forward() {
    let rows = vec![source_row("2025-03-09", "2025-03-15", "B00AAA", "usb hub", 4000)];
    let h = harness(rows, Some(d("2025-03-15"))).await;

    // Nothing synced yet: the warehouse boundary alone means new data.
    assert!(h.scheduler.check_for_new_data().await.unwrap());

    let result = h.scheduler.execute_sync_job().await;
    assert!(result.success);
    assert_eq!(result.triggered_by, "scheduled");
    assert_eq!(result.records_processed, 1);

    // The weekly summary boundary now matches the warehouse boundary, so
    // the next check is negative.
    assert!(!h.scheduler.check_for_new_data().await.unwrap());
}
