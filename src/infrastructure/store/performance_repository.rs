//! Named-column upserts for the performance hierarchy and the period
//! summary tables.
//!
//! Every write is keyed on the natural key of its table so re-applying the
//! same source window converges instead of duplicating. Batches run in one
//! transaction each; a failed batch rolls back alone and is reported to
//! the caller as data.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{
    EntityPerformanceRecord, PeriodKey, PeriodSummaryRecord, QueryPerformanceRecord, SyncError,
};

/// Insert/update counts for one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub inserted: i64,
    pub updated: i64,
}

impl BatchStats {
    pub fn written(&self) -> i64 {
        self.inserted + self.updated
    }
}

const SUMMARY_METRIC_COLUMNS: &str = "search_query, asin, total_impressions, asin_impressions, \
     total_clicks, asin_clicks, total_cart_adds, asin_cart_adds, total_purchases, asin_purchases, \
     avg_ctr, avg_cvr, purchase_per_impression, impression_share, click_share, cart_add_share, \
     purchase_share, min_impressions, max_impressions, avg_impressions, stddev_impressions, \
     active_weeks, sync_run_id, last_synced_at";

const SUMMARY_METRIC_PLACEHOLDERS: &str =
    "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

const SUMMARY_UPDATE_SET: &str = "period_start = excluded.period_start, \
     period_end = excluded.period_end, \
     total_impressions = excluded.total_impressions, \
     asin_impressions = excluded.asin_impressions, \
     total_clicks = excluded.total_clicks, \
     asin_clicks = excluded.asin_clicks, \
     total_cart_adds = excluded.total_cart_adds, \
     asin_cart_adds = excluded.asin_cart_adds, \
     total_purchases = excluded.total_purchases, \
     asin_purchases = excluded.asin_purchases, \
     avg_ctr = excluded.avg_ctr, \
     avg_cvr = excluded.avg_cvr, \
     purchase_per_impression = excluded.purchase_per_impression, \
     impression_share = excluded.impression_share, \
     click_share = excluded.click_share, \
     cart_add_share = excluded.cart_add_share, \
     purchase_share = excluded.purchase_share, \
     min_impressions = excluded.min_impressions, \
     max_impressions = excluded.max_impressions, \
     avg_impressions = excluded.avg_impressions, \
     stddev_impressions = excluded.stddev_impressions, \
     active_weeks = excluded.active_weeks, \
     sync_run_id = excluded.sync_run_id, \
     last_synced_at = excluded.last_synced_at";

#[derive(Clone)]
pub struct PerformanceRepository {
    pool: Arc<SqlitePool>,
}

impl PerformanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    // ===============================
    // PHASE A: ENTITY PERFORMANCE
    // ===============================

    /// Upsert one entity window. Returns the surrogate id and whether the
    /// row was newly created.
    pub async fn upsert_entity(
        &self,
        record: &EntityPerformanceRecord,
    ) -> Result<(i64, bool), SyncError> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM entity_performance WHERE start_date = ? AND end_date = ? AND asin = ?",
        )
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.asin)
        .fetch_optional(&*self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entity_performance (start_date, end_date, asin)
            VALUES (?, ?, ?)
            ON CONFLICT (start_date, end_date, asin)
            DO UPDATE SET updated_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
        )
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.asin)
        .fetch_one(&*self.pool)
        .await?;

        Ok((id, existing.is_none()))
    }

    // ===============================
    // PHASE B: QUERY PERFORMANCE
    // ===============================

    /// Upsert one batch of query records under a parent entity, in a single
    /// transaction.
    pub async fn upsert_query_batch(
        &self,
        entity_performance_id: i64,
        batch: &[QueryPerformanceRecord],
    ) -> Result<BatchStats, SyncError> {
        let existing: HashSet<String> = sqlx::query(
            "SELECT search_query FROM query_performance WHERE entity_performance_id = ?",
        )
        .bind(entity_performance_id)
        .fetch_all(&*self.pool)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("search_query"))
        .collect();

        let mut tx = self.pool.begin().await?;
        let mut stats = BatchStats::default();

        for record in batch {
            sqlx::query(
                r#"
                INSERT INTO query_performance
                (entity_performance_id, search_query, search_query_score, search_query_volume,
                 total_impressions, asin_impressions, impression_share,
                 total_clicks, click_rate, asin_clicks, click_share,
                 total_median_click_price, asin_median_click_price,
                 same_day_shipping_clicks, one_day_shipping_clicks, two_day_shipping_clicks,
                 total_cart_adds, cart_add_rate, asin_cart_adds, cart_add_share,
                 total_median_cart_add_price, asin_median_cart_add_price,
                 same_day_shipping_cart_adds, one_day_shipping_cart_adds, two_day_shipping_cart_adds,
                 total_purchases, purchase_rate, asin_purchases, purchase_share,
                 total_median_purchase_price, asin_median_purchase_price,
                 same_day_shipping_purchases, one_day_shipping_purchases, two_day_shipping_purchases,
                 click_through_rate, conversion_rate, cart_to_click_rate,
                 purchase_to_cart_rate, funnel_completion_rate)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                        ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (entity_performance_id, search_query) DO UPDATE SET
                    search_query_score = excluded.search_query_score,
                    search_query_volume = excluded.search_query_volume,
                    total_impressions = excluded.total_impressions,
                    asin_impressions = excluded.asin_impressions,
                    impression_share = excluded.impression_share,
                    total_clicks = excluded.total_clicks,
                    click_rate = excluded.click_rate,
                    asin_clicks = excluded.asin_clicks,
                    click_share = excluded.click_share,
                    total_median_click_price = excluded.total_median_click_price,
                    asin_median_click_price = excluded.asin_median_click_price,
                    same_day_shipping_clicks = excluded.same_day_shipping_clicks,
                    one_day_shipping_clicks = excluded.one_day_shipping_clicks,
                    two_day_shipping_clicks = excluded.two_day_shipping_clicks,
                    total_cart_adds = excluded.total_cart_adds,
                    cart_add_rate = excluded.cart_add_rate,
                    asin_cart_adds = excluded.asin_cart_adds,
                    cart_add_share = excluded.cart_add_share,
                    total_median_cart_add_price = excluded.total_median_cart_add_price,
                    asin_median_cart_add_price = excluded.asin_median_cart_add_price,
                    same_day_shipping_cart_adds = excluded.same_day_shipping_cart_adds,
                    one_day_shipping_cart_adds = excluded.one_day_shipping_cart_adds,
                    two_day_shipping_cart_adds = excluded.two_day_shipping_cart_adds,
                    total_purchases = excluded.total_purchases,
                    purchase_rate = excluded.purchase_rate,
                    asin_purchases = excluded.asin_purchases,
                    purchase_share = excluded.purchase_share,
                    total_median_purchase_price = excluded.total_median_purchase_price,
                    asin_median_purchase_price = excluded.asin_median_purchase_price,
                    same_day_shipping_purchases = excluded.same_day_shipping_purchases,
                    one_day_shipping_purchases = excluded.one_day_shipping_purchases,
                    two_day_shipping_purchases = excluded.two_day_shipping_purchases,
                    click_through_rate = excluded.click_through_rate,
                    conversion_rate = excluded.conversion_rate,
                    cart_to_click_rate = excluded.cart_to_click_rate,
                    purchase_to_cart_rate = excluded.purchase_to_cart_rate,
                    funnel_completion_rate = excluded.funnel_completion_rate,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(entity_performance_id)
            .bind(&record.search_query)
            .bind(record.search_query_score)
            .bind(record.search_query_volume)
            .bind(record.impressions.total_count)
            .bind(record.impressions.asin_count)
            .bind(record.impressions.asin_share)
            .bind(record.clicks.total_count)
            .bind(record.clicks.total_rate)
            .bind(record.clicks.asin_count)
            .bind(record.clicks.asin_share)
            .bind(record.clicks.total_median_price)
            .bind(record.clicks.asin_median_price)
            .bind(record.clicks.same_day_shipping_count)
            .bind(record.clicks.one_day_shipping_count)
            .bind(record.clicks.two_day_shipping_count)
            .bind(record.cart_adds.total_count)
            .bind(record.cart_adds.total_rate)
            .bind(record.cart_adds.asin_count)
            .bind(record.cart_adds.asin_share)
            .bind(record.cart_adds.total_median_price)
            .bind(record.cart_adds.asin_median_price)
            .bind(record.cart_adds.same_day_shipping_count)
            .bind(record.cart_adds.one_day_shipping_count)
            .bind(record.cart_adds.two_day_shipping_count)
            .bind(record.purchases.total_count)
            .bind(record.purchases.total_rate)
            .bind(record.purchases.asin_count)
            .bind(record.purchases.asin_share)
            .bind(record.purchases.total_median_price)
            .bind(record.purchases.asin_median_price)
            .bind(record.purchases.same_day_shipping_count)
            .bind(record.purchases.one_day_shipping_count)
            .bind(record.purchases.two_day_shipping_count)
            .bind(record.derived.click_through_rate)
            .bind(record.derived.conversion_rate)
            .bind(record.derived.cart_to_click_rate)
            .bind(record.derived.purchase_to_cart_rate)
            .bind(record.derived.funnel_completion_rate)
            .execute(&mut *tx)
            .await?;

            if existing.contains(&record.search_query) {
                stats.updated += 1;
            } else {
                stats.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    // ===============================
    // PHASE C: PERIOD SUMMARIES
    // ===============================

    /// Upsert one batch of summary records, in a single transaction. Each
    /// record is routed to the summary table of its own period key.
    pub async fn upsert_summary_batch(
        &self,
        batch: &[PeriodSummaryRecord],
    ) -> Result<BatchStats, SyncError> {
        let mut tx = self.pool.begin().await?;
        let mut stats = BatchStats::default();

        for record in batch {
            let exists = Self::summary_exists(&mut tx, record).await?;

            let sql = summary_upsert_sql(&record.period);
            let mut query = sqlx::query(&sql);
            query = match record.period {
                PeriodKey::Weekly { start } => query.bind(start).bind(record.period_end),
                PeriodKey::Monthly { year, month } => query
                    .bind(year)
                    .bind(month)
                    .bind(record.period_start)
                    .bind(record.period_end),
                PeriodKey::Quarterly { year, quarter } => query
                    .bind(year)
                    .bind(quarter)
                    .bind(record.period_start)
                    .bind(record.period_end),
                PeriodKey::Yearly { year } => query
                    .bind(year)
                    .bind(record.period_start)
                    .bind(record.period_end),
            };
            query
                .bind(&record.search_query)
                .bind(&record.asin)
                .bind(record.total_impressions)
                .bind(record.asin_impressions)
                .bind(record.total_clicks)
                .bind(record.asin_clicks)
                .bind(record.total_cart_adds)
                .bind(record.asin_cart_adds)
                .bind(record.total_purchases)
                .bind(record.asin_purchases)
                .bind(record.avg_ctr)
                .bind(record.avg_cvr)
                .bind(record.purchase_per_impression)
                .bind(record.impression_share)
                .bind(record.click_share)
                .bind(record.cart_add_share)
                .bind(record.purchase_share)
                .bind(record.dispersion.min_impressions)
                .bind(record.dispersion.max_impressions)
                .bind(record.dispersion.avg_impressions)
                .bind(record.dispersion.stddev_impressions)
                .bind(record.active_weeks)
                .bind(&record.sync_run_id)
                .bind(record.last_synced_at)
                .execute(&mut *tx)
                .await?;

            if exists {
                stats.updated += 1;
            } else {
                stats.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    async fn summary_exists(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        record: &PeriodSummaryRecord,
    ) -> Result<bool, SyncError> {
        let row = match record.period {
            PeriodKey::Weekly { start } => {
                sqlx::query(
                    "SELECT 1 FROM weekly_summary WHERE period_start = ? AND search_query = ? AND asin = ?",
                )
                .bind(start)
                .bind(&record.search_query)
                .bind(&record.asin)
                .fetch_optional(&mut **tx)
                .await?
            }
            PeriodKey::Monthly { year, month } => {
                sqlx::query(
                    "SELECT 1 FROM monthly_summary WHERE year = ? AND month = ? AND search_query = ? AND asin = ?",
                )
                .bind(year)
                .bind(month)
                .bind(&record.search_query)
                .bind(&record.asin)
                .fetch_optional(&mut **tx)
                .await?
            }
            PeriodKey::Quarterly { year, quarter } => {
                sqlx::query(
                    "SELECT 1 FROM quarterly_summary WHERE year = ? AND quarter = ? AND search_query = ? AND asin = ?",
                )
                .bind(year)
                .bind(quarter)
                .bind(&record.search_query)
                .bind(&record.asin)
                .fetch_optional(&mut **tx)
                .await?
            }
            PeriodKey::Yearly { year } => {
                sqlx::query(
                    "SELECT 1 FROM yearly_summary WHERE year = ? AND search_query = ? AND asin = ?",
                )
                .bind(year)
                .bind(&record.search_query)
                .bind(&record.asin)
                .fetch_optional(&mut **tx)
                .await?
            }
        };
        Ok(row.is_some())
    }

    /// Latest period end already materialized in the weekly summary table;
    /// the scheduler syncs forward from here.
    pub async fn latest_summary_period_end(
        &self,
    ) -> Result<Option<chrono::NaiveDate>, SyncError> {
        let boundary: Option<chrono::NaiveDate> =
            sqlx::query_scalar("SELECT MAX(period_end) FROM weekly_summary")
                .fetch_one(&*self.pool)
                .await?;
        Ok(boundary)
    }
}

fn summary_upsert_sql(period: &PeriodKey) -> String {
    let (table, key_columns, key_placeholders, conflict) = match period {
        PeriodKey::Weekly { .. } => (
            "weekly_summary",
            "period_start, period_end",
            "?, ?",
            "period_start, search_query, asin",
        ),
        PeriodKey::Monthly { .. } => (
            "monthly_summary",
            "year, month, period_start, period_end",
            "?, ?, ?, ?",
            "year, month, search_query, asin",
        ),
        PeriodKey::Quarterly { .. } => (
            "quarterly_summary",
            "year, quarter, period_start, period_end",
            "?, ?, ?, ?",
            "year, quarter, search_query, asin",
        ),
        PeriodKey::Yearly { .. } => (
            "yearly_summary",
            "year, period_start, period_end",
            "?, ?, ?",
            "year, search_query, asin",
        ),
    };
    format!(
        "INSERT INTO {table} ({key_columns}, {SUMMARY_METRIC_COLUMNS}) \
         VALUES ({key_placeholders}, {SUMMARY_METRIC_PLACEHOLDERS}) \
         ON CONFLICT ({conflict}) DO UPDATE SET {SUMMARY_UPDATE_SET}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CartAddData, ClickData, DerivedMetrics, DispersionStats, ImpressionData, PurchaseData,
    };
    use crate::infrastructure::store::connection::StoreConnection;
    use chrono::{NaiveDate, Utc};
    use tempfile::tempdir;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn test_repo() -> (PerformanceRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("repo.db").display());
        let store = StoreConnection::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        (PerformanceRepository::new(store.pool().clone()), dir)
    }

    fn query_record(search_query: &str, impressions: i64) -> QueryPerformanceRecord {
        QueryPerformanceRecord {
            search_query: search_query.to_string(),
            search_query_score: Some(3),
            search_query_volume: Some(1200),
            impressions: ImpressionData {
                total_count: impressions,
                asin_count: impressions / 10,
                asin_share: 0.1,
            },
            clicks: ClickData {
                total_count: impressions / 10,
                total_rate: 0.1,
                asin_count: impressions / 100,
                asin_share: 0.1,
                total_median_price: Some(19.99),
                asin_median_price: Some(18.49),
                same_day_shipping_count: Some(4),
                one_day_shipping_count: Some(9),
                two_day_shipping_count: Some(12),
            },
            cart_adds: CartAddData {
                total_count: impressions / 20,
                total_rate: 0.5,
                asin_count: impressions / 200,
                asin_share: 0.1,
                total_median_price: None,
                asin_median_price: None,
                same_day_shipping_count: None,
                one_day_shipping_count: None,
                two_day_shipping_count: None,
            },
            purchases: PurchaseData {
                total_count: impressions / 50,
                total_rate: 0.2,
                asin_count: impressions / 500,
                asin_share: 0.1,
                total_median_price: Some(21.0),
                asin_median_price: Some(20.0),
                same_day_shipping_count: None,
                one_day_shipping_count: None,
                two_day_shipping_count: None,
            },
            derived: DerivedMetrics::from_counts(
                impressions / 10,
                impressions / 100,
                impressions / 200,
                impressions / 500,
            ),
            impression_stats: DispersionStats::single(impressions / 10),
            active_weeks: 1,
        }
    }

    fn entity(start: &str, end: &str, asin: &str) -> EntityPerformanceRecord {
        EntityPerformanceRecord {
            id: None,
            start_date: d(start),
            end_date: d(end),
            asin: asin.to_string(),
        }
    }

    #[tokio::test]
    async fn entity_upsert_is_idempotent_and_keeps_id() {
        let (repo, _dir) = test_repo().await;
        let record = entity("2025-03-02", "2025-03-08", "B00AAA");

        let (first_id, created) = repo.upsert_entity(&record).await.unwrap();
        assert!(created);
        let (second_id, created) = repo.upsert_entity(&record).await.unwrap();
        assert!(!created);
        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn query_batch_distinguishes_inserts_from_updates() {
        let (repo, _dir) = test_repo().await;
        let (entity_id, _) = repo
            .upsert_entity(&entity("2025-03-02", "2025-03-08", "B00AAA"))
            .await
            .unwrap();

        let batch = vec![query_record("usb hub", 5000), query_record("usb dock", 3000)];
        let stats = repo.upsert_query_batch(entity_id, &batch).await.unwrap();
        assert_eq!(stats, BatchStats { inserted: 2, updated: 0 });

        let stats = repo.upsert_query_batch(entity_id, &batch).await.unwrap();
        assert_eq!(stats, BatchStats { inserted: 0, updated: 2 });

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_performance")
            .fetch_one(&*repo.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn summary_upsert_routes_by_period_key() {
        let (repo, _dir) = test_repo().await;
        let summary = PeriodSummaryRecord {
            period: PeriodKey::Monthly { year: 2025, month: 3 },
            period_start: d("2025-03-02"),
            period_end: d("2025-03-29"),
            search_query: "usb hub".into(),
            asin: "B00AAA".into(),
            total_impressions: 7000,
            asin_impressions: 700,
            total_clicks: 700,
            asin_clicks: 70,
            total_cart_adds: 350,
            asin_cart_adds: 35,
            total_purchases: 140,
            asin_purchases: 14,
            avg_ctr: 0.1,
            avg_cvr: 0.2,
            purchase_per_impression: 0.02,
            impression_share: 0.1,
            click_share: 0.1,
            cart_add_share: 0.1,
            purchase_share: 0.1,
            dispersion: DispersionStats::single(700),
            active_weeks: 2,
            sync_run_id: Some("run-1".into()),
            last_synced_at: Some(Utc::now()),
        };

        let stats = repo
            .upsert_summary_batch(std::slice::from_ref(&summary))
            .await
            .unwrap();
        assert_eq!(stats, BatchStats { inserted: 1, updated: 0 });

        let stats = repo
            .upsert_summary_batch(std::slice::from_ref(&summary))
            .await
            .unwrap();
        assert_eq!(stats, BatchStats { inserted: 0, updated: 1 });

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM monthly_summary")
            .fetch_one(&*repo.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn latest_summary_period_end_reads_weekly_boundary() {
        let (repo, _dir) = test_repo().await;
        assert!(repo.latest_summary_period_end().await.unwrap().is_none());

        let summary = PeriodSummaryRecord {
            period: PeriodKey::Weekly { start: d("2025-03-02") },
            period_start: d("2025-03-02"),
            period_end: d("2025-03-08"),
            search_query: "usb hub".into(),
            asin: "B00AAA".into(),
            total_impressions: 100,
            asin_impressions: 10,
            total_clicks: 10,
            asin_clicks: 1,
            total_cart_adds: 5,
            asin_cart_adds: 1,
            total_purchases: 2,
            asin_purchases: 1,
            avg_ctr: 0.1,
            avg_cvr: 0.2,
            purchase_per_impression: 0.02,
            impression_share: 0.1,
            click_share: 0.1,
            cart_add_share: 0.2,
            purchase_share: 0.5,
            dispersion: DispersionStats::single(10),
            active_weeks: 1,
            sync_run_id: None,
            last_synced_at: None,
        };
        repo.upsert_summary_batch(&[summary]).await.unwrap();

        assert_eq!(
            repo.latest_summary_period_end().await.unwrap(),
            Some(d("2025-03-08"))
        );
    }
}
