//! Operational store connection and pool management.
//!
//! SQLite via sqlx; the schema is bootstrapped with idempotent CREATE
//! statements at startup.

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

use crate::domain::SyncError;

pub struct StoreConnection {
    pool: SqlitePool,
}

impl StoreConnection {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SyncError> {
        // Create the database file and its directory if necessary.
        let db_path = if let Some(stripped) = database_url.strip_prefix("sqlite://") {
            stripped
        } else if let Some(stripped) = database_url.strip_prefix("sqlite:") {
            stripped
        } else {
            database_url
        };

        if db_path != ":memory:" && !Path::new(db_path).exists() {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::Connection(format!("failed to create {}: {e}", parent.display())))?;
            }
            std::fs::File::create(db_path)
                .map_err(|e| SyncError::Connection(format!("failed to create {db_path}: {e}")))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the destination and operational tables.
    pub async fn migrate(&self) -> Result<(), SyncError> {
        let create_entity_performance_sql = r#"
            CREATE TABLE IF NOT EXISTS entity_performance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_date DATE NOT NULL,
                end_date DATE NOT NULL,
                asin TEXT NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (start_date, end_date, asin)
            )
        "#;

        let create_query_performance_sql = r#"
            CREATE TABLE IF NOT EXISTS query_performance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_performance_id INTEGER NOT NULL REFERENCES entity_performance (id) ON DELETE CASCADE,
                search_query TEXT NOT NULL,
                search_query_score INTEGER,
                search_query_volume INTEGER,
                total_impressions INTEGER NOT NULL DEFAULT 0,
                asin_impressions INTEGER NOT NULL DEFAULT 0,
                impression_share REAL NOT NULL DEFAULT 0,
                total_clicks INTEGER NOT NULL DEFAULT 0,
                click_rate REAL NOT NULL DEFAULT 0,
                asin_clicks INTEGER NOT NULL DEFAULT 0,
                click_share REAL NOT NULL DEFAULT 0,
                total_median_click_price REAL,
                asin_median_click_price REAL,
                same_day_shipping_clicks INTEGER,
                one_day_shipping_clicks INTEGER,
                two_day_shipping_clicks INTEGER,
                total_cart_adds INTEGER NOT NULL DEFAULT 0,
                cart_add_rate REAL NOT NULL DEFAULT 0,
                asin_cart_adds INTEGER NOT NULL DEFAULT 0,
                cart_add_share REAL NOT NULL DEFAULT 0,
                total_median_cart_add_price REAL,
                asin_median_cart_add_price REAL,
                same_day_shipping_cart_adds INTEGER,
                one_day_shipping_cart_adds INTEGER,
                two_day_shipping_cart_adds INTEGER,
                total_purchases INTEGER NOT NULL DEFAULT 0,
                purchase_rate REAL NOT NULL DEFAULT 0,
                asin_purchases INTEGER NOT NULL DEFAULT 0,
                purchase_share REAL NOT NULL DEFAULT 0,
                total_median_purchase_price REAL,
                asin_median_purchase_price REAL,
                same_day_shipping_purchases INTEGER,
                one_day_shipping_purchases INTEGER,
                two_day_shipping_purchases INTEGER,
                click_through_rate REAL NOT NULL DEFAULT 0,
                conversion_rate REAL NOT NULL DEFAULT 0,
                cart_to_click_rate REAL NOT NULL DEFAULT 0,
                purchase_to_cart_rate REAL NOT NULL DEFAULT 0,
                funnel_completion_rate REAL NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (entity_performance_id, search_query)
            )
        "#;

        // Shared metric column block for the four summary tables.
        let summary_metric_columns = r#"
                search_query TEXT NOT NULL,
                asin TEXT NOT NULL,
                total_impressions INTEGER NOT NULL DEFAULT 0,
                asin_impressions INTEGER NOT NULL DEFAULT 0,
                total_clicks INTEGER NOT NULL DEFAULT 0,
                asin_clicks INTEGER NOT NULL DEFAULT 0,
                total_cart_adds INTEGER NOT NULL DEFAULT 0,
                asin_cart_adds INTEGER NOT NULL DEFAULT 0,
                total_purchases INTEGER NOT NULL DEFAULT 0,
                asin_purchases INTEGER NOT NULL DEFAULT 0,
                avg_ctr REAL NOT NULL DEFAULT 0,
                avg_cvr REAL NOT NULL DEFAULT 0,
                purchase_per_impression REAL NOT NULL DEFAULT 0,
                impression_share REAL NOT NULL DEFAULT 0,
                click_share REAL NOT NULL DEFAULT 0,
                cart_add_share REAL NOT NULL DEFAULT 0,
                purchase_share REAL NOT NULL DEFAULT 0,
                min_impressions INTEGER NOT NULL DEFAULT 0,
                max_impressions INTEGER NOT NULL DEFAULT 0,
                avg_impressions REAL NOT NULL DEFAULT 0,
                stddev_impressions REAL NOT NULL DEFAULT 0,
                active_weeks INTEGER NOT NULL DEFAULT 0,
                sync_run_id TEXT,
                last_synced_at DATETIME
        "#;

        let create_weekly_summary_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS weekly_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                {summary_metric_columns},
                UNIQUE (period_start, search_query, asin)
            )
        "#
        );

        let create_monthly_summary_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS monthly_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                {summary_metric_columns},
                UNIQUE (year, month, search_query, asin)
            )
        "#
        );

        let create_quarterly_summary_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS quarterly_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year INTEGER NOT NULL,
                quarter INTEGER NOT NULL,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                {summary_metric_columns},
                UNIQUE (year, quarter, search_query, asin)
            )
        "#
        );

        let create_yearly_summary_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS yearly_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year INTEGER NOT NULL,
                period_start DATE NOT NULL,
                period_end DATE NOT NULL,
                {summary_metric_columns},
                UNIQUE (year, search_query, asin)
            )
        "#
        );

        let create_sync_runs_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                sync_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'started',
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                source_ref TEXT NOT NULL,
                target_ref TEXT NOT NULL,
                period_start DATE,
                period_end DATE,
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_inserted INTEGER NOT NULL DEFAULT 0,
                records_updated INTEGER NOT NULL DEFAULT 0,
                records_failed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                error_details TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
        "#;

        let create_quality_checks_sql = r#"
            CREATE TABLE IF NOT EXISTS data_quality_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sync_run_id TEXT NOT NULL REFERENCES sync_runs (id) ON DELETE CASCADE,
                check_type TEXT NOT NULL,
                check_status TEXT NOT NULL,
                source_value REAL,
                target_value REAL,
                difference REAL,
                difference_pct REAL,
                table_name TEXT,
                column_name TEXT,
                message TEXT,
                metadata TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_query_performance_entity ON query_performance (entity_performance_id);
            CREATE INDEX IF NOT EXISTS idx_weekly_summary_period_end ON weekly_summary (period_end);
            CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs (started_at);
            CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs (status);
            CREATE INDEX IF NOT EXISTS idx_quality_checks_run ON data_quality_checks (sync_run_id);
        "#;

        sqlx::query(create_entity_performance_sql).execute(&self.pool).await?;
        sqlx::query(create_query_performance_sql).execute(&self.pool).await?;
        sqlx::query(&create_weekly_summary_sql).execute(&self.pool).await?;
        sqlx::query(&create_monthly_summary_sql).execute(&self.pool).await?;
        sqlx::query(&create_quarterly_summary_sql).execute(&self.pool).await?;
        sqlx::query(&create_yearly_summary_sql).execute(&self.pool).await?;
        sqlx::query(create_sync_runs_sql).execute(&self.pool).await?;
        sqlx::query(create_quality_checks_sql).execute(&self.pool).await?;
        for statement in create_indexes_sql.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connect_creates_database_file() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let store = StoreConnection::connect(&database_url, 2).await.unwrap();
        assert!(!store.pool().is_closed());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn migrate_creates_all_tables() {
        let temp_dir = tempdir().unwrap();
        let database_url = format!("sqlite:{}", temp_dir.path().join("migrate.db").display());

        let store = StoreConnection::connect(&database_url, 2).await.unwrap();
        store.migrate().await.unwrap();

        for table in [
            "entity_performance",
            "query_performance",
            "weekly_summary",
            "monthly_summary",
            "quarterly_summary",
            "yearly_summary",
            "sync_runs",
            "data_quality_checks",
        ] {
            let found = sqlx::query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_optional(store.pool())
            .await
            .unwrap();
            assert!(found.is_some(), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let database_url = format!("sqlite:{}", temp_dir.path().join("twice.db").display());

        let store = StoreConnection::connect(&database_url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }
}
