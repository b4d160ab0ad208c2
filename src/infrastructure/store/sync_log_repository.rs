//! Persistence for sync run records and data-quality checks.
//!
//! Run rows transition `started -> completed | failed` exactly once; the
//! guards here enforce that at the SQL level so a terminal row can never be
//! rewritten.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::{
    DataQualityCheck, SyncError, SyncHistoryFilter, SyncRun, SyncRunCounts, SyncStatus,
};

#[derive(Clone)]
pub struct SyncLogRepository {
    pool: Arc<SqlitePool>,
}

impl SyncLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn insert_run(&self, run: &SyncRun) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs
            (id, sync_type, status, started_at, source_ref, target_ref,
             period_start, period_end, records_processed, records_inserted,
             records_updated, records_failed, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.sync_type)
        .bind(run.status)
        .bind(run.started_at)
        .bind(&run.source_ref)
        .bind(&run.target_ref)
        .bind(run.period_start)
        .bind(run.period_end)
        .bind(run.records_processed)
        .bind(run.records_inserted)
        .bind(run.records_updated)
        .bind(run.records_failed)
        .bind(run.metadata.to_string())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Transition a started run to `completed`. Refuses runs that are not
    /// currently `started`.
    pub async fn mark_completed(
        &self,
        run_id: &str,
        counts: &SyncRunCounts,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'completed', completed_at = ?,
                records_processed = ?, records_inserted = ?,
                records_updated = ?, records_failed = ?
            WHERE id = ? AND status = 'started'
            "#,
        )
        .bind(completed_at)
        .bind(counts.processed)
        .bind(counts.inserted)
        .bind(counts.updated)
        .bind(counts.failed)
        .bind(run_id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunLifecycle(format!(
                "run {run_id} is not in 'started' state"
            )));
        }
        Ok(())
    }

    /// Transition a started run to `failed`, recording the error and any
    /// partial counts.
    pub async fn mark_failed(
        &self,
        run_id: &str,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
        partial_counts: Option<&SyncRunCounts>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let counts = partial_counts.copied().unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'failed', completed_at = ?, error_message = ?, error_details = ?,
                records_processed = ?, records_inserted = ?,
                records_updated = ?, records_failed = ?
            WHERE id = ? AND status = 'started'
            "#,
        )
        .bind(completed_at)
        .bind(error_message)
        .bind(error_details.map(ToString::to_string))
        .bind(counts.processed)
        .bind(counts.inserted)
        .bind(counts.updated)
        .bind(counts.failed)
        .bind(run_id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunLifecycle(format!(
                "run {run_id} is not in 'started' state"
            )));
        }
        Ok(())
    }

    pub async fn insert_quality_check(&self, check: &DataQualityCheck) -> Result<(), SyncError> {
        self.insert_quality_checks(std::slice::from_ref(check)).await
    }

    pub async fn insert_quality_checks(
        &self,
        checks: &[DataQualityCheck],
    ) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await?;
        for check in checks {
            sqlx::query(
                r#"
                INSERT INTO data_quality_checks
                (sync_run_id, check_type, check_status, source_value, target_value,
                 difference, difference_pct, table_name, column_name, message, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&check.sync_run_id)
            .bind(check.check_type.as_str())
            .bind(check.check_status.as_str())
            .bind(check.source_value)
            .bind(check.target_value)
            .bind(check.difference)
            .bind(check.difference_pct)
            .bind(&check.table_name)
            .bind(&check.column_name)
            .bind(&check.message)
            .bind(check.metadata.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_run(&self, run_id: &str) -> Result<Option<SyncRun>, SyncError> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|row| row_to_run(&row)).transpose()
    }

    pub async fn fetch_history(
        &self,
        filter: &SyncHistoryFilter,
    ) -> Result<Vec<SyncRun>, SyncError> {
        let mut sql = String::from("SELECT * FROM sync_runs");
        let mut conditions = Vec::new();
        if filter.sync_type.is_some() {
            conditions.push("sync_type = ?");
        }
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(sync_type) = &filter.sync_type {
            query = query.bind(sync_type);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        query = query.bind(filter.limit.unwrap_or(50));

        let rows = query.fetch_all(&*self.pool).await?;
        rows.iter().map(row_to_run).collect()
    }

    /// All runs started at or after the cutoff, newest first.
    pub async fn fetch_runs_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>, SyncError> {
        let rows =
            sqlx::query("SELECT * FROM sync_runs WHERE started_at >= ? ORDER BY started_at DESC")
                .bind(cutoff)
                .fetch_all(&*self.pool)
                .await?;
        rows.iter().map(row_to_run).collect()
    }

    /// Statuses of the most recent `limit` runs, newest first.
    pub async fn recent_statuses(&self, limit: i64) -> Result<Vec<SyncStatus>, SyncError> {
        let rows =
            sqlx::query("SELECT status FROM sync_runs ORDER BY started_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&*self.pool)
                .await?;
        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                SyncStatus::from_str(&status)
                    .map_err(|e| SyncError::Decode(format!("sync_runs.status: {e}")))
            })
            .collect()
    }

    /// Runs still `started` that began before the cutoff.
    pub async fn stale_started_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>, SyncError> {
        let rows = sqlx::query(
            "SELECT * FROM sync_runs WHERE status = 'started' AND started_at < ? ORDER BY started_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }

    /// Delete runs started before the cutoff; cascade removes their checks.
    /// Returns the number of runs deleted.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        let result = sqlx::query("DELETE FROM sync_runs WHERE started_at < ?")
            .bind(cutoff)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn quality_checks_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<DataQualityCheck>, SyncError> {
        let rows = sqlx::query(
            "SELECT * FROM data_quality_checks WHERE sync_run_id = ? ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_check).collect()
    }
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun, SyncError> {
    let status: String = row.get("status");
    let metadata: Option<String> = row.get("metadata");
    let error_details: Option<String> = row.get("error_details");
    Ok(SyncRun {
        id: row.get("id"),
        sync_type: row.get("sync_type"),
        status: SyncStatus::from_str(&status)
            .map_err(|e| SyncError::Decode(format!("sync_runs.status: {e}")))?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        source_ref: row.get("source_ref"),
        target_ref: row.get("target_ref"),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        records_processed: row.get("records_processed"),
        records_inserted: row.get("records_inserted"),
        records_updated: row.get("records_updated"),
        records_failed: row.get("records_failed"),
        error_message: row.get("error_message"),
        error_details: error_details
            .and_then(|raw| serde_json::from_str(&raw).ok()),
        metadata: metadata
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_check(row: &SqliteRow) -> Result<DataQualityCheck, SyncError> {
    let check_type: String = row.get("check_type");
    let check_status: String = row.get("check_status");
    let metadata: Option<String> = row.get("metadata");
    Ok(DataQualityCheck {
        sync_run_id: row.get("sync_run_id"),
        check_type: check_type
            .parse()
            .map_err(|e| SyncError::Decode(format!("data_quality_checks.check_type: {e}")))?,
        check_status: check_status
            .parse()
            .map_err(|e| SyncError::Decode(format!("data_quality_checks.check_status: {e}")))?,
        source_value: row.get("source_value"),
        target_value: row.get("target_value"),
        difference: row.get("difference"),
        difference_pct: row.get("difference_pct"),
        table_name: row.get("table_name"),
        column_name: row.get("column_name"),
        message: row.get("message"),
        metadata: metadata
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckStatus, CheckType};
    use crate::infrastructure::store::connection::StoreConnection;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn test_repo() -> (SyncLogRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("log.db").display());
        let store = StoreConnection::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        (SyncLogRepository::new(store.pool().clone()), dir)
    }

    fn run(id: &str, started_at: DateTime<Utc>) -> SyncRun {
        SyncRun {
            id: id.to_string(),
            sync_type: "sqp_performance".into(),
            status: SyncStatus::Started,
            started_at,
            completed_at: None,
            source_ref: "analytics.search_query_performance".into(),
            target_ref: "query_performance".into(),
            period_start: None,
            period_end: None,
            records_processed: 0,
            records_inserted: 0,
            records_updated: 0,
            records_failed: 0,
            error_message: None,
            error_details: None,
            metadata: serde_json::json!({"triggered_by": "test"}),
        }
    }

    #[tokio::test]
    async fn run_lifecycle_roundtrip() {
        let (repo, _dir) = test_repo().await;
        repo.insert_run(&run("run-1", Utc::now())).await.unwrap();

        let counts = SyncRunCounts {
            processed: 10,
            inserted: 8,
            updated: 2,
            failed: 0,
        };
        repo.mark_completed("run-1", &counts, Utc::now()).await.unwrap();

        let stored = repo.fetch_run("run-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Completed);
        assert_eq!(stored.records_processed, 10);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.metadata["triggered_by"], "test");
    }

    #[tokio::test]
    async fn terminal_runs_reject_further_transitions() {
        let (repo, _dir) = test_repo().await;
        repo.insert_run(&run("run-1", Utc::now())).await.unwrap();
        repo.mark_completed("run-1", &SyncRunCounts::default(), Utc::now())
            .await
            .unwrap();

        let err = repo
            .mark_failed("run-1", "late failure", None, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RunLifecycle(_)));

        let err = repo
            .mark_completed("run-1", &SyncRunCounts::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RunLifecycle(_)));
    }

    #[tokio::test]
    async fn failed_run_records_error_and_partial_counts() {
        let (repo, _dir) = test_repo().await;
        repo.insert_run(&run("run-1", Utc::now())).await.unwrap();

        let partial = SyncRunCounts {
            processed: 4,
            inserted: 2,
            updated: 0,
            failed: 2,
        };
        repo.mark_failed(
            "run-1",
            "warehouse connection failed: timeout",
            Some(&serde_json::json!({"attempt": 3})),
            Some(&partial),
            Utc::now(),
        )
        .await
        .unwrap();

        let stored = repo.fetch_run("run-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.records_failed, 2);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("warehouse connection failed: timeout")
        );
        assert_eq!(stored.error_details.unwrap()["attempt"], 3);
    }

    #[tokio::test]
    async fn history_filters_by_status_and_type() {
        let (repo, _dir) = test_repo().await;
        let now = Utc::now();
        repo.insert_run(&run("a", now - Duration::minutes(3))).await.unwrap();
        repo.insert_run(&run("b", now - Duration::minutes(2))).await.unwrap();
        repo.insert_run(&run("c", now - Duration::minutes(1))).await.unwrap();
        repo.mark_completed("b", &SyncRunCounts::default(), now).await.unwrap();

        let completed = repo
            .fetch_history(&SyncHistoryFilter {
                status: Some(SyncStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "b");

        let recent = repo
            .fetch_history(&SyncHistoryFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "c");
    }

    #[tokio::test]
    async fn recent_statuses_are_newest_first() {
        let (repo, _dir) = test_repo().await;
        let now = Utc::now();
        repo.insert_run(&run("old", now - Duration::minutes(2))).await.unwrap();
        repo.insert_run(&run("new", now)).await.unwrap();
        repo.mark_failed("new", "boom", None, None, now).await.unwrap();

        let statuses = repo.recent_statuses(2).await.unwrap();
        assert_eq!(statuses, vec![SyncStatus::Failed, SyncStatus::Started]);
    }

    #[tokio::test]
    async fn quality_checks_attach_to_run() {
        let (repo, _dir) = test_repo().await;
        repo.insert_run(&run("run-1", Utc::now())).await.unwrap();

        let mut check = DataQualityCheck::new("run-1", CheckType::RowCount, CheckStatus::Passed);
        check.source_value = Some(10.0);
        check.target_value = Some(10.0);
        check.table_name = Some("query_performance".into());
        repo.insert_quality_check(&check).await.unwrap();

        let null_check =
            DataQualityCheck::new("run-1", CheckType::NullCheck, CheckStatus::Warning);
        let dup_check =
            DataQualityCheck::new("run-1", CheckType::DuplicateCheck, CheckStatus::Passed);
        repo.insert_quality_checks(&[null_check, dup_check]).await.unwrap();

        let checks = repo.quality_checks_for_run("run-1").await.unwrap();
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].check_type, CheckType::RowCount);
        assert_eq!(checks[1].check_type, CheckType::NullCheck);
    }

    #[tokio::test]
    async fn cleanup_deletes_old_runs_only() {
        let (repo, _dir) = test_repo().await;
        let now = Utc::now();
        repo.insert_run(&run("ancient", now - Duration::days(120))).await.unwrap();
        repo.insert_run(&run("recent", now - Duration::days(5))).await.unwrap();

        let deleted = repo
            .delete_older_than(now - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.fetch_run("ancient").await.unwrap().is_none());
        assert!(repo.fetch_run("recent").await.unwrap().is_some());
    }
}
