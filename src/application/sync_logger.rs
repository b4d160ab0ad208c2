//! Sync-run lifecycle logging, history views, and alert detection.
//!
//! The run's own start/complete/fail writes propagate store errors: a sync
//! must never report success when its record could not be finalized.
//! Diagnostic writes (quality checks) are best-effort and swallowed at
//! debug level so they cannot alter the sync's outcome.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    AlertKind, AlertSeverity, DataQualityCheck, SyncAlert, SyncError, SyncHistoryFilter,
    SyncMetrics, SyncRun, SyncRunCounts, SyncStatus,
};
use crate::infrastructure::config::AlertConfig;
use crate::infrastructure::store::SyncLogRepository;

/// Everything known about a run at the moment it starts.
#[derive(Debug, Clone)]
pub struct SyncStartEntry {
    pub sync_type: String,
    pub source_ref: String,
    pub target_ref: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub metadata: serde_json::Value,
}

pub struct SyncLogger {
    repo: SyncLogRepository,
    alerts: AlertConfig,
}

impl SyncLogger {
    pub fn new(pool: SqlitePool, alerts: AlertConfig) -> Self {
        Self {
            repo: SyncLogRepository::new(pool),
            alerts,
        }
    }

    /// Create the run record with status `started` and return its id.
    pub async fn start_sync(&self, entry: SyncStartEntry) -> Result<String, SyncError> {
        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            sync_type: entry.sync_type,
            status: SyncStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            source_ref: entry.source_ref,
            target_ref: entry.target_ref,
            period_start: entry.period_start,
            period_end: entry.period_end,
            records_processed: 0,
            records_inserted: 0,
            records_updated: 0,
            records_failed: 0,
            error_message: None,
            error_details: None,
            metadata: entry.metadata,
        };
        self.repo.insert_run(&run).await?;
        info!(run_id = %run.id, sync_type = %run.sync_type, "sync run started");
        Ok(run.id)
    }

    /// Terminal transition to `completed` with the final counts.
    pub async fn complete_sync(
        &self,
        run_id: &str,
        counts: &SyncRunCounts,
    ) -> Result<(), SyncError> {
        self.repo.mark_completed(run_id, counts, Utc::now()).await?;
        info!(
            run_id,
            processed = counts.processed,
            inserted = counts.inserted,
            updated = counts.updated,
            failed = counts.failed,
            "sync run completed"
        );
        Ok(())
    }

    /// Terminal transition to `failed` with the error and any partial
    /// counts.
    pub async fn fail_sync(
        &self,
        run_id: &str,
        error_message: &str,
        error_details: Option<serde_json::Value>,
        partial_counts: Option<&SyncRunCounts>,
    ) -> Result<(), SyncError> {
        self.repo
            .mark_failed(
                run_id,
                error_message,
                error_details.as_ref(),
                partial_counts,
                Utc::now(),
            )
            .await?;
        info!(run_id, error = error_message, "sync run failed");
        Ok(())
    }

    /// Persist quality checks, best-effort. A failure here is reported at
    /// debug level and never surfaces to the sync itself.
    pub async fn log_quality_checks(&self, checks: &[DataQualityCheck]) {
        if checks.is_empty() {
            return;
        }
        if let Err(e) = self.repo.insert_quality_checks(checks).await {
            debug!(error = %e, count = checks.len(), "failed to persist data-quality checks");
        }
    }

    pub async fn log_quality_check(&self, check: &DataQualityCheck) {
        self.log_quality_checks(std::slice::from_ref(check)).await;
    }

    pub async fn get_sync_history(
        &self,
        filter: &SyncHistoryFilter,
    ) -> Result<Vec<SyncRun>, SyncError> {
        self.repo.fetch_history(filter).await
    }

    pub async fn get_quality_checks(
        &self,
        run_id: &str,
    ) -> Result<Vec<DataQualityCheck>, SyncError> {
        self.repo.quality_checks_for_run(run_id).await
    }

    /// Completed fraction of the terminal runs in the window, in [0, 1].
    pub async fn get_success_rate(&self, window_hours: i64) -> Result<f64, SyncError> {
        let metrics = self.get_metrics(window_hours).await?;
        Ok(metrics.success_rate)
    }

    /// Aggregate run metrics over the past `window_hours`.
    pub async fn get_metrics(&self, window_hours: i64) -> Result<SyncMetrics, SyncError> {
        let cutoff = Utc::now() - Duration::hours(window_hours);
        let runs = self.repo.fetch_runs_since(cutoff).await?;

        let mut metrics = SyncMetrics {
            total_runs: runs.len() as i64,
            ..SyncMetrics::default()
        };
        let mut duration_sum = 0i64;
        let mut duration_count = 0i64;
        for run in &runs {
            match run.status {
                SyncStatus::Completed => metrics.completed_runs += 1,
                SyncStatus::Failed => metrics.failed_runs += 1,
                SyncStatus::Started => metrics.running_runs += 1,
            }
            metrics.total_records_processed += run.records_processed;
            if let Some(seconds) = run.duration_seconds() {
                duration_sum += seconds;
                duration_count += 1;
            }
        }
        let terminal = metrics.completed_runs + metrics.failed_runs;
        if terminal > 0 {
            metrics.success_rate = metrics.completed_runs as f64 / terminal as f64;
        }
        if duration_count > 0 {
            metrics.avg_duration_seconds = duration_sum as f64 / duration_count as f64;
        }
        Ok(metrics)
    }

    /// Critical alert when the most recent N runs are all failed.
    pub async fn check_for_alerts(&self) -> Result<Option<SyncAlert>, SyncError> {
        let threshold = self.alerts.consecutive_failure_threshold as i64;
        if threshold == 0 {
            return Ok(None);
        }
        let statuses = self.repo.recent_statuses(threshold).await?;
        if statuses.len() < threshold as usize
            || !statuses.iter().all(|s| *s == SyncStatus::Failed)
        {
            return Ok(None);
        }
        Ok(Some(SyncAlert {
            kind: AlertKind::ConsecutiveFailures,
            severity: AlertSeverity::Critical,
            message: format!("last {threshold} sync runs failed consecutively"),
            triggered_at: Utc::now(),
        }))
    }

    /// High-severity alert when a `started` run has exceeded the
    /// configured age.
    pub async fn check_for_long_running_sync(&self) -> Result<Option<SyncAlert>, SyncError> {
        let cutoff = Utc::now() - Duration::minutes(self.alerts.long_running_threshold_minutes);
        let stale = self.repo.stale_started_runs(cutoff).await?;
        let Some(run) = stale.first() else {
            return Ok(None);
        };
        let minutes = (Utc::now() - run.started_at).num_minutes();
        Ok(Some(SyncAlert {
            kind: AlertKind::LongRunningSync,
            severity: AlertSeverity::High,
            message: format!(
                "sync run {} has been running for {minutes} minutes (threshold {})",
                run.id, self.alerts.long_running_threshold_minutes
            ),
            triggered_at: Utc::now(),
        }))
    }

    /// Delete run records older than the retention window. Returns the
    /// number deleted.
    pub async fn cleanup_old_logs(&self, retention_days: i64) -> Result<u64, SyncError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let deleted = self.repo.delete_older_than(cutoff).await?;
        info!(deleted, retention_days, "cleaned up old sync run records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckStatus, CheckType};
    use crate::infrastructure::store::StoreConnection;
    use tempfile::tempdir;

    async fn test_logger(alerts: AlertConfig) -> (SyncLogger, SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("logger.db").display());
        let store = StoreConnection::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        let pool = store.pool().clone();
        (SyncLogger::new(pool.clone(), alerts), pool, dir)
    }

    fn entry() -> SyncStartEntry {
        SyncStartEntry {
            sync_type: "sqp_performance".into(),
            source_ref: "analytics.search_query_performance".into(),
            target_ref: "query_performance".into(),
            period_start: Some("2025-03-02".parse().unwrap()),
            period_end: Some("2025-03-08".parse().unwrap()),
            metadata: serde_json::json!({"triggered_by": "test"}),
        }
    }

    #[tokio::test]
    async fn start_complete_lifecycle() {
        let (logger, _pool, _dir) = test_logger(AlertConfig::default()).await;
        let run_id = logger.start_sync(entry()).await.unwrap();
        let counts = SyncRunCounts {
            processed: 7,
            inserted: 7,
            updated: 0,
            failed: 0,
        };
        logger.complete_sync(&run_id, &counts).await.unwrap();

        let metrics = logger.get_metrics(1).await.unwrap();
        assert_eq!(metrics.total_runs, 1);
        assert_eq!(metrics.completed_runs, 1);
        assert_eq!(metrics.total_records_processed, 7);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn consecutive_failures_trigger_critical_alert() {
        let (logger, _pool, _dir) = test_logger(AlertConfig {
            consecutive_failure_threshold: 2,
            ..AlertConfig::default()
        })
        .await;

        let first = logger.start_sync(entry()).await.unwrap();
        logger.fail_sync(&first, "boom", None, None).await.unwrap();
        assert!(logger.check_for_alerts().await.unwrap().is_none());

        let second = logger.start_sync(entry()).await.unwrap();
        logger.fail_sync(&second, "boom again", None, None).await.unwrap();

        let alert = logger.check_for_alerts().await.unwrap().unwrap();
        assert_eq!(alert.kind, AlertKind::ConsecutiveFailures);
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failure_alert() {
        let (logger, _pool, _dir) = test_logger(AlertConfig {
            consecutive_failure_threshold: 2,
            ..AlertConfig::default()
        })
        .await;

        let a = logger.start_sync(entry()).await.unwrap();
        logger.fail_sync(&a, "boom", None, None).await.unwrap();
        let b = logger.start_sync(entry()).await.unwrap();
        logger
            .complete_sync(&b, &SyncRunCounts::default())
            .await
            .unwrap();

        assert!(logger.check_for_alerts().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn long_running_sync_is_detected() {
        let (logger, pool, _dir) = test_logger(AlertConfig {
            long_running_threshold_minutes: 15,
            ..AlertConfig::default()
        })
        .await;

        let run_id = logger.start_sync(entry()).await.unwrap();
        assert!(logger.check_for_long_running_sync().await.unwrap().is_none());

        // Backdate the run past the threshold.
        sqlx::query("UPDATE sync_runs SET started_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::minutes(30))
            .bind(&run_id)
            .execute(&pool)
            .await
            .unwrap();

        let alert = logger.check_for_long_running_sync().await.unwrap().unwrap();
        assert_eq!(alert.kind, AlertKind::LongRunningSync);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert!(alert.message.contains(&run_id));
    }

    #[tokio::test]
    async fn quality_check_logging_is_best_effort() {
        let (logger, pool, _dir) = test_logger(AlertConfig::default()).await;
        let run_id = logger.start_sync(entry()).await.unwrap();

        let check = DataQualityCheck::new(&run_id, CheckType::RowCount, CheckStatus::Passed);
        logger.log_quality_check(&check).await;
        assert_eq!(logger.get_quality_checks(&run_id).await.unwrap().len(), 1);

        // Close the pool: persisting checks now fails internally, but the
        // call must not error or panic.
        pool.close().await;
        logger.log_quality_checks(&[check]).await;
    }

    #[tokio::test]
    async fn cleanup_returns_deleted_count() {
        let (logger, pool, _dir) = test_logger(AlertConfig::default()).await;
        let run_id = logger.start_sync(entry()).await.unwrap();
        sqlx::query("UPDATE sync_runs SET started_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(120))
            .bind(&run_id)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(logger.cleanup_old_logs(90).await.unwrap(), 1);
        assert_eq!(logger.cleanup_old_logs(90).await.unwrap(), 0);
    }
}
