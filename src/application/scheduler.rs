//! Sync scheduler: periodic trigger, retry with fixed delay, and the
//! single-flight concurrency guard.
//!
//! At most one sync executes at a time process-wide. The guard is an
//! explicit compare-and-set over a two-state flag with an RAII release,
//! and the retry wait goes through an injectable sleeper so tests can run
//! retry sequences without wall-clock delay.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{PeriodType, SyncError, SyncWindow};
use crate::infrastructure::config::{AppConfig, SchedulerConfig};

use super::pipeline::{SyncExecutor, SyncRequest};
use super::sync_logger::{SyncLogger, SyncStartEntry};

/// Async sleep dependency; injectable so retry tests run instantly.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of one sync job, terminal after retries.
#[derive(Debug, Clone, Serialize)]
pub struct SyncJobResult {
    pub success: bool,
    pub records_processed: i64,
    pub retry_count: u32,
    pub errors: Vec<String>,
    pub sync_run_id: Option<String>,
    pub triggered_by: String,
    pub dry_run: bool,
}

impl SyncJobResult {
    fn rejected(triggered_by: &str) -> Self {
        Self {
            success: false,
            records_processed: 0,
            retry_count: 0,
            errors: vec![SyncError::AlreadyRunning.to_string()],
            sync_run_id: None,
            triggered_by: triggered_by.to_string(),
            dry_run: false,
        }
    }
}

/// Read-only snapshot for monitoring consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSnapshot {
    pub is_running: bool,
    pub current_sync_id: Option<String>,
}

/// Options for a manually triggered sync.
#[derive(Debug, Clone, Default)]
pub struct ManualSyncOptions {
    /// Explicit window override; when absent the window resumes from the
    /// last synced boundary.
    pub window: Option<SyncWindow>,
    /// Extract and validate without writing.
    pub dry_run: bool,
    /// Sync even when the new-data check reports nothing new.
    pub force: bool,
}

/// Scheduler settings assembled from the app config.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub sync_type: String,
    pub source_ref: String,
    pub target_ref: String,
    pub period_type: PeriodType,
    pub interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub initial_lookback_days: i64,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let SchedulerConfig {
            interval_seconds,
            retry_attempts,
            retry_delay_ms,
        } = config.scheduler;
        Self {
            sync_type: config.sync.sync_type.clone(),
            source_ref: config.warehouse.source_table.clone(),
            target_ref: "query_performance".to_string(),
            period_type: config.sync.period_type,
            interval: Duration::from_secs(interval_seconds),
            retry_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            initial_lookback_days: config.sync.initial_lookback_days,
        }
    }
}

pub struct SyncScheduler<E: SyncExecutor> {
    executor: Arc<E>,
    logger: Arc<SyncLogger>,
    settings: SchedulerSettings,
    running: AtomicBool,
    current_sync: Mutex<Option<String>>,
    sleeper: Arc<dyn Sleeper>,
}

/// RAII release of the single-flight guard.
struct FlightGuard<'a, E: SyncExecutor> {
    scheduler: &'a SyncScheduler<E>,
}

impl<E: SyncExecutor> Drop for FlightGuard<'_, E> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.scheduler.current_sync.lock() {
            *current = None;
        }
        self.scheduler.running.store(false, Ordering::SeqCst);
    }
}

impl<E: SyncExecutor> SyncScheduler<E> {
    pub fn new(executor: Arc<E>, logger: Arc<SyncLogger>, settings: SchedulerSettings) -> Self {
        Self::with_sleeper(executor, logger, settings, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        executor: Arc<E>,
        logger: Arc<SyncLogger>,
        settings: SchedulerSettings,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            executor,
            logger,
            settings,
            running: AtomicBool::new(false),
            current_sync: Mutex::new(None),
            sleeper,
        }
    }

    /// Whether the warehouse has data beyond the last synced boundary.
    pub async fn check_for_new_data(&self) -> Result<bool, SyncError> {
        let Some(available) = self.executor.warehouse_boundary().await? else {
            return Ok(false);
        };
        let synced = self.executor.latest_synced_boundary().await?;
        Ok(match synced {
            None => true,
            Some(boundary) => available > boundary,
        })
    }

    /// Run one scheduled sync job through the retry loop.
    pub async fn execute_sync_job(&self) -> SyncJobResult {
        self.run_job("scheduled", ManualSyncOptions::default()).await
    }

    /// Manual trigger; reuses the scheduled execution path. Without
    /// `force` (and without an explicit window) the job is skipped when
    /// the warehouse has nothing new.
    pub async fn trigger_manual_sync(&self, options: ManualSyncOptions) -> SyncJobResult {
        if options.window.is_none() && !options.force {
            match self.check_for_new_data().await {
                Ok(true) => {}
                Ok(false) => {
                    info!("manual sync skipped: no new warehouse data");
                    return SyncJobResult {
                        success: true,
                        records_processed: 0,
                        retry_count: 0,
                        errors: Vec::new(),
                        sync_run_id: None,
                        triggered_by: "manual".to_string(),
                        dry_run: options.dry_run,
                    };
                }
                Err(e) => {
                    return SyncJobResult {
                        success: false,
                        records_processed: 0,
                        retry_count: 0,
                        errors: vec![e.to_string()],
                        sync_run_id: None,
                        triggered_by: "manual".to_string(),
                        dry_run: options.dry_run,
                    };
                }
            }
        }
        self.run_job("manual", options).await
    }

    /// Snapshot for external monitoring. The current sync id clears once
    /// the run is terminal.
    pub fn get_sync_status(&self) -> SyncStatusSnapshot {
        SyncStatusSnapshot {
            is_running: self.running.load(Ordering::SeqCst),
            current_sync_id: self
                .current_sync
                .lock()
                .ok()
                .and_then(|current| current.clone()),
        }
    }

    /// Periodic loop: check for new data on every tick, sync when there is
    /// any, stop on ctrl-c.
    pub async fn run(&self) -> Result<(), SyncError> {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_seconds = self.settings.interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_for_new_data().await {
                        Ok(true) => {
                            let result = self.execute_sync_job().await;
                            info!(
                                success = result.success,
                                records_processed = result.records_processed,
                                retry_count = result.retry_count,
                                "scheduled sync finished"
                            );
                        }
                        Ok(false) => debug!("no new warehouse data"),
                        Err(e) => warn!(error = %e, "new-data check failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }
        Ok(())
    }

    fn try_begin(&self) -> Result<FlightGuard<'_, E>, SyncError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(FlightGuard { scheduler: self })
    }

    async fn run_job(&self, triggered_by: &str, options: ManualSyncOptions) -> SyncJobResult {
        let _guard = match self.try_begin() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(triggered_by, "sync rejected: another sync is in flight");
                return SyncJobResult::rejected(triggered_by);
            }
        };

        let dry_run = options.dry_run;
        let failure =
            |errors: Vec<String>, retry_count: u32, sync_run_id: Option<String>| SyncJobResult {
                success: false,
                records_processed: 0,
                retry_count,
                errors,
                sync_run_id,
                triggered_by: triggered_by.to_string(),
                dry_run,
            };

        // Window: explicit override, or resume after the synced boundary.
        let window = match options.window {
            Some(window) => window,
            None => {
                let boundary = match self.executor.latest_synced_boundary().await {
                    Ok(boundary) => boundary,
                    Err(e) => return failure(vec![e.to_string()], 0, None),
                };
                SyncWindow::following(
                    boundary,
                    Utc::now().date_naive(),
                    self.settings.initial_lookback_days,
                )
            }
        };

        let entry = SyncStartEntry {
            sync_type: self.settings.sync_type.clone(),
            source_ref: self.settings.source_ref.clone(),
            target_ref: self.settings.target_ref.clone(),
            period_start: Some(window.start),
            period_end: Some(window.end),
            metadata: serde_json::json!({
                "triggered_by": triggered_by,
                "period_type": self.settings.period_type,
                "dry_run": dry_run,
            }),
        };
        let run_id = match self.logger.start_sync(entry).await {
            Ok(run_id) => run_id,
            Err(e) => return failure(vec![e.to_string()], 0, None),
        };
        if let Ok(mut current) = self.current_sync.lock() {
            *current = Some(run_id.clone());
        }

        let request = SyncRequest {
            window,
            period_type: self.settings.period_type,
            sync_run_id: run_id.clone(),
            dry_run,
        };

        let max_attempts = self.settings.retry_attempts.max(1);
        let mut retry_count: u32 = 0;
        let mut last_error: Option<SyncError> = None;

        for attempt in 1..=max_attempts {
            match self.executor.execute(&request).await {
                Ok(execution) => {
                    if let Err(e) = self.logger.complete_sync(&run_id, &execution.counts).await {
                        // Propagating variant: a run whose own record could
                        // not be finalized is not a success.
                        warn!(run_id = %run_id, error = %e, "failed to finalize sync run");
                        return failure(vec![e.to_string()], retry_count, Some(run_id));
                    }
                    self.logger.log_quality_checks(&execution.quality_checks).await;
                    return SyncJobResult {
                        success: true,
                        records_processed: execution.counts.processed,
                        retry_count,
                        errors: execution.batch_errors,
                        sync_run_id: Some(run_id),
                        triggered_by: triggered_by.to_string(),
                        dry_run,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "sync attempt failed");
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if retryable {
                        retry_count += 1;
                        if attempt < max_attempts {
                            self.sleeper.sleep(self.settings.retry_delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "sync failed".to_string());
        if let Err(e) = self.logger.fail_sync(&run_id, &message, None, None).await {
            warn!(run_id = %run_id, error = %e, "failed to record sync failure");
        }
        failure(vec![message], retry_count, Some(run_id))
    }
}
