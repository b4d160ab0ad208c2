//! Configuration loading and management for the sync pipeline.
//!
//! The config file is plain JSON with one section per concern; every field
//! has a serde default so a partial file stays valid. A missing file is
//! created with defaults on first load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::domain::PeriodType;
use crate::infrastructure::warehouse::AsinFilterStrategy;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub warehouse: WarehouseConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub alerts: AlertConfig,
    pub logging: LoggingConfig,
}

/// What one sync covers and how its writes are batched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Label stamped onto every sync run record.
    pub sync_type: String,

    /// Summary granularity the pipeline extracts and rolls up to.
    pub period_type: PeriodType,

    /// Which ASINs the aggregation query includes.
    pub asin_filter: AsinFilterStrategy,

    /// Batch size for query-performance upserts.
    pub query_batch_size: usize,

    /// Batch size for period-summary upserts.
    pub summary_batch_size: usize,

    /// Window reach-back for the very first sync, in days.
    pub initial_lookback_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_type: "sqp_performance".to_string(),
            period_type: PeriodType::Weekly,
            asin_filter: AsinFilterStrategy::All,
            query_batch_size: 100,
            summary_batch_size: 50,
            initial_lookback_days: 28,
        }
    }
}

/// Analytical warehouse endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Query endpoint SQL statements are posted to.
    pub endpoint: String,

    /// Fully qualified source table.
    pub source_table: String,

    /// Maximum concurrently checked-out query clients.
    pub pool_size: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9050/v1/query".to_string(),
            source_table: "analytics.search_query_performance".to_string(),
            pool_size: 4,
            request_timeout_seconds: 120,
        }
    }
}

/// Operational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/sqp_sync.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Periodic trigger and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between new-data checks.
    pub interval_seconds: u64,

    /// Maximum sync attempts per job.
    pub retry_attempts: u32,

    /// Fixed wait between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            retry_attempts: 3,
            retry_delay_ms: 5000,
        }
    }
}

/// Alert detection and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Critical alert after this many consecutive failed runs.
    pub consecutive_failure_threshold: u32,

    /// High-severity alert once a started run exceeds this age.
    pub long_running_threshold_minutes: i64,

    /// Run records older than this are removed by cleanup.
    pub retention_days: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 2,
            long_running_threshold_minutes: 15,
            retention_days: 90,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Emit JSON formatted logs.
    pub json_format: bool,

    /// Also write to a rolling file under `log_dir`.
    pub file_output: bool,

    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_output: false,
            log_dir: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the config file, creating it with defaults when missing.
    pub async fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: AppConfig = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save(path).await?;
            info!(path = %path.display(), "created default config file");
            Ok(config)
        }
    }

    /// Write the configuration as pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw)
            .await
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_batch_sizes() {
        let config = AppConfig::default();
        assert_eq!(config.sync.query_batch_size, 100);
        assert_eq!(config.sync.summary_batch_size, 50);
        assert_eq!(config.scheduler.retry_attempts, 3);
        assert_eq!(config.alerts.consecutive_failure_threshold, 2);
        assert_eq!(config.alerts.long_running_threshold_minutes, 15);
    }

    #[test]
    fn partial_config_is_filled_with_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"scheduler": {"retry_attempts": 5}}"#).unwrap();
        assert_eq!(config.scheduler.retry_attempts, 5);
        assert_eq!(config.scheduler.retry_delay_ms, 5000);
        assert_eq!(config.sync.period_type, PeriodType::Weekly);
    }

    #[tokio::test]
    async fn load_creates_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.warehouse.pool_size, 4);

        // Round-trips through the file it just wrote.
        let reloaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.sync.sync_type, config.sync.sync_type);
    }
}
