//! Sync-run lifecycle records and data-quality check records.
//!
//! A `SyncRun` is created once per pipeline execution with status `started`
//! and mutated exactly once into a terminal `completed` or `failed` state.
//! Quality checks are immutable diagnostics attached to one run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a sync run. `started -> completed | failed`, both
/// terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Started,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Started => "started",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SyncStatus::Started),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("invalid sync status: {other}")),
        }
    }
}

impl Type<sqlx::Sqlite> for SyncStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Record counts accumulated over the write phases of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunCounts {
    pub processed: i64,
    pub inserted: i64,
    pub updated: i64,
    pub failed: i64,
}

/// One end-to-end pipeline execution, tracked in `sync_runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub sync_type: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub source_ref: String,
    pub target_ref: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub records_processed: i64,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl SyncRun {
    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_seconds())
    }
}

/// Category of a data-quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    RowCount,
    SumValidation,
    NullCheck,
    DuplicateCheck,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::RowCount => "row_count",
            CheckType::SumValidation => "sum_validation",
            CheckType::NullCheck => "null_check",
            CheckType::DuplicateCheck => "duplicate_check",
        }
    }
}

impl FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "row_count" => Ok(CheckType::RowCount),
            "sum_validation" => Ok(CheckType::SumValidation),
            "null_check" => Ok(CheckType::NullCheck),
            "duplicate_check" => Ok(CheckType::DuplicateCheck),
            other => Err(format!("invalid check type: {other}")),
        }
    }
}

/// Outcome severity of a data-quality check. `Failed` signals a source data
/// integrity problem, `Warning` a tolerable drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Warning => "warning",
            CheckStatus::Failed => "failed",
        }
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(CheckStatus::Passed),
            "warning" => Ok(CheckStatus::Warning),
            "failed" => Ok(CheckStatus::Failed),
            other => Err(format!("invalid check status: {other}")),
        }
    }
}

/// One reconciliation or consistency check attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityCheck {
    pub sync_run_id: String,
    pub check_type: CheckType,
    pub check_status: CheckStatus,
    pub source_value: Option<f64>,
    pub target_value: Option<f64>,
    pub difference: Option<f64>,
    pub difference_pct: Option<f64>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
}

impl DataQualityCheck {
    pub fn new(sync_run_id: &str, check_type: CheckType, check_status: CheckStatus) -> Self {
        Self {
            sync_run_id: sync_run_id.to_string(),
            check_type,
            check_status,
            source_value: None,
            target_value: None,
            difference: None,
            difference_pct: None,
            table_name: None,
            column_name: None,
            message: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Alert severity for monitoring consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    High,
}

/// Condition an alert reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    LongRunningSync,
}

/// Alert object surfaced to monitoring instead of an exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Filters for history queries.
#[derive(Debug, Clone, Default)]
pub struct SyncHistoryFilter {
    pub sync_type: Option<String>,
    pub status: Option<SyncStatus>,
    pub limit: Option<i64>,
}

/// Aggregate view over run history within a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub total_runs: i64,
    pub completed_runs: i64,
    pub failed_runs: i64,
    pub running_runs: i64,
    pub success_rate: f64,
    pub avg_duration_seconds: f64,
    pub total_records_processed: i64,
}
