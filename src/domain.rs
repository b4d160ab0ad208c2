//! Domain module - core record types and business rules of the sync
//! pipeline.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod error;
pub mod period;
pub mod records;
pub mod sync_run;

// Re-export commonly used items for convenience
pub use error::{SyncError, WritePhase};
pub use period::{PeriodKey, PeriodType, SyncWindow};
pub use records::{
    CartAddData, ClickData, DerivedMetrics, DispersionStats, EntityGroup,
    EntityPerformanceRecord, ImpressionData, PeriodSummaryRecord, PurchaseData,
    QueryPerformanceRecord, SourceRow, safe_ratio,
};
pub use sync_run::{
    AlertKind, AlertSeverity, CheckStatus, CheckType, DataQualityCheck, SyncAlert,
    SyncHistoryFilter, SyncMetrics, SyncRun, SyncRunCounts, SyncStatus,
};
