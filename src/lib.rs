//! sqp-sync - periodic search-query performance sync pipeline.
//!
//! Extracts aggregated search-query x ASIN funnel data from the analytical
//! warehouse, reshapes it into a normalized parent/child hierarchy, writes
//! it idempotently into the operational store, validates the result with
//! data-quality checks, and runs under a periodic scheduler with retry and
//! a single-flight concurrency guard.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the main entry points for embedding and the CLI
pub use application::{
    ManualSyncOptions, SchedulerSettings, SyncJobResult, SyncLogger, SyncPipeline, SyncScheduler,
};
pub use domain::{PeriodType, SyncError, SyncWindow};
pub use infrastructure::{AppConfig, StoreConnection};
