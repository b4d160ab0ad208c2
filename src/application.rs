//! Application layer: the transformer, quality checker, sync logger,
//! pipeline wiring, and the scheduler that orchestrates them.

pub mod pipeline;
pub mod quality;
pub mod rollup;
pub mod scheduler;
pub mod sync_logger;
pub mod transformer;

pub use pipeline::{SyncExecution, SyncExecutor, SyncPipeline, SyncRequest};
pub use quality::DataQualityChecker;
pub use scheduler::{
    ManualSyncOptions, SchedulerSettings, Sleeper, SyncJobResult, SyncScheduler,
    SyncStatusSnapshot, TokioSleeper,
};
pub use sync_logger::{SyncLogger, SyncStartEntry};
pub use transformer::{NestedDataTransformer, WriteOutcome};
