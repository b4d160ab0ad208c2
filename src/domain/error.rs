//! Error taxonomy for the sync pipeline.

use std::fmt;
use thiserror::Error;

/// Write phase a batch error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    EntityPerformance,
    QueryPerformance,
    PeriodSummary,
}

impl fmt::Display for WritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WritePhase::EntityPerformance => "entity_performance",
            WritePhase::QueryPerformance => "query_performance",
            WritePhase::PeriodSummary => "period_summary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient warehouse or store connectivity failure; retried by the
    /// scheduler.
    #[error("warehouse connection failed: {0}")]
    Connection(String),

    /// Warehouse response could not be decoded into source rows.
    #[error("warehouse response decode failed: {0}")]
    Decode(String),

    /// Structurally invalid nested data; fatal, raised before any writes.
    #[error("invalid nested data: {0}")]
    Validation(String),

    /// A single batch's write failed. Isolated: collected into the write
    /// outcome, never propagated past the transformer.
    #[error("{phase} batch {batch_index} failed ({rows} rows): {message}")]
    BatchWrite {
        phase: WritePhase,
        batch_index: usize,
        rows: usize,
        message: String,
    },

    /// A sync was requested while another one is in flight.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// Attempted transition on a run record that is not in the expected
    /// state (e.g. completing an already-terminal run).
    #[error("invalid run lifecycle transition: {0}")]
    RunLifecycle(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the scheduler's retry loop should attempt the sync again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::Connection("timeout".into()).is_retryable());
        assert!(!SyncError::Validation("missing funnel".into()).is_retryable());
        assert!(!SyncError::AlreadyRunning.is_retryable());
        assert!(
            !SyncError::BatchWrite {
                phase: WritePhase::QueryPerformance,
                batch_index: 0,
                rows: 100,
                message: "constraint".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn batch_error_message_names_phase_and_batch() {
        let err = SyncError::BatchWrite {
            phase: WritePhase::PeriodSummary,
            batch_index: 3,
            rows: 50,
            message: "disk full".into(),
        };
        let text = err.to_string();
        assert!(text.contains("period_summary"));
        assert!(text.contains("batch 3"));
    }
}
