//! Operational store: connection bootstrap and the two repositories the
//! pipeline writes through.

pub mod connection;
pub mod performance_repository;
pub mod sync_log_repository;

pub use connection::StoreConnection;
pub use performance_repository::{BatchStats, PerformanceRepository};
pub use sync_log_repository::SyncLogRepository;
