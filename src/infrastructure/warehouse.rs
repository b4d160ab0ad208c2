//! Warehouse access: query clients, the bounded connection pool, the
//! aggregation query builder, and ASIN filter strategies.

pub mod asin_filter;
pub mod client;
pub mod pool;
pub mod query_builder;

pub use asin_filter::AsinFilterStrategy;
pub use client::{HttpWarehouseClient, WarehouseClient};
pub use pool::{PooledClient, WarehousePool};
pub use query_builder::AggregationQueryBuilder;
