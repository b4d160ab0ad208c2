//! Warehouse query clients.
//!
//! The pipeline only ever talks to the warehouse through the
//! `WarehouseClient` trait; the production implementation posts SQL to the
//! warehouse query endpoint over HTTP and decodes JSON rows.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::{SourceRow, SyncError};
use crate::infrastructure::config::WarehouseConfig;

/// A client able to execute aggregation SQL against the analytical
/// warehouse. Implementations must be reusable across queries so they can
/// be pooled.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Execute an aggregation statement and decode its result rows.
    async fn execute_query(&self, sql: &str) -> Result<Vec<SourceRow>, SyncError>;

    /// Execute a boundary probe returning the latest available period end.
    async fn latest_boundary(&self, sql: &str) -> Result<Option<NaiveDate>, SyncError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<SourceRow>,
}

#[derive(Debug, Deserialize)]
struct BoundaryRow {
    boundary: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct BoundaryResponse {
    #[serde(default)]
    rows: Vec<BoundaryRow>,
}

/// HTTP client posting statements to the warehouse query endpoint.
#[derive(Clone)]
pub struct HttpWarehouseClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpWarehouseClient {
    pub fn new(config: &WarehouseConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .gzip(true)
            .build()
            .map_err(|e| SyncError::Connection(format!("failed to build warehouse client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn post_query(&self, sql: &str) -> Result<reqwest::Response, SyncError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": sql }))
            .send()
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::Connection(format!(
                "warehouse returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouseClient {
    async fn execute_query(&self, sql: &str) -> Result<Vec<SourceRow>, SyncError> {
        debug!(statement_bytes = sql.len(), "executing warehouse aggregation query");
        let response = self.post_query(sql).await?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        debug!(rows = body.rows.len(), "warehouse query returned");
        Ok(body.rows)
    }

    async fn latest_boundary(&self, sql: &str) -> Result<Option<NaiveDate>, SyncError> {
        let response = self.post_query(sql).await?;
        let body: BoundaryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        Ok(body.rows.into_iter().next().and_then(|row| row.boundary))
    }
}
