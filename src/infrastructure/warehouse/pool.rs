//! Bounded warehouse client pool.
//!
//! Purely a resource-lifetime abstraction: `acquire` waits for capacity,
//! the returned guard exposes one client, and dropping the guard returns
//! the client on every path, including early error returns. No query logic
//! lives here.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;

use crate::domain::SyncError;

use super::client::WarehouseClient;

type ClientFactory = dyn Fn() -> Box<dyn WarehouseClient> + Send + Sync;

pub struct WarehousePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    semaphore: Semaphore,
    idle: Mutex<Vec<Box<dyn WarehouseClient>>>,
    factory: Box<ClientFactory>,
    closed: AtomicBool,
}

impl WarehousePool {
    /// Pool of at most `max_size` concurrently checked-out clients.
    /// Clients are built lazily through `factory` on first demand and
    /// recycled afterwards.
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Box<dyn WarehouseClient> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(max_size.max(1)),
                idle: Mutex::new(Vec::new()),
                factory: Box::new(factory),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Wait until a client is available or capacity allows creating one.
    pub async fn acquire(&self) -> Result<PooledClient, SyncError> {
        let permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Connection("warehouse pool is closed".into()))?;
        // The permit is restored manually when the guard drops.
        permit.forget();

        let recycled = match self.inner.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        let client = recycled.unwrap_or_else(|| (self.inner.factory)());
        Ok(PooledClient {
            client: Some(client),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Drain idle clients and reject further acquisition.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.clear();
        }
    }

    /// Permits currently available, for diagnostics.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

/// RAII guard over one checked-out warehouse client.
pub struct PooledClient {
    client: Option<Box<dyn WarehouseClient>>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("checked_out", &self.client.is_some())
            .finish()
    }
}

impl Deref for PooledClient {
    type Target = dyn WarehouseClient;

    fn deref(&self) -> &Self::Target {
        self.client
            .as_deref()
            .expect("pooled client accessed after drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !self.pool.closed.load(Ordering::SeqCst) {
                if let Ok(mut idle) = self.pool.idle.lock() {
                    idle.push(client);
                }
            }
        }
        self.pool.semaphore.add_permits(1);
    }
}
