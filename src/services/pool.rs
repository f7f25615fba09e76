//! Pooled SQLite connections backed by `deadpool-sqlite`.
//!
//! Every new connection gets the busy timeout and WAL pragmas in a
//! post-create hook. Work runs through [`ConnectionPool::interact`], which
//! borrows a connection for one blocking closure only.

use crate::config::StoreConfig;
use crate::error::StoreError;
use deadpool_sqlite::{Hook, HookError, Pool, Runtime};
use rusqlite::Connection;
use std::time::Duration;
use tracing::debug;

pub struct ConnectionPool {
    pool: Pool,
}

impl ConnectionPool {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let busy_timeout = config.busy_timeout;
        let pool = deadpool_sqlite::Config::new(&config.path)
            .builder(Runtime::Tokio1)
            .map_err(|e| StoreError::Pool(e.to_string()))?
            .max_size(config.pool_size.max(1))
            .post_create(Hook::async_fn(move |conn, _| {
                Box::pin(async move {
                    conn.interact(move |conn| configure(conn, busy_timeout))
                        .await
                        .map_err(|e| HookError::Message(e.to_string().into()))?
                        .map_err(HookError::Backend)
                })
            }))
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Maximum number of open connections.
    pub fn size(&self) -> usize {
        self.pool.status().max_size
    }

    /// Run `f` on a pooled connection in the blocking thread pool.
    ///
    /// Waits while every connection is lent out. A panic inside `f` is
    /// reported as `StoreError::Task`.
    pub async fn interact<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await?;
        conn.interact(f).await?
    }

    /// Stop lending connections. Later `interact` calls fail with `PoolClosed`.
    pub fn close(&self) {
        self.pool.close();
    }
}

fn configure(conn: &mut Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    debug!("Opened SQLite connection");
    Ok(())
}
