//! Bounded SQLite connection pool.
//!
//! A unit of work holds one [`PooledConnection`] for its whole lifetime.
//! Dropping the handle returns the connection; if a transaction is still
//! open at that point it is rolled back first.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open (idle or checked out).
    pub open: usize,
    /// Connections waiting in the pool.
    pub idle: usize,
    pub max: usize,
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

struct PoolInner {
    config: DatabaseConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }

    fn discard(&self) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

/// A pool of SQLite connections to one database file.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.config.path)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Open the pool, verifying the database with a first connection.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".into()));
        }
        let first = open_connection(config)?;
        tracing::info!(
            path = %config.path.display(),
            max = config.pool_size,
            "connection pool opened"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config: config.clone(),
                state: Mutex::new(PoolState {
                    idle: vec![first],
                    open: 1,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Check out a connection, waiting up to the acquire timeout.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;
        let mut state = self.inner.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: self.inner.clone(),
                });
            }

            if state.open < self.inner.config.pool_size {
                state.open += 1;
                drop(state);
                return match open_connection(&self.inner.config) {
                    Ok(conn) => Ok(PooledConnection {
                        conn: Some(conn),
                        pool: self.inner.clone(),
                    }),
                    Err(err) => {
                        self.inner.discard();
                        Err(err)
                    }
                };
            }

            if self.inner.available.wait_until(&mut state, deadline).timed_out() {
                tracing::warn!(
                    max = self.inner.config.pool_size,
                    "timed out waiting for a pooled connection"
                );
                return Err(Error::Pool(format!(
                    "no connection available within {:?}",
                    self.inner.config.acquire_timeout
                )));
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            max: self.inner.config.pool_size,
        }
    }
}

/// A checked-out connection, returned to its pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection used after release"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            tracing::debug!("rolling back transaction left open on a returned connection");
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %err, "rollback failed; closing connection");
                drop(conn);
                self.pool.discard();
                return;
            }
        }
        self.pool.release(conn);
    }
}

fn open_connection(config: &DatabaseConfig) -> Result<Connection> {
    let conn = Connection::open_with_flags(&config.path, OpenFlags::default())?;
    conn.busy_timeout(config.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "case_sensitive_like", "ON")?;
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::trace!(journal_mode = %mode, "connection opened");
    Ok(conn)
}
