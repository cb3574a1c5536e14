//! SQLite storage: the connection pool and the per-unit-of-work cursor.

pub mod cursor;
pub mod pool;

pub use cursor::{Cursor, StatementStats};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
