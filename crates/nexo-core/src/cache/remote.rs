//! Redis-backed [`SharedCache`].
//!
//! Every process pointed at the same server sees the same entries, so an
//! invalidation in one process reaches the others. Values are stored as
//! JSON text. Backend failures are logged and treated as misses; the
//! connection is reopened on the next call.

use std::time::Duration;

use parking_lot::Mutex;
use redis::{Commands, Connection, RedisResult};

use super::SharedCache;

/// How long opening a connection may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Keys removed by [`SharedCache::clear`].
const KEY_NAMESPACE: &str = "nexo:";

pub struct RedisCache {
    client: redis::Client,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("server", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to `url` and check the server answers.
    pub fn connect(url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        redis::cmd("PING").query::<String>(&mut conn)?;
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` on the connection, reopening it if needed. A failed call
    /// drops the connection.
    fn with_conn<T>(&self, op: &'static str, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Option<T> {
        let mut slot = self.conn.lock();
        if slot.is_none() {
            match self.client.get_connection_with_timeout(CONNECT_TIMEOUT) {
                Ok(conn) => *slot = Some(conn),
                Err(err) => {
                    tracing::warn!(op, error = %err, "shared cache reconnect failed");
                    return None;
                }
            }
        }
        let conn = slot.as_mut()?;
        match f(conn) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(op, error = %err, "shared cache command failed");
                *slot = None;
                None
            }
        }
    }
}

impl SharedCache for RedisCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.with_conn("get", |conn| conn.get::<_, Option<String>>(key))??;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding undecodable shared cache entry");
                self.delete(key);
                None
            }
        }
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let text = value.to_string();
        self.with_conn("set", |conn| match ttl {
            // Redis expiries are whole seconds of at least one.
            Some(ttl) => conn.set_ex::<_, _, ()>(key, text, ttl.as_secs().max(1) as _),
            None => conn.set::<_, _, ()>(key, text),
        });
    }

    fn delete(&self, key: &str) {
        self.with_conn("del", |conn| conn.del::<_, ()>(key));
    }

    fn incr(&self, key: &str) -> Option<i64> {
        self.with_conn("incr", |conn| conn.incr(key, 1i64))
    }

    fn delete_prefix(&self, prefix: &str) {
        let pattern = format!("{}*", escape_glob(prefix));
        self.with_conn("delete_prefix", |conn| {
            let keys: Vec<String> = conn.scan_match::<_, String>(pattern)?.collect();
            if keys.is_empty() {
                return Ok(());
            }
            conn.del::<_, ()>(keys)
        });
    }

    fn clear(&self) {
        self.delete_prefix(KEY_NAMESPACE);
    }
}

/// Escape the glob metacharacters of a `SCAN MATCH` pattern.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("nexo:groups:"), "nexo:groups:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn test_connect_to_closed_port_fails() {
        assert!(RedisCache::connect("redis://127.0.0.1:1/0").is_err());
    }
}
