//! Runtime configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nexo_lang::Limits;

use crate::error::{Error, Result};
use crate::sql::Dialect;

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "./nexo.db";

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default time to wait for a free connection (30 seconds).
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default SQLite busy timeout (5 seconds).
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default shared cache backend.
pub const DEFAULT_CACHE_URL: &str = "memory://";

/// Default time-to-live of shared ACL decisions (5 minutes).
pub const DEFAULT_ACL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default bound on recompute drain passes.
pub const DEFAULT_RECOMPUTE_MAX_ITERATIONS: usize = 64;

/// Default number of ids per row-rule `COUNT(*)` check.
pub const DEFAULT_RULE_CHUNK_SIZE: usize = 1000;

/// Default text search language profile.
pub const DEFAULT_TEXT_SEARCH_LANGUAGE: &str = "english";

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// Maximum number of open connections.
    pub pool_size: usize,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,
    /// How long SQLite waits on a locked database.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// Settings for the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

/// Configuration of a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database: DatabaseConfig,

    /// Address of the shared key/value cache backend.
    pub cache_url: String,

    /// Time-to-live of shared ACL decisions.
    pub acl_cache_ttl: Duration,

    /// Drain passes allowed before a recompute is declared divergent.
    pub recompute_max_iterations: usize,

    /// Budget for evaluating one row-rule expression.
    pub sandbox: Limits,

    /// Ids per row-rule verification statement.
    pub rule_chunk_size: usize,

    /// Predicate rendering dialect and text search profile.
    pub dialect: Dialect,
}

impl RuntimeConfig {
    /// Create a configuration for the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig::new(path),
            cache_url: DEFAULT_CACHE_URL.to_string(),
            acl_cache_ttl: DEFAULT_ACL_CACHE_TTL,
            recompute_max_iterations: DEFAULT_RECOMPUTE_MAX_ITERATIONS,
            sandbox: Limits::default(),
            rule_chunk_size: DEFAULT_RULE_CHUNK_SIZE,
            dialect: Dialect::default(),
        }
    }

    /// Read the configuration from `NEXO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new(lookup("NEXO_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()));

        if let Some(size) = parse_var::<usize>(&lookup, "NEXO_DB_POOL_SIZE")? {
            config = config.with_pool_size(size);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "NEXO_DB_ACQUIRE_TIMEOUT_MS")? {
            config.database.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "NEXO_DB_BUSY_TIMEOUT_MS")? {
            config.database.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = lookup("NEXO_CACHE_URL") {
            config.cache_url = url;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "NEXO_ACL_CACHE_TTL_SECS")? {
            config.acl_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "NEXO_RECOMPUTE_MAX_ITERATIONS")? {
            config = config.with_recompute_max_iterations(n);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "NEXO_SANDBOX_TIMEOUT_MS")? {
            config.sandbox = config.sandbox.with_timeout(Duration::from_millis(ms));
        }
        if let Some(steps) = parse_var::<u64>(&lookup, "NEXO_SANDBOX_MAX_STEPS")? {
            config.sandbox = config.sandbox.with_max_steps(steps);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "NEXO_RULE_CHUNK_SIZE")? {
            config = config.with_rule_chunk_size(n);
        }
        if let Some(language) = lookup("NEXO_TEXT_SEARCH_LANGUAGE") {
            config.dialect = config.dialect.with_language(language);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the database file.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database.path = path.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.database.pool_size = size;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.database.acquire_timeout = timeout;
        self
    }

    /// Set the shared cache backend address.
    pub fn with_cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_url = url.into();
        self
    }

    /// Set the ACL decision time-to-live.
    pub fn with_acl_cache_ttl(mut self, ttl: Duration) -> Self {
        self.acl_cache_ttl = ttl;
        self
    }

    /// Set the recompute iteration bound.
    pub fn with_recompute_max_iterations(mut self, iterations: usize) -> Self {
        self.recompute_max_iterations = iterations;
        self
    }

    /// Set the sandbox limits.
    pub fn with_sandbox_limits(mut self, limits: Limits) -> Self {
        self.sandbox = limits;
        self
    }

    /// Set the row-rule chunk size.
    pub fn with_rule_chunk_size(mut self, size: usize) -> Self {
        self.rule_chunk_size = size;
        self
    }

    /// Set the rendering dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".into()));
        }
        if self.recompute_max_iterations == 0 {
            return Err(Error::Config("recompute iteration bound must be at least 1".into()));
        }
        if self.rule_chunk_size == 0 {
            return Err(Error::Config("rule chunk size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}: cannot parse '{raw}'"))),
    }
}
