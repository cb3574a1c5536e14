//! The runtime: registry, pool and shared caches of one database.

use std::collections::BTreeMap;
use std::sync::Arc;

use nexo_proto::Value;

use super::environment::Environment;
use crate::cache::{open_shared_cache, SharedCache};
use crate::catalog::Registry;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::schema::{SchemaReport, SchemaSync};
use crate::security::{security_generation, Actor, AuditLogger, PermissionCache, TracingAuditLogger, SUPERUSER_ID};
use crate::storage::{ConnectionPool, Cursor, PoolStats};

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Arc<Registry>,
    pool: ConnectionPool,
    permissions: PermissionCache,
    kv: Arc<dyn SharedCache>,
    audit: Arc<dyn AuditLogger>,
}

/// Shared state of every unit of work against one database.
///
/// Cheap to clone. Units of work are opened with [`begin`](Self::begin)
/// or [`run`](Self::run); each holds its own connection and transaction.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("db", &self.inner.config.database.path)
            .field("models", &self.inner.registry.models().count())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registry: Arc<Registry>,
    kv: Option<Arc<dyn SharedCache>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig, registry: Registry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            kv: None,
            audit: None,
        }
    }

    /// Replace the default tracing audit logger.
    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Use this shared cache instead of the one named by the config.
    pub fn with_shared_cache(mut self, kv: Arc<dyn SharedCache>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Open the connection pool without touching the schema.
    pub fn open(self) -> Result<Runtime> {
        self.config.validate()?;
        let pool = ConnectionPool::open(&self.config.database)?;
        let kv = self
            .kv
            .unwrap_or_else(|| open_shared_cache(&self.config.cache_url));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditLogger) as Arc<dyn AuditLogger>);
        let permissions = PermissionCache::new(self.config.acl_cache_ttl);

        tracing::info!(
            db = %self.config.database.path.display(),
            models = self.registry.models().count(),
            "runtime opened"
        );
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                config: self.config,
                registry: self.registry,
                pool,
                permissions,
                kv,
                audit,
            }),
        })
    }

    /// Open the runtime and synchronize the schema.
    pub fn bootstrap(self) -> Result<Runtime> {
        let runtime = self.open()?;
        runtime.sync_schema()?;
        Ok(runtime)
    }
}

impl Runtime {
    pub fn builder(config: RuntimeConfig, registry: Registry) -> RuntimeBuilder {
        RuntimeBuilder::new(config, registry)
    }

    /// Open a unit of work acting as `uid`.
    pub fn begin(&self, uid: i64) -> Result<Environment> {
        self.begin_with_context(uid, BTreeMap::new())
    }

    /// Open a unit of work acting as `uid` with a context map.
    ///
    /// The unit of work holds the database write lock until it ends; other
    /// writers wait for it up to the busy timeout.
    pub fn begin_with_context(&self, uid: i64, context: BTreeMap<String, Value>) -> Result<Environment> {
        self.open_unit(uid, context, false)
    }

    /// Open a unit of work that only reads, acting as `uid`.
    ///
    /// It runs alongside writers and sees the database as of its first
    /// query. Creates, writes and unlinks fail with a validation error.
    pub fn begin_read_only(&self, uid: i64) -> Result<Environment> {
        self.open_unit(uid, BTreeMap::new(), true)
    }

    fn open_unit(&self, uid: i64, context: BTreeMap<String, Value>, read_only: bool) -> Result<Environment> {
        // Read before BEGIN: a change committed later bumps the generation
        // and the decisions taken in this unit are never cached under it.
        let security = security_generation(self.inner.kv.as_ref());
        self.inner.permissions.observe_shared(security);
        let acl_generation = self.inner.permissions.generation();

        let mut cursor = Cursor::new(self.inner.pool.acquire()?);
        if read_only {
            cursor.begin_read_only()?;
        } else {
            cursor.begin()?;
        }
        let actor = Actor::load(
            &mut cursor,
            self.inner.kv.as_ref(),
            uid,
            context,
            security,
            self.inner.config.acl_cache_ttl,
        )?;
        let mut env = Environment::new(self.clone(), cursor, actor);
        env.acl_generation = acl_generation;
        Ok(env)
    }

    /// Run `f` in a fresh unit of work; commit on success, roll back on
    /// error.
    pub fn run<T>(&self, uid: i64, f: impl FnOnce(&mut Environment) -> Result<T>) -> Result<T> {
        let mut env = self.begin(uid)?;
        match f(&mut env) {
            Ok(value) => {
                env.commit()?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(uid, error = %err, "unit of work failed, rolling back");
                env.rollback()?;
                Err(err)
            }
        }
    }

    /// Create missing tables, pivot tables and columns, then synchronize
    /// the metadata models and seed the superuser.
    pub fn sync_schema(&self) -> Result<SchemaReport> {
        let mut cursor = Cursor::new(self.inner.pool.acquire()?);
        cursor.begin()?;
        let mut report = SchemaSync::new(&self.inner.registry).apply(&mut cursor)?;

        let mut env = Environment::new(self.clone(), cursor, Actor::superuser());
        report.synced_models = crate::schema::sync_metadata(&mut env)?;
        env.commit()?;

        self.inner.permissions.invalidate_all();
        tracing::info!(
            tables = report.created_tables.len(),
            columns = report.added_columns.len(),
            superuser = SUPERUSER_ID,
            "schema synchronized"
        );
        Ok(report)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn permissions(&self) -> &PermissionCache {
        &self.inner.permissions
    }

    /// General-purpose shared key/value cache.
    pub fn kv(&self) -> &Arc<dyn SharedCache> {
        &self.inner.kv
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.inner.audit
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }
}
