//! The unit of work.
//!
//! An [`Environment`] owns one connection and its open transaction, the
//! acting user, the record cache, the recompute queue and the pending-write
//! buffer. It is used by one caller at a time and ends with
//! [`commit`](Environment::commit) or [`rollback`](Environment::rollback);
//! dropping it rolls back.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use nexo_proto::Value;

use super::recordset::RecordSet;
use super::runtime::Runtime;
use crate::cache::RecordCache;
use crate::catalog::{ModelDef, Registry};
use crate::compute::{PendingWrites, RecomputeQueue};
use crate::error::{Error, Result};
use crate::security::{Actor, AccessOperation, GROUPS_CACHE_PREFIX, SECURITY_GENERATION_KEY, SECURITY_MODELS};
use crate::sql::Predicate;
use crate::storage::{Cursor, StatementStats};

/// Transaction-scoped execution context.
pub struct Environment {
    pub(crate) runtime: Runtime,
    pub(crate) registry: Arc<Registry>,
    pub(crate) cursor: Cursor,
    pub(crate) actor: Actor,
    pub(crate) cache: RecordCache,
    /// Ids seen by this unit of work, per model, fetched together on a miss.
    pub(crate) prefetch: HashMap<String, BTreeSet<i64>>,
    pub(crate) acl_local: HashMap<(String, AccessOperation), bool>,
    pub(crate) rule_local: HashMap<(String, AccessOperation), Predicate>,
    pub(crate) recompute: RecomputeQueue,
    pub(crate) pending: PendingWrites,
    /// A security model was modified; shared caches are invalidated again
    /// after commit.
    pub(crate) security_dirty: bool,
    /// Permission cache generation when the unit of work began; decisions
    /// taken under an older one are not shared.
    pub(crate) acl_generation: u64,
    finished: bool,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("uid", &self.actor.uid)
            .field("superuser", &self.actor.is_superuser())
            .field("cached", &self.cache.len())
            .field("recompute", &self.recompute.state())
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub(crate) fn new(runtime: Runtime, cursor: Cursor, actor: Actor) -> Self {
        let registry = runtime.registry().clone();
        let acl_generation = runtime.permissions().generation();
        Self {
            runtime,
            registry,
            cursor,
            actor,
            cache: RecordCache::new(),
            prefetch: HashMap::new(),
            acl_local: HashMap::new(),
            rule_local: HashMap::new(),
            recompute: RecomputeQueue::new(),
            pending: PendingWrites::new(),
            security_dirty: false,
            acl_generation,
            finished: false,
        }
    }

    /// Recompute, flush and commit.
    pub fn commit(mut self) -> Result<()> {
        self.recompute()?;
        self.flush()?;
        self.cursor.commit()?;
        self.finished = true;
        if self.security_dirty {
            self.invalidate_security_caches();
        }
        tracing::debug!(uid = self.actor.uid, stats = ?self.cursor.stats(), "unit of work committed");
        Ok(())
    }

    /// Discard every change of this unit of work.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.cursor.rollback()
    }

    /// Run `f` inside a savepoint. On error the savepoint is rolled back,
    /// the caches of this unit of work are cleared and the error returned;
    /// the outer transaction stays usable.
    pub fn savepoint<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.flush()?;
        let name = self.cursor.savepoint()?;
        match f(self) {
            Ok(value) => {
                self.cursor.release(&name)?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(savepoint = %name, error = %err, "rolling back savepoint");
                self.cursor.rollback_to(&name)?;
                self.clear_caches();
                Err(err)
            }
        }
    }

    /// Run `f` as superuser, keeping the identity and context.
    pub fn sudo<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let elevated = self.actor.elevated();
        let previous = std::mem::replace(&mut self.actor, elevated);
        let result = f(self);
        self.actor = previous;
        result
    }

    /// A record set of existing ids, without any access check.
    pub fn browse(&mut self, model: &str, ids: impl Into<Vec<i64>>) -> Result<RecordSet> {
        self.registry.model(model)?;
        let records = RecordSet::new(model, ids);
        self.add_prefetch(model, records.ids());
        Ok(records)
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn uid(&self) -> i64 {
        self.actor.uid
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Model definition by name.
    pub fn model(&self, name: &str) -> Result<Arc<ModelDef>> {
        self.registry.model(name).cloned()
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn cursor(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    /// Statements executed so far.
    pub fn stats(&self) -> StatementStats {
        self.cursor.stats()
    }

    /// Cached value of `(model, id, field)`, or an error naming the miss.
    pub fn cached(&self, model: &str, id: i64, field: &str) -> Result<Value> {
        self.cache
            .get(model, id, field)
            .cloned()
            .map_err(|miss| Error::Internal(miss.to_string()))
    }

    pub(crate) fn add_prefetch(&mut self, model: &str, ids: &[i64]) {
        self.prefetch
            .entry(model.to_string())
            .or_default()
            .extend(ids.iter().copied());
    }

    pub(crate) fn forget_prefetch(&mut self, model: &str, ids: &[i64]) {
        if let Some(known) = self.prefetch.get_mut(model) {
            for id in ids {
                known.remove(id);
            }
        }
    }

    pub(crate) fn clear_caches(&mut self) {
        self.cache.clear();
        self.recompute.clear();
        self.pending.clear();
        self.acl_local.clear();
        self.rule_local.clear();
    }

    /// Invalidate ACL decisions, rule predicates and group sets after a
    /// security model changed.
    pub(crate) fn touch_security_model(&mut self, model: &str) {
        if !SECURITY_MODELS.contains(&model) {
            return;
        }
        self.security_dirty = true;
        self.acl_local.clear();
        self.rule_local.clear();
        self.invalidate_security_caches();
    }

    fn invalidate_security_caches(&self) {
        let kv = self.runtime.kv();
        let permissions = self.runtime.permissions();
        match kv.incr(SECURITY_GENERATION_KEY) {
            Some(generation) => permissions.observe_shared(u64::try_from(generation).unwrap_or_default()),
            None => tracing::warn!(
                "security generation not bumped; other processes keep cached decisions until they expire"
            ),
        }
        permissions.invalidate_all();
        kv.delete_prefix(GROUPS_CACHE_PREFIX);
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.cursor.rollback() {
            tracing::warn!(error = %err, "rollback of abandoned unit of work failed");
        }
    }
}
