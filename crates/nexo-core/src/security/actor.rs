//! The acting user of a unit of work.

use std::collections::BTreeMap;
use std::time::Duration;

use nexo_lang::{SandboxValue, Scope};
use nexo_proto::Value;
use serde::{Deserialize, Serialize};

use crate::cache::SharedCache;
use crate::error::{Error, Result};
use crate::storage::Cursor;

/// Id of the built-in administrator. Bypasses ACLs and row rules.
pub const SUPERUSER_ID: i64 = 1;

/// Key prefix of cached transitive group sets in the shared cache.
pub const GROUPS_CACHE_PREFIX: &str = "nexo:groups:";

/// Shared-cache counter bumped after every change to a security model.
pub const SECURITY_GENERATION_KEY: &str = "nexo:security:generation";

/// Current security generation; zero before the first change.
pub fn security_generation(kv: &dyn SharedCache) -> u64 {
    kv.get(SECURITY_GENERATION_KEY)
        .and_then(|value| value.as_u64())
        .unwrap_or_default()
}

/// A cached group set and the security generation it was computed under.
#[derive(Debug, Serialize, Deserialize)]
struct CachedGroups {
    generation: u64,
    groups: Vec<i64>,
}

const TRANSITIVE_GROUPS_SQL: &str = "\
WITH RECURSIVE user_groups(id) AS (
    SELECT \"res_groups_id\" FROM \"res_groups_res_users_rel\" WHERE \"res_users_id\" = $1
    UNION
    SELECT r.\"hid\" FROM \"res_groups_implied_rel\" r JOIN user_groups g ON r.\"gid\" = g.id
)
SELECT id FROM user_groups ORDER BY id";

/// Identity, groups and context of a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub uid: i64,
    /// Transitive group ids, sorted.
    pub group_ids: Vec<i64>,
    pub company_id: Option<i64>,
    /// Allowed companies, sorted; includes `company_id`.
    pub company_ids: Vec<i64>,
    /// Caller-supplied context map.
    pub context: BTreeMap<String, Value>,
    superuser: bool,
}

impl Actor {
    /// The superuser, without consulting storage. Used during bootstrap.
    pub fn superuser() -> Self {
        Self {
            uid: SUPERUSER_ID,
            group_ids: Vec::new(),
            company_id: Some(1),
            company_ids: vec![1],
            context: BTreeMap::new(),
            superuser: true,
        }
    }

    /// Load a user, its companies and transitive groups.
    ///
    /// `generation` is the security generation read before the transaction
    /// started; cached group sets from another generation are not used.
    /// New entries expire after `ttl`.
    pub fn load(
        cursor: &mut Cursor,
        kv: &dyn SharedCache,
        uid: i64,
        context: BTreeMap<String, Value>,
        generation: u64,
        ttl: Duration,
    ) -> Result<Self> {
        let rows = cursor.query(
            "SELECT \"company_id\" FROM \"res_users\" WHERE \"id\" = $1",
            &[Value::Int(uid)],
        )?;
        let row = rows.first().ok_or(Error::UnknownUser(uid))?;
        let company_id = row.first().and_then(Value::as_i64);

        let mut company_ids = cursor.query_ids(
            "SELECT \"cid\" FROM \"res_company_users_rel\" WHERE \"user_id\" = $1",
            &[Value::Int(uid)],
        )?;
        company_ids.extend(company_id);
        company_ids.sort_unstable();
        company_ids.dedup();

        let group_ids = transitive_groups(cursor, kv, uid, generation, ttl)?;

        tracing::debug!(uid, groups = group_ids.len(), "actor loaded");
        Ok(Self {
            uid,
            group_ids,
            company_id,
            company_ids,
            context,
            superuser: uid == SUPERUSER_ID,
        })
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    /// A copy acting as superuser with the same identity and context.
    pub fn elevated(&self) -> Self {
        Self {
            superuser: true,
            ..self.clone()
        }
    }

    pub fn in_group(&self, group_id: i64) -> bool {
        self.group_ids.binary_search(&group_id).is_ok()
    }

    /// Names visible to row-rule expressions: `user`, `uid`, `company`,
    /// `company_id`, `company_ids` and `context`.
    pub fn sandbox_scope(&self) -> Scope {
        let company_id = self
            .company_id
            .map(SandboxValue::Int)
            .unwrap_or(SandboxValue::None);
        let user = SandboxValue::record([
            ("id", SandboxValue::Int(self.uid)),
            ("company_id", company_id.clone()),
            ("company_ids", SandboxValue::from(self.company_ids.clone())),
            ("groups_id", SandboxValue::from(self.group_ids.clone())),
        ]);
        let company = SandboxValue::record([("id", company_id.clone())]);
        let context = SandboxValue::Record(
            self.context
                .iter()
                .map(|(k, v)| (k.clone(), to_sandbox(v)))
                .collect(),
        );

        Scope::new()
            .with("user", user)
            .with("uid", SandboxValue::Int(self.uid))
            .with("company", company)
            .with("company_id", company_id)
            .with("company_ids", SandboxValue::from(self.company_ids.clone()))
            .with("context", context)
    }
}

/// Transitive groups of `uid`, through the shared cache.
fn transitive_groups(
    cursor: &mut Cursor,
    kv: &dyn SharedCache,
    uid: i64,
    generation: u64,
    ttl: Duration,
) -> Result<Vec<i64>> {
    let key = format!("{GROUPS_CACHE_PREFIX}{uid}");
    let mut newer_cached = false;
    if let Some(cached) = kv.get(&key) {
        match serde_json::from_value::<CachedGroups>(cached) {
            Ok(entry) if entry.generation == generation => return Ok(entry.groups),
            Ok(entry) => newer_cached = entry.generation > generation,
            Err(_) => kv.delete(&key),
        }
    }

    let groups = cursor.query_ids(TRANSITIVE_GROUPS_SQL, &[Value::Int(uid)])?;
    if !newer_cached {
        let entry = CachedGroups { generation, groups };
        match serde_json::to_value(&entry) {
            Ok(value) => kv.set(&key, value, Some(ttl)),
            Err(err) => tracing::warn!(uid, error = %err, "group set not cached"),
        }
        return Ok(entry.groups);
    }
    Ok(groups)
}

fn to_sandbox(value: &Value) -> SandboxValue {
    match value {
        Value::Null => SandboxValue::None,
        Value::Bool(b) => SandboxValue::Bool(*b),
        Value::Int(i) | Value::Ref(i, _) => SandboxValue::Int(*i),
        Value::Float(f) => SandboxValue::Float(*f),
        Value::Ids(ids) => SandboxValue::from(ids.clone()),
        Value::List(items) => SandboxValue::List(items.iter().map(to_sandbox).collect()),
        other => SandboxValue::Str(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexo_lang::{eval, Limits};

    #[test]
    fn test_scope_exposes_identity() {
        let mut actor = Actor::superuser();
        actor.uid = 7;
        actor.company_ids = vec![1, 2];
        actor.group_ids = vec![3, 9];
        actor.context.insert("lang".into(), Value::from("fr_FR"));
        let scope = actor.sandbox_scope();
        let limits = Limits::default();

        assert_eq!(eval("user.id", &scope, &limits).unwrap(), SandboxValue::Int(7));
        assert_eq!(eval("company_id", &scope, &limits).unwrap(), SandboxValue::Int(1));
        assert_eq!(eval("len(company_ids)", &scope, &limits).unwrap(), SandboxValue::Int(2));
        assert_eq!(
            eval("context.lang", &scope, &limits).unwrap(),
            SandboxValue::Str("fr_FR".into())
        );
        assert!(actor.in_group(9));
        assert!(!actor.in_group(4));
    }
}
