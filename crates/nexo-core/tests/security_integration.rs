//! Integration tests for model access rows, row rules and the audit trail.

mod common;

use common::{all, sale_module, TestContext};
use nexo_core::cache::SharedCache;
use nexo_core::security::{security_generation, AuditEventType, GROUPS_CACHE_PREFIX};
use nexo_core::{AccessOperation, Error, ErrorKind, SearchOptions};
use nexo_proto::{Domain, Operator, Value, Values};
use pretty_assertions::assert_eq;

const ALL: [bool; 4] = [true, true, true, true];
const READ_ONLY: [bool; 4] = [true, false, false, false];

struct Fixture {
    ctx: TestContext,
    sales: i64,
    /// Company 1, in the sales group.
    salesman: i64,
    /// Company 1, no group.
    viewer: i64,
    draft: i64,
    cancelled: i64,
    foreign: i64,
}

/// Orders in two companies, a company rule for everyone and a
/// "no cancelled orders" rule for the sales group.
fn fixture() -> Fixture {
    let ctx = TestContext::new();
    let other_company = ctx.setup(|env| {
        env.create("res.company", Values::new().set("name", "Other"))?.ensure_one()
    });
    let sales = ctx.create_group("Sales", &[]);
    let salesman = ctx.create_user("salesman", 1, &[sales]);
    let viewer = ctx.create_user("viewer", 1, &[]);

    ctx.grant("sale.order", Some(sales), ALL);
    ctx.grant("sale.line", Some(sales), ALL);
    ctx.grant("sale.order", None, READ_ONLY);

    let (draft, cancelled, foreign) = ctx.setup(|env| {
        let draft = env.create("sale.order", Values::new().set("name", "SO-DRAFT"))?;
        let cancelled = env.create(
            "sale.order",
            Values::new().set("name", "SO-CANCEL").set("state", "cancel"),
        )?;
        let foreign = env.create(
            "sale.order",
            Values::new().set("name", "SO-FOREIGN").set("company_id", other_company),
        )?;
        Ok((draft.ensure_one()?, cancelled.ensure_one()?, foreign.ensure_one()?))
    });

    ctx.add_rule("sale.order", &[], "[('company_id', 'in', company_ids)]");
    ctx.add_rule("sale.order", &[sales], "[('state', '!=', 'cancel')]");

    Fixture {
        ctx,
        sales,
        salesman,
        viewer,
        draft,
        cancelled,
        foreign,
    }
}

#[test]
fn test_user_without_access_rows_is_denied() {
    let ctx = TestContext::new();
    let uid = ctx.create_user("nobody", 1, &[]);
    let mut env = ctx.as_user(uid);

    let err = all(&mut env, "sale.order").unwrap_err();
    assert!(
        matches!(err, Error::AccessDenied { ref model, operation: AccessOperation::Read } if model == "sale.order"),
        "{err}"
    );
    assert!(err.is_authorization());

    let denied = ctx
        .audit
        .events()
        .into_iter()
        .filter(|e| e.uid == uid)
        .map(|e| e.event_type)
        .collect::<Vec<_>>();
    assert_eq!(
        denied,
        vec![AuditEventType::AccessDenied {
            model: "sale.order".into(),
            operation: AccessOperation::Read,
        }]
    );
}

#[test]
fn test_read_only_access() {
    let f = fixture();
    let mut env = f.ctx.as_user(f.viewer);
    let order = env.browse("sale.order", vec![f.draft]).unwrap();

    assert_eq!(
        env.read(&order, Some(&["name"])).unwrap()[0]["name"],
        Value::from("SO-DRAFT")
    );
    let err = env.write(&order, Values::new().set("name", "changed")).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { operation: AccessOperation::Write, .. }), "{err}");
    let err = env.create("sale.order", Values::new().set("name", "new")).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { operation: AccessOperation::Create, .. }), "{err}");
    let err = env.unlink(&order).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { operation: AccessOperation::Unlink, .. }), "{err}");
}

#[test]
fn test_rules_filter_search_results() {
    let f = fixture();

    // Company rule only: the cancelled order stays visible.
    let mut env = f.ctx.as_user(f.viewer);
    assert_eq!(all(&mut env, "sale.order").unwrap().ids(), [f.draft, f.cancelled]);
    drop(env);

    // Company rule AND the sales group rule.
    let mut env = f.ctx.as_user(f.salesman);
    assert!(env.actor().in_group(f.sales));
    assert_eq!(all(&mut env, "sale.order").unwrap().ids(), [f.draft]);
    assert_eq!(env.search_count("sale.order", &Domain::new()).unwrap(), 1);

    let named = Domain::new().leaf("name", Operator::ILike, "so-");
    let rows = env
        .search_read("sale.order", &named, Some(&["name", "company_id"]), &SearchOptions::new())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["company_id"], Value::Ref(1, "My Company".into()));
}

#[test]
fn test_rules_guard_reads_and_mutations() {
    let f = fixture();
    let mut env = f.ctx.as_user(f.salesman);
    let cancelled = env.browse("sale.order", vec![f.cancelled]).unwrap();
    let foreign = env.browse("sale.order", vec![f.foreign]).unwrap();
    let mixed = env.browse("sale.order", vec![f.draft, f.cancelled]).unwrap();

    let err = env.read(&cancelled, Some(&["name"])).unwrap_err();
    assert!(matches!(err, Error::RuleViolation { operation: AccessOperation::Read, .. }), "{err}");
    let err = env.write(&mixed, Values::new().set("note", "x")).unwrap_err();
    assert!(matches!(err, Error::RuleViolation { operation: AccessOperation::Write, .. }), "{err}");
    let err = env.unlink(&foreign).unwrap_err();
    assert!(matches!(err, Error::RuleViolation { operation: AccessOperation::Unlink, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let violations: Vec<usize> = f
        .ctx
        .audit
        .events()
        .into_iter()
        .filter_map(|e| match e.event_type {
            AuditEventType::RuleViolation { rejected, .. } => Some(rejected),
            _ => None,
        })
        .collect();
    assert_eq!(violations, vec![1, 1, 1]);

    // Allowed records still go through.
    let draft = env.browse("sale.order", vec![f.draft]).unwrap();
    env.write(&draft, Values::new().set("note", "ok")).unwrap();
    env.commit().unwrap();

    let mut env = f.ctx.sudo();
    assert_eq!(env.get("sale.order", f.draft, "note").unwrap(), Value::from("ok"));
    assert_eq!(env.get("sale.order", f.cancelled, "note").unwrap(), Value::Null);
}

#[test]
fn test_rule_checks_count_each_chunk() {
    let ctx = TestContext::with(vec![sale_module()], |config| config.with_rule_chunk_size(2));
    let sales = ctx.create_group("Sales", &[]);
    let uid = ctx.create_user("chunked", 1, &[sales]);
    ctx.grant("sale.order", Some(sales), ALL);
    let ids: Vec<i64> = ctx.setup(|env| {
        let rows = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| Values::new().set("name", format!("SO-{name}")))
            .collect();
        Ok(env.create_many("sale.order", rows)?.ids().to_vec())
    });
    ctx.setup(|env| {
        let last = env.browse("sale.order", vec![ids[4]])?;
        env.write(&last, Values::new().set("state", "cancel"))
    });
    ctx.add_rule("sale.order", &[sales], "[('state', '!=', 'cancel')]");

    let mut env = ctx.as_user(uid);
    let allowed = env.browse("sale.order", ids[..4].to_vec()).unwrap();
    env.write(&allowed, Values::new().set("note", "ok")).unwrap();

    let everything = env.browse("sale.order", ids.clone()).unwrap();
    let err = env.write(&everything, Values::new().set("note", "x")).unwrap_err();
    assert!(matches!(err, Error::RuleViolation { operation: AccessOperation::Write, .. }), "{err}");

    let mut ghost = ids[..4].to_vec();
    ghost.push(4242);
    let ghost = env.browse("sale.order", ghost).unwrap();
    let err = env.write(&ghost, Values::new().set("note", "x")).unwrap_err();
    assert!(matches!(err, Error::MissingRecords { ref ids, .. } if *ids == vec![4242]), "{err}");
}

#[test]
fn test_missing_records_are_not_rule_violations() {
    let f = fixture();
    let mut env = f.ctx.as_user(f.salesman);
    let ghost = env.browse("sale.order", vec![f.draft, 4242]).unwrap();
    let err = env.write(&ghost, Values::new().set("note", "x")).unwrap_err();
    assert!(matches!(err, Error::MissingRecords { ref ids, .. } if *ids == vec![4242]), "{err}");
}

#[test]
fn test_create_outside_rules_is_rolled_back() {
    let f = fixture();
    let other_company = f.ctx.setup(|env| {
        env.get("sale.order", f.foreign, "company_id")?
            .as_i64()
            .ok_or_else(|| Error::Internal("no company".into()))
    });

    let result = f.ctx.runtime.run(f.salesman, |env| {
        env.create(
            "sale.order",
            Values::new().set("name", "SO-SNEAKY").set("company_id", other_company),
        )
    });
    assert!(matches!(result, Err(Error::RuleViolation { operation: AccessOperation::Create, .. })));

    let mut env = f.ctx.sudo();
    let sneaky = Domain::new().leaf("name", Operator::Eq, "SO-SNEAKY");
    assert_eq!(env.search_count("sale.order", &sneaky).unwrap(), 0);
}

#[test]
fn test_unevaluable_rule_denies_and_is_audited() {
    let ctx = TestContext::new();
    let uid = ctx.create_user("clerk", 1, &[]);
    ctx.grant("sale.order", None, ALL);
    ctx.setup(|env| env.create("sale.order", Values::new().set("name", "SO001")));
    let rule = ctx.add_rule("sale.order", &[], "[('no_such_field', '=', 1)]");

    let mut env = ctx.as_user(uid);
    assert!(all(&mut env, "sale.order").unwrap().is_empty());

    let skipped: Vec<i64> = ctx
        .audit
        .events()
        .into_iter()
        .filter_map(|e| match e.event_type {
            AuditEventType::RuleSkipped { rule_id, .. } => Some(rule_id),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![rule]);
}

#[test]
fn test_implied_groups_are_transitive() {
    let ctx = TestContext::new();
    let user_group = ctx.create_group("User", &[]);
    let manager_group = ctx.create_group("Manager", &[user_group]);
    let uid = ctx.create_user("manager", 1, &[manager_group]);
    ctx.grant("sale.tag", Some(user_group), READ_ONLY);

    let mut env = ctx.as_user(uid);
    assert_eq!(env.actor().group_ids, vec![user_group, manager_group]);
    assert!(env.actor().in_group(user_group));
    assert!(all(&mut env, "sale.tag").unwrap().is_empty());
}

#[test]
fn test_security_changes_reach_new_units_of_work() {
    let ctx = TestContext::new();
    let uid = ctx.create_user("late", 1, &[]);

    let mut env = ctx.as_user(uid);
    assert!(all(&mut env, "sale.tag").unwrap_err().is_authorization());
    drop(env);

    ctx.grant("sale.tag", None, READ_ONLY);
    let mut env = ctx.as_user(uid);
    assert!(all(&mut env, "sale.tag").is_ok());
    drop(env);

    let group = ctx.create_group("Late Group", &[]);
    ctx.setup(|env| {
        let user = env.browse("res.users", vec![uid])?;
        env.write(&user, Values::new().set("groups_id", vec![group]))
    });
    let env = ctx.as_user(uid);
    assert_eq!(env.actor().group_ids, vec![group]);
}

#[test]
fn test_security_changes_reach_other_runtimes() {
    let ctx = TestContext::new();
    let uid = ctx.create_user("remote", 1, &[]);
    let peer = ctx.peer(vec![sale_module()]);

    let mut env = peer.begin(uid).unwrap();
    assert!(all(&mut env, "sale.tag").unwrap_err().is_authorization());
    drop(env);
    assert!(peer.permissions().stats().entries > 0);

    ctx.grant("sale.tag", None, READ_ONLY);
    let mut env = peer.begin(uid).unwrap();
    assert!(all(&mut env, "sale.tag").is_ok());
}

#[test]
fn test_group_sets_from_an_older_generation_are_ignored() {
    let ctx = TestContext::new();
    let group = ctx.create_group("Fresh", &[]);
    let uid = ctx.create_user("cached", 1, &[group]);
    let kv = ctx.runtime.kv();
    let current = security_generation(kv.as_ref());
    assert!(current > 0);

    let key = format!("{GROUPS_CACHE_PREFIX}{uid}");
    kv.set(&key, serde_json::json!({"generation": current - 1, "groups": [4242]}), None);
    let env = ctx.as_user(uid);
    assert_eq!(env.actor().group_ids, vec![group]);
    drop(env);

    let cached = kv.get(&key).unwrap();
    assert_eq!(cached["generation"], serde_json::json!(current));
    assert_eq!(cached["groups"], serde_json::json!([group]));
}

#[test]
fn test_sudo_elevates_within_a_unit_of_work() {
    let ctx = TestContext::new();
    let uid = ctx.create_user("plain", 1, &[]);
    ctx.setup(|env| env.create("sale.tag", Values::new().set("name", "hidden")));

    let mut env = ctx.as_user(uid);
    assert!(all(&mut env, "sale.tag").is_err());
    let found = env.sudo(|env| all(env, "sale.tag")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(env.uid(), uid);
    assert!(!env.actor().is_superuser());
}

#[test]
fn test_unknown_user_cannot_begin() {
    let ctx = TestContext::new();
    let err = ctx.runtime.begin(4242).unwrap_err();
    assert!(matches!(err, Error::UnknownUser(4242)));
    assert!(err.is_authorization());
}

#[test]
fn test_superuser_mutations_are_audited() {
    let ctx = TestContext::new();
    ctx.audit.clear();
    let tag = ctx.setup(|env| env.create("sale.tag", Values::new().set("name", "audited")));

    let events = ctx.audit.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].superuser);
    assert_eq!(
        events[0].event_type,
        AuditEventType::Mutation {
            model: "sale.tag".into(),
            operation: AccessOperation::Create,
            ids: tag.ids().to_vec(),
        }
    );
}

#[test]
fn test_fields_get_needs_no_access() {
    let f = fixture();
    let env = f.ctx.as_user(f.viewer);
    let fields = env.fields_get("sale.line", Some(&["order_id"])).unwrap();
    assert_eq!(fields["order_id"].relation.as_deref(), Some("sale.order"));
}
