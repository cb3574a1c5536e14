//! Integration tests for record CRUD, relational commands and search.

mod common;

use common::{all, line, TestContext};
use nexo_core::sql::MAX_PARAMS;
use nexo_core::{Error, RecordSet, SearchOptions};
use nexo_proto::{Command, Domain, Operator, Value, Values};
use pretty_assertions::assert_eq;

fn tags(ctx: &TestContext, names: &[&str]) -> Vec<i64> {
    ctx.setup(|env| {
        let rows = names.iter().map(|n| Values::new().set("name", *n)).collect();
        Ok(env.create_many("sale.tag", rows)?.ids().to_vec())
    })
}

#[test]
fn test_create_applies_defaults_and_reads_back() {
    let ctx = TestContext::new();
    let order = ctx.setup(|env| env.create("sale.order", Values::new().set("name", "SO001")));

    let mut env = ctx.sudo();
    let rows = env
        .read(&order, Some(&["name", "state", "company_id", "note", "line_ids"]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["name"], Value::from("SO001"));
    assert_eq!(row["state"], Value::from("draft"));
    assert_eq!(row["company_id"], Value::Ref(1, "My Company".into()));
    assert_eq!(row["note"], Value::Null);
    assert_eq!(row["line_ids"], Value::Ids(vec![]));
}

#[test]
fn test_create_rejects_bad_payloads() {
    let ctx = TestContext::new();
    let mut env = ctx.sudo();

    let err = env.create("sale.order", Values::new()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");

    let err = env
        .create("sale.order", Values::new().set("name", "x").set("state", "bogus"))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");

    let err = env
        .create("sale.order", Values::new().set("name", "x").set("amount_total", 3.0))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");

    let err = env
        .create("sale.order", Values::new().set("name", "x").set("id", 99i64))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");

    let err = env
        .create("sale.order", Values::new().set("nope", 1i64))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }), "{err}");
}

#[test]
fn test_create_many_issues_one_insert_in_input_order() {
    let ctx = TestContext::new();
    let mut env = ctx.sudo();
    let names = ["delta", "alpha", "charlie", "bravo", "echo"];
    let rows = names.iter().map(|n| Values::new().set("name", *n)).collect();

    let before = env.stats();
    let created = env.create_many("sale.tag", rows).unwrap();
    let after = env.stats();

    assert_eq!(after.inserts - before.inserts, 1);
    assert_eq!(created.len(), 5);
    let mut sorted = created.ids().to_vec();
    sorted.sort_unstable();
    assert_eq!(created.ids(), sorted.as_slice());

    let read: Vec<Value> = env
        .read(&created, Some(&["name"]))
        .unwrap()
        .into_iter()
        .map(|mut row| row.remove("name").unwrap())
        .collect();
    let expected: Vec<Value> = names.iter().map(|n| Value::from(*n)).collect();
    assert_eq!(read, expected);
}

#[test]
fn test_read_after_write_needs_no_query() {
    let ctx = TestContext::new();
    let mut env = ctx.sudo();
    let tag = env.create("sale.tag", Values::new().set("name", "old")).unwrap();
    env.write(&tag, Values::new().set("name", "new")).unwrap();

    let before = env.stats();
    let rows = env.read(&tag, Some(&["name"])).unwrap();
    assert_eq!(rows[0]["name"], Value::from("new"));
    assert_eq!(env.get("sale.tag", tag.ids()[0], "name").unwrap(), Value::from("new"));
    assert_eq!(env.stats(), before);
}

#[test]
fn test_nested_lines_feed_the_stored_total() {
    let ctx = TestContext::new();
    let order = ctx.setup(|env| {
        let values = Values::new()
            .set("name", "SO002")
            .with_commands("line_ids", vec![line("desk", 2.0, 10.0), line("lamp", 1.0, 5.0)]);
        env.create("sale.order", values)
    });

    let mut env = ctx.sudo();
    let row = env
        .read(&order, Some(&["amount_total", "line_count", "line_ids"]))
        .unwrap()
        .remove(0);
    assert_eq!(row["amount_total"], Value::Float(25.0));
    assert_eq!(row["line_count"], Value::Int(2));
    let lines = row["line_ids"].as_ids().unwrap();
    assert_eq!(lines.len(), 2);

    let line_rows = env
        .read(&RecordSet::new("sale.line", lines.clone()), Some(&["name", "amount", "order_id"]))
        .unwrap();
    assert_eq!(line_rows[0]["amount"], Value::Float(20.0));
    assert_eq!(line_rows[1]["amount"], Value::Float(5.0));
    assert_eq!(line_rows[0]["order_id"], Value::Ref(order.ids()[0], "SO002".into()));

    // The stored total is persisted, not only cached.
    let persisted = env
        .cursor()
        .query(
            "SELECT \"amount_total\" FROM \"sale_order\" WHERE \"id\" = $1",
            &[Value::Int(order.ids()[0])],
        )
        .unwrap();
    assert_eq!(persisted[0][0], Value::Float(25.0));
}

#[test]
fn test_create_many_splits_past_the_parameter_limit() {
    let ctx = TestContext::new();
    let mut env = ctx.sudo();
    let count = MAX_PARAMS + 1;
    let rows = (0..count).map(|n| Values::new().set("name", format!("tag-{n}"))).collect();

    let before = env.stats();
    let created = env.create_many("sale.tag", rows).unwrap();
    let after = env.stats();

    assert!(after.inserts - before.inserts >= 2);
    assert_eq!(created.len(), count);
    assert!(created.ids().windows(2).all(|pair| pair[0] < pair[1]));
    let last = env.get("sale.tag", created.ids()[count - 1], "name").unwrap();
    assert_eq!(last, Value::from(format!("tag-{}", count - 1)));
    env.commit().unwrap();

    let mut env = ctx.sudo();
    assert_eq!(all(&mut env, "sale.tag").unwrap().len(), count);
}

#[test]
fn test_one2many_commands() {
    let ctx = TestContext::new();
    let order = ctx.setup(|env| {
        let values = Values::new()
            .set("name", "SO003")
            .with_commands("line_ids", vec![line("a", 1.0, 1.0), line("b", 1.0, 2.0), line("c", 1.0, 4.0)]);
        env.create("sale.order", values)
    });
    let lines = ctx.setup(|env| Ok(order.get(env, "line_ids")?.as_ids().unwrap_or_default()));
    let (a, b, c) = (lines[0], lines[1], lines[2]);

    ctx.setup(|env| {
        let commands = vec![
            Command::Update(a, Values::new().set("quantity", 3.0)),
            Command::Delete(b),
            Command::Create(Values::new().set("name", "d").set("price", 8.0)),
        ];
        env.write(&order, Values::new().with_commands("line_ids", commands))
    });

    let mut env = ctx.sudo();
    let row = env.read(&order, Some(&["line_ids", "amount_total"])).unwrap().remove(0);
    let current = row["line_ids"].as_ids().unwrap();
    assert_eq!(current.len(), 3);
    assert!(current.contains(&a) && current.contains(&c) && !current.contains(&b));
    assert_eq!(row["amount_total"], Value::Float(3.0 + 4.0 + 8.0));

    // The inverse is required, so unlinking a line deletes it.
    env.write(&order, Values::new().with_commands("line_ids", vec![Command::Unlink(c)]))
        .unwrap();
    let remaining = all(&mut env, "sale.line").unwrap();
    assert!(!remaining.contains(c));
    assert_eq!(env.get("sale.order", order.ids()[0], "amount_total").unwrap(), Value::Float(11.0));
}

#[test]
fn test_many2many_replace_touches_only_changed_pairs() {
    let ctx = TestContext::new();
    let ids = tags(&ctx, &["one", "two", "three"]);
    let order = ctx.setup(|env| {
        let values = Values::new()
            .set("name", "SO004")
            .with_commands("tag_ids", vec![Command::Set(vec![ids[0], ids[1]])]);
        env.create("sale.order", values)
    });

    let mut env = ctx.sudo();
    let before = env.stats();
    env.write(
        &order,
        Values::new().with_commands("tag_ids", vec![Command::Set(vec![ids[1], ids[2]])]),
    )
    .unwrap();
    let after = env.stats();
    assert_eq!(after.deletes - before.deletes, 1);
    assert_eq!(after.inserts - before.inserts, 1);
    env.commit().unwrap();

    let mut env = ctx.sudo();
    let row = env.read(&order, Some(&["tag_ids"])).unwrap().remove(0);
    assert_eq!(row["tag_ids"], Value::Ids(vec![ids[1], ids[2]]));
}

#[test]
fn test_many2many_link_unlink_clear() {
    let ctx = TestContext::new();
    let ids = tags(&ctx, &["x", "y"]);
    let mut env = ctx.sudo();
    let order = env.create("sale.order", Values::new().set("name", "SO005")).unwrap();

    env.write(&order, Values::new().with_commands("tag_ids", vec![Command::Link(ids[1]), Command::Link(ids[0])]))
        .unwrap();
    assert_eq!(order.get(&mut env, "tag_ids").unwrap(), Value::Ids(vec![ids[0], ids[1]]));

    env.write(&order, Values::new().with_commands("tag_ids", vec![Command::Unlink(ids[0])]))
        .unwrap();
    assert_eq!(order.get(&mut env, "tag_ids").unwrap(), Value::Ids(vec![ids[1]]));

    env.write(&order, Values::new().set("tag_ids", false)).unwrap();
    assert_eq!(order.get(&mut env, "tag_ids").unwrap(), Value::Ids(vec![]));
    // Tags themselves are kept.
    assert_eq!(all(&mut env, "sale.tag").unwrap().len(), 2);
}

#[test]
fn test_unlink_cascades_to_lines() {
    let ctx = TestContext::new();
    let order = ctx.setup(|env| {
        let values = Values::new()
            .set("name", "SO006")
            .with_commands("line_ids", vec![line("a", 1.0, 1.0)]);
        env.create("sale.order", values)
    });

    let mut env = ctx.sudo();
    assert_eq!(all(&mut env, "sale.line").unwrap().len(), 1);
    env.unlink(&order).unwrap();
    assert!(all(&mut env, "sale.order").unwrap().is_empty());
    assert!(all(&mut env, "sale.line").unwrap().is_empty());

    let err = env.read(&order, Some(&["name"])).unwrap_err();
    assert!(matches!(err, Error::MissingRecords { ref ids, .. } if ids == order.ids()), "{err}");
}

#[test]
fn test_binary_fields_live_in_attachments() {
    let ctx = TestContext::new();
    let order = ctx.setup(|env| {
        let values = Values::new()
            .set("name", "SO007")
            .set("document", Value::Bytes(b"%PDF-1.7".to_vec()));
        env.create("sale.order", values)
    });

    let mut env = ctx.sudo();
    assert_eq!(
        order.get(&mut env, "document").unwrap(),
        Value::Bytes(b"%PDF-1.7".to_vec())
    );
    let attachments = env
        .search(
            "ir.attachment",
            &Domain::new()
                .leaf("res_model", Operator::Eq, "sale.order")
                .leaf("res_id", Operator::Eq, order.ids()[0]),
            &SearchOptions::new(),
        )
        .unwrap();
    assert_eq!(attachments.len(), 1);

    env.write(&order, Values::new().set("document", Value::Null)).unwrap();
    env.commit().unwrap();

    let mut env = ctx.sudo();
    assert_eq!(order.get(&mut env, "document").unwrap(), Value::Null);
    assert!(all(&mut env, "ir.attachment").unwrap().is_empty());
}

#[test]
fn test_search_order_limit_offset_and_count() {
    let ctx = TestContext::new();
    let ids = tags(&ctx, &["t1", "t2", "t3", "t4", "t5"]);
    let mut env = ctx.sudo();

    let page = env
        .search(
            "sale.tag",
            &Domain::new(),
            &SearchOptions::new().with_order("name desc").with_limit(2).with_offset(1),
        )
        .unwrap();
    assert_eq!(page.ids(), [ids[3], ids[2]]);

    let domain = Domain::new().or().leaf("name", Operator::Eq, "t1").leaf("name", Operator::Eq, "t5");
    assert_eq!(env.search_count("sale.tag", &domain).unwrap(), 2);

    let rows = env
        .search_read("sale.tag", &domain, Some(&["name"]), &SearchOptions::new())
        .unwrap();
    let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, [&Value::from("t1"), &Value::from("t5")]);

    let like = Domain::new().leaf("name", Operator::ILike, "T");
    assert_eq!(env.search_count("sale.tag", &like).unwrap(), 5);
}

#[test]
fn test_empty_membership_matches_nothing() {
    let ctx = TestContext::new();
    tags(&ctx, &["a", "b"]);
    let mut env = ctx.sudo();
    let domain = Domain::new().leaf("id", Operator::In, Value::List(vec![]));
    let found = env.search("sale.tag", &domain, &SearchOptions::new()).unwrap();
    assert!(found.is_empty());
    assert_eq!(env.search_count("sale.tag", &domain).unwrap(), 0);
}

#[test]
fn test_metacharacters_are_matched_literally() {
    let ctx = TestContext::new();
    tags(&ctx, &["a'b", "100%", "plain"]);
    let mut env = ctx.sudo();
    let quoted = Domain::new().leaf("name", Operator::Eq, "a'b");
    assert_eq!(env.search_count("sale.tag", &quoted).unwrap(), 1);
    let percent = Domain::new().leaf("name", Operator::Like, "%");
    assert_eq!(env.search_count("sale.tag", &percent).unwrap(), 1);
    let injected = Domain::new().leaf("name", Operator::Eq, "x' OR '1'='1");
    assert_eq!(env.search_count("sale.tag", &injected).unwrap(), 0);
}

#[test]
fn test_cursor_pagination() {
    let ctx = TestContext::new();
    let ids = tags(&ctx, &["p1", "p2", "p3", "p4", "p5"]);
    let mut env = ctx.sudo();

    let mut seen = Vec::new();
    let mut options = SearchOptions::new().with_limit(2);
    loop {
        let page = env.search("sale.tag", &Domain::new(), &options).unwrap();
        if page.is_empty() {
            break;
        }
        seen.extend_from_slice(page.ids());
        options = SearchOptions::new().with_limit(2).with_cursor(*page.ids().last().unwrap());
    }
    assert_eq!(seen, ids);

    let err = env
        .search(
            "sale.tag",
            &Domain::new(),
            &SearchOptions::new().with_order("name").with_cursor(ids[0]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}

#[test]
fn test_name_get_and_browse() {
    let ctx = TestContext::new();
    let ids = tags(&ctx, &["red", "blue"]);
    let mut env = ctx.sudo();
    let records = env.browse("sale.tag", ids.clone()).unwrap();
    assert_eq!(
        env.name_get(&records).unwrap(),
        vec![(ids[0], "red".to_string()), (ids[1], "blue".to_string())]
    );
    assert!(matches!(env.browse("no.model", vec![1]), Err(Error::UnknownModel(_))));
}

#[test]
fn test_fields_get() {
    let ctx = TestContext::new();
    let env = ctx.sudo();
    let fields = env.fields_get("sale.order", Some(&["name", "line_ids", "amount_total"])).unwrap();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields["name"].field_type, "char");
    assert_eq!(fields["name"].string, "Order Reference");
    assert!(fields["name"].required);
    assert_eq!(fields["line_ids"].relation.as_deref(), Some("sale.line"));
    assert_eq!(fields["line_ids"].relation_field.as_deref(), Some("order_id"));
    assert_eq!(fields["amount_total"].depends, vec!["line_ids.amount".to_string()]);
    assert!(fields["amount_total"].readonly);

    let every = env.fields_get("sale.order", None).unwrap();
    assert!(every.contains_key("id"));
    assert!(every.contains_key("write_date"));
    assert!(matches!(
        env.fields_get("sale.order", Some(&["nope"])),
        Err(Error::UnknownField { .. })
    ));
}

#[test]
fn test_savepoint_isolates_a_failing_step() {
    let ctx = TestContext::new();
    let mut env = ctx.sudo();
    env.create("sale.tag", Values::new().set("name", "kept")).unwrap();

    let result = env.savepoint(|env| {
        env.create("sale.tag", Values::new().set("name", "discarded"))?;
        env.create("sale.tag", Values::new())
    });
    assert!(matches!(result, Err(Error::Validation(_))));

    env.savepoint(|env| env.create("sale.tag", Values::new().set("name", "inner")))
        .unwrap();
    env.commit().unwrap();

    let mut env = ctx.sudo();
    let rows = env
        .search_read("sale.tag", &Domain::new(), Some(&["name"]), &SearchOptions::new())
        .unwrap();
    let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, [&Value::from("kept"), &Value::from("inner")]);
}

#[test]
fn test_failed_unit_of_work_rolls_back() {
    let ctx = TestContext::new();
    let result: nexo_core::Result<()> = ctx.runtime.run(nexo_core::SUPERUSER_ID, |env| {
        env.create("sale.tag", Values::new().set("name", "ghost"))?;
        Err(Error::Validation("abort".into()))
    });
    assert!(result.is_err());

    let mut env = ctx.sudo();
    assert!(all(&mut env, "sale.tag").unwrap().is_empty());
}
