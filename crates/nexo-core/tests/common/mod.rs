//! Shared fixtures: a file-backed runtime with a small sales module and
//! helpers to set up groups, users, access rows and row rules.

#![allow(dead_code)]

use std::sync::Arc;

use nexo_core::cache::MemoryCache;
use nexo_core::catalog::{FieldDef, ModelDecl, Module, OnDelete};
use nexo_core::{Environment, MemoryAuditLogger, RecordSet, Registry, Result, Runtime, RuntimeConfig, SearchOptions, SUPERUSER_ID};
use nexo_proto::{Command, Domain, Operator, Values};

pub struct TestContext {
    pub runtime: Runtime,
    pub audit: Arc<MemoryAuditLogger>,
    kv: Arc<MemoryCache>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    /// Runtime over the sales module with default settings.
    pub fn new() -> Self {
        Self::with(vec![sale_module()], |config| config)
    }

    /// Runtime over `modules` (plus `base`) with an adjusted configuration.
    pub fn with(modules: Vec<Module>, configure: impl FnOnce(RuntimeConfig) -> RuntimeConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = configure(RuntimeConfig::new(dir.path().join("nexo.db")));
        let mut builder = Registry::builder();
        for module in modules {
            builder = builder.module(module);
        }
        let registry = builder.build().unwrap();
        let audit = Arc::new(MemoryAuditLogger::new());
        let kv = Arc::new(MemoryCache::new());
        let runtime = Runtime::builder(config, registry)
            .with_audit_logger(audit.clone())
            .with_shared_cache(kv.clone())
            .bootstrap()
            .unwrap();
        Self {
            runtime,
            audit,
            kv,
            _dir: dir,
        }
    }

    /// A second runtime over the same database file and shared cache, as
    /// another server process would open it.
    pub fn peer(&self, modules: Vec<Module>) -> Runtime {
        let mut builder = Registry::builder();
        for module in modules {
            builder = builder.module(module);
        }
        Runtime::builder(self.runtime.config().clone(), builder.build().unwrap())
            .with_shared_cache(self.kv.clone())
            .open()
            .unwrap()
    }

    /// A unit of work acting as the superuser.
    pub fn sudo(&self) -> Environment {
        self.runtime.begin(SUPERUSER_ID).unwrap()
    }

    pub fn as_user(&self, uid: i64) -> Environment {
        self.runtime.begin(uid).unwrap()
    }

    /// Run `f` as superuser and commit.
    pub fn setup<T>(&self, f: impl FnOnce(&mut Environment) -> Result<T>) -> T {
        self.runtime.run(SUPERUSER_ID, f).unwrap()
    }

    pub fn create_group(&self, name: &str, implied: &[i64]) -> i64 {
        self.setup(|env| {
            let values = Values::new()
                .set("name", name)
                .with_commands("implied_ids", vec![Command::Set(implied.to_vec())]);
            env.create("res.groups", values)?.ensure_one()
        })
    }

    pub fn create_user(&self, login: &str, company_id: i64, groups: &[i64]) -> i64 {
        self.setup(|env| {
            let values = Values::new()
                .set("name", login.to_uppercase())
                .set("login", login)
                .set("company_id", company_id)
                .with_commands("groups_id", vec![Command::Set(groups.to_vec())]);
            env.create("res.users", values)?.ensure_one()
        })
    }

    /// Grant `[read, write, create, unlink]` on `model` to `group`
    /// (everyone when `None`).
    pub fn grant(&self, model: &str, group: Option<i64>, perms: [bool; 4]) -> i64 {
        self.setup(|env| {
            let model_id = model_id(env, model)?;
            let mut values = Values::new()
                .set("name", format!("access_{}", model.replace('.', "_")))
                .set("model_id", model_id)
                .set("perm_read", perms[0])
                .set("perm_write", perms[1])
                .set("perm_create", perms[2])
                .set("perm_unlink", perms[3]);
            if let Some(group) = group {
                values = values.set("group_id", group);
            }
            env.create("ir.model.access", values)?.ensure_one()
        })
    }

    /// Add a row rule on `model` for `groups` (global when empty).
    pub fn add_rule(&self, model: &str, groups: &[i64], domain: &str) -> i64 {
        self.setup(|env| {
            let model_id = model_id(env, model)?;
            let values = Values::new()
                .set("name", format!("rule on {model}"))
                .set("model_id", model_id)
                .set("domain_force", domain)
                .with_commands("groups", vec![Command::Set(groups.to_vec())]);
            env.create("ir.rule", values)?.ensure_one()
        })
    }
}

/// Id of the `ir.model` row of `model`.
pub fn model_id(env: &mut Environment, model: &str) -> Result<i64> {
    let domain = Domain::new().leaf("model", Operator::Eq, model);
    env.search("ir.model", &domain, &SearchOptions::new())?.ensure_one()
}

/// Every id of `model` visible to the environment, in default order.
pub fn all(env: &mut Environment, model: &str) -> Result<RecordSet> {
    env.search(model, &Domain::new(), &SearchOptions::new())
}

pub fn line(name: &str, quantity: f64, price: f64) -> Command {
    Command::Create(
        Values::new()
            .set("name", name)
            .set("quantity", quantity)
            .set("price", price),
    )
}

/// Orders, lines and tags with a stored total, a stored line amount and an
/// unstored line count.
pub fn sale_module() -> Module {
    Module::new("sale")
        .with_model(
            ModelDecl::new("sale.tag")
                .with_description("Sales Tag")
                .with_field(FieldDef::char("name").required()),
        )
        .with_model(
            ModelDecl::new("sale.order")
                .with_description("Sales Order")
                .with_field(FieldDef::char("name").with_label("Order Reference").required())
                .with_field(FieldDef::selection(
                    "state",
                    [("draft", "Quotation"), ("sale", "Sales Order"), ("cancel", "Cancelled")],
                )
                .with_default("draft"))
                .with_field(FieldDef::many2one("company_id", "res.company").with_default(1i64))
                .with_field(FieldDef::one2many("line_ids", "sale.line", "order_id"))
                .with_field(FieldDef::many2many("tag_ids", "sale.tag"))
                .with_field(FieldDef::text("note"))
                .with_field(FieldDef::binary("document"))
                .with_field(
                    FieldDef::float("amount_total")
                        .computed("_compute_amount_total", ["line_ids.amount"], compute_amount_total)
                        .stored(),
                )
                .with_field(FieldDef::integer("line_count").computed(
                    "_compute_line_count",
                    ["line_ids"],
                    compute_line_count,
                )),
        )
        .with_model(
            ModelDecl::new("sale.line")
                .with_description("Sales Order Line")
                .with_field(
                    FieldDef::many2one("order_id", "sale.order")
                        .with_ondelete(OnDelete::Cascade)
                        .required(),
                )
                .with_field(FieldDef::char("name"))
                .with_field(FieldDef::float("quantity").with_default(1.0))
                .with_field(FieldDef::float("price"))
                .with_field(
                    FieldDef::float("amount")
                        .computed("_compute_amount", ["quantity", "price"], compute_line_amount)
                        .stored(),
                ),
        )
}

fn compute_line_amount(env: &mut Environment, lines: &RecordSet) -> Result<()> {
    for line in lines.iter() {
        let quantity = line.get(env, "quantity")?.as_f64().unwrap_or_default();
        let price = line.get(env, "price")?.as_f64().unwrap_or_default();
        env.assign(&line, "amount", quantity * price)?;
    }
    Ok(())
}

fn compute_amount_total(env: &mut Environment, orders: &RecordSet) -> Result<()> {
    for order in orders.iter() {
        let lines = order.mapped(env, "line_ids")?;
        let mut total = 0.0;
        for line in lines.iter() {
            total += line.get(env, "amount")?.as_f64().unwrap_or_default();
        }
        env.assign(&order, "amount_total", total)?;
    }
    Ok(())
}

fn compute_line_count(env: &mut Environment, orders: &RecordSet) -> Result<()> {
    for order in orders.iter() {
        let count = order.get(env, "line_ids")?.as_ids().map_or(0, |ids| ids.len());
        env.assign(&order, "line_count", count as i64)?;
    }
    Ok(())
}
