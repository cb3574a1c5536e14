//! Runtime benchmarks: batched creates, searches under row rules, domain
//! compilation and recompute propagation.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nexo_core::catalog::{FieldDef, ModelDecl, Module, OnDelete};
use nexo_core::security::NullAuditLogger;
use nexo_core::sql::compile_domain;
use nexo_core::{Environment, RecordSet, Registry, Result, Runtime, RuntimeConfig, SearchOptions, SUPERUSER_ID};
use nexo_proto::{Command, Domain, Operator, Values};
use tempfile::TempDir;

fn bench_module() -> Module {
    Module::new("bench")
        .with_model(
            ModelDecl::new("bench.order")
                .with_field(FieldDef::char("name").required())
                .with_field(FieldDef::integer("priority").with_index())
                .with_field(FieldDef::one2many("line_ids", "bench.line", "order_id"))
                .with_field(
                    FieldDef::float("total")
                        .computed("_compute_total", ["line_ids.amount"], compute_total)
                        .stored(),
                ),
        )
        .with_model(
            ModelDecl::new("bench.line")
                .with_field(
                    FieldDef::many2one("order_id", "bench.order")
                        .with_ondelete(OnDelete::Cascade)
                        .required(),
                )
                .with_field(FieldDef::float("amount")),
        )
}

fn compute_total(env: &mut Environment, orders: &RecordSet) -> Result<()> {
    for order in orders.iter() {
        let mut total = 0.0;
        for line in order.mapped(env, "line_ids")?.iter() {
            total += line.get(env, "amount")?.as_f64().unwrap_or_default();
        }
        env.assign(&order, "total", total)?;
    }
    Ok(())
}

struct BenchContext {
    runtime: Runtime,
    _dir: TempDir,
}

impl BenchContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::builder().module(bench_module()).build().unwrap();
        let runtime = Runtime::builder(RuntimeConfig::new(dir.path().join("bench.db")), registry)
            .with_audit_logger(Arc::new(NullAuditLogger))
            .bootstrap()
            .unwrap();
        Self { runtime, _dir: dir }
    }

    /// `count` orders with three lines each.
    fn seeded(count: usize) -> Self {
        let ctx = Self::new();
        ctx.runtime
            .run(SUPERUSER_ID, |env| {
                let rows = (0..count).map(order_with_lines).collect();
                env.create_many("bench.order", rows)
            })
            .unwrap();
        ctx
    }
}

fn order_with_lines(n: usize) -> Values {
    let lines = (1..=3)
        .map(|i| Command::Create(Values::new().set("amount", (n * i) as f64)))
        .collect();
    Values::new()
        .set("name", format!("BO-{n:05}"))
        .set("priority", (n % 10) as i64)
        .with_commands("line_ids", lines)
}

fn bench_create_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/create_many");

    for batch_size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("orders", batch_size), &batch_size, |b, &batch_size| {
            let ctx = BenchContext::new();
            b.iter(|| {
                let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
                let rows = (0..batch_size)
                    .map(|n| Values::new().set("name", format!("BO-{n}")))
                    .collect();
                black_box(env.create_many("bench.order", rows).unwrap());
                env.rollback().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_nested_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/nested_create");
    let ctx = BenchContext::new();

    group.bench_function("order_with_3_lines", |b| {
        b.iter(|| {
            let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
            black_box(env.create("bench.order", order_with_lines(7)).unwrap());
            env.rollback().unwrap();
        });
    });

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/search");
    let ctx = BenchContext::seeded(1000);

    let by_priority = Domain::new().leaf("priority", Operator::Eq, 3i64);
    group.bench_function("indexed_eq", |b| {
        b.iter(|| {
            let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
            black_box(env.search("bench.order", &by_priority, &SearchOptions::new()).unwrap());
        });
    });

    let by_line = Domain::new().leaf("line_ids.amount", Operator::Gt, 2500.0);
    group.bench_function("one2many_subquery", |b| {
        b.iter(|| {
            let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
            black_box(env.search("bench.order", &by_line, &SearchOptions::new()).unwrap());
        });
    });

    group.bench_function("cursor_page", |b| {
        b.iter(|| {
            let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
            let options = SearchOptions::new().with_limit(50).with_cursor(500);
            black_box(env.search("bench.order", &Domain::new(), &options).unwrap());
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/read");
    let ctx = BenchContext::seeded(1000);

    for page in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("search_read", page), &page, |b, &page| {
            b.iter(|| {
                let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
                let rows = env
                    .search_read(
                        "bench.order",
                        &Domain::new(),
                        Some(&["name", "total", "line_ids"]),
                        &SearchOptions::new().with_limit(page),
                    )
                    .unwrap();
                black_box(rows);
            });
        });
    }

    group.finish();
}

fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/recompute");
    let ctx = BenchContext::seeded(100);

    group.bench_function("write_lines_of_100_orders", |b| {
        b.iter(|| {
            let mut env = ctx.runtime.begin(SUPERUSER_ID).unwrap();
            let lines = env.search("bench.line", &Domain::new(), &SearchOptions::new()).unwrap();
            env.write(&lines, Values::new().set("amount", 1.5)).unwrap();
            env.rollback().unwrap();
        });
    });

    group.finish();
}

fn bench_compile_domain(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/compile_domain");
    let registry = Registry::builder().module(bench_module()).build().unwrap();
    let model = registry.model("bench.order").unwrap().clone();

    let domain = Domain::new()
        .or()
        .leaf("name", Operator::ILike, "bo-00")
        .and()
        .leaf("priority", Operator::In, vec![1i64, 2, 3])
        .not()
        .leaf("line_ids.amount", Operator::Lt, 10.0);
    group.bench_function("mixed", |b| {
        b.iter(|| black_box(compile_domain(&registry, &model, &domain).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_create_many,
    bench_nested_create,
    bench_search,
    bench_read,
    bench_recompute,
    bench_compile_domain,
);
criterion_main!(benches);
