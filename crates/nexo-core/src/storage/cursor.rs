//! Statement execution over one pooled connection.
//!
//! Statements carry `$n` placeholders produced by
//! [`ParamBuilder`](crate::sql::ParamBuilder); each parameter is bound by
//! name so the rendered text runs unchanged.

use nexo_proto::{Value, DATETIME_FORMAT, DATE_FORMAT};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use serde::Serialize;

use super::pool::PooledConnection;
use crate::error::{Error, Result};

/// Statements executed through a cursor, by leading verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatementStats {
    pub selects: usize,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    /// DDL, pragmas and transaction control.
    pub other: usize,
}

impl StatementStats {
    /// All statements.
    pub fn total(&self) -> usize {
        self.selects + self.inserts + self.updates + self.deletes + self.other
    }

    fn count(&mut self, sql: &str) {
        match verb(sql).as_str() {
            "SELECT" | "WITH" => self.selects += 1,
            "INSERT" => self.inserts += 1,
            "UPDATE" => self.updates += 1,
            "DELETE" => self.deletes += 1,
            _ => self.other += 1,
        }
    }
}

fn verb(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Binds a [`Value`] as an SQLite parameter.
struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Date(d) => ToSqlOutput::from(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => ToSqlOutput::from(dt.format(DATETIME_FORMAT).to_string()),
            Value::Ref(id, _) => ToSqlOutput::from(*id),
            other @ (Value::Ids(_) | Value::List(_)) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    format!("cannot bind a {} as a single parameter", other.type_name()).into(),
                ))
            }
        })
    }
}

/// Transactional statement executor owned by one unit of work.
pub struct Cursor {
    conn: PooledConnection,
    stats: StatementStats,
    savepoints: usize,
    read_only: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("stats", &self.stats)
            .field("savepoints", &self.savepoints)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub fn new(conn: PooledConnection) -> Self {
        Self {
            conn,
            stats: StatementStats::default(),
            savepoints: 0,
            read_only: false,
        }
    }

    /// Open the outer transaction holding the write lock. Concurrent
    /// writers queue here, each waiting up to the busy timeout.
    pub fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.read_only = false;
        Ok(())
    }

    /// Open a transaction that only reads. It sees one snapshot and never
    /// waits for writers; data-modifying statements are rejected.
    pub fn begin_read_only(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN DEFERRED")?;
        self.read_only = true;
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.savepoints = 0;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Open a nested savepoint and return its name.
    pub fn savepoint(&mut self) -> Result<String> {
        self.savepoints += 1;
        let name = format!("nexo_sp_{}", self.savepoints);
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(name)
    }

    pub fn release(&mut self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        self.savepoints = self.savepoints.saturating_sub(1);
        Ok(())
    }

    /// Undo everything since the savepoint and discard it.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))?;
        self.savepoints = self.savepoints.saturating_sub(1);
        Ok(())
    }

    /// Run a data-modifying statement and return the affected row count.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = self.prepare(sql, params)?;
        Ok(stmt.raw_execute()?)
    }

    /// Run a statement without parameters (DDL).
    pub fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.check_writable(sql)?;
        self.stats.count(sql);
        tracing::debug!(target: "nexo::sql", params = 0, "{sql}");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a query and collect every row.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let mut stmt = self.prepare(sql, params)?;
        let width = stmt.column_count();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    /// Run a query whose first column is a record id.
    pub fn query_ids(&mut self, sql: &str, params: &[Value]) -> Result<Vec<i64>> {
        self.query(sql, params)?
            .into_iter()
            .map(|row| {
                row.first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::Internal(format!("non-integer id returned by: {sql}")))
            })
            .collect()
    }

    /// Run a query returning a single integer, such as `COUNT(*)`.
    pub fn query_scalar_i64(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.query(sql, params)?
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Internal(format!("no integer returned by: {sql}")))
    }

    /// Statements executed so far.
    pub fn stats(&self) -> StatementStats {
        self.stats
    }

    /// The underlying connection, for catalog pragmas.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn check_writable(&self, sql: &str) -> Result<()> {
        if !self.read_only {
            return Ok(());
        }
        match verb(sql).as_str() {
            "SELECT" | "WITH" => Ok(()),
            other => Err(Error::Validation(format!(
                "{other} is not allowed in a read-only unit of work"
            ))),
        }
    }

    fn prepare(&mut self, sql: &str, params: &[Value]) -> Result<Statement<'_>> {
        self.check_writable(sql)?;
        self.stats.count(sql);
        tracing::debug!(target: "nexo::sql", params = params.len(), "{sql}");

        let mut stmt = self.conn.prepare(sql)?;
        if stmt.parameter_count() != params.len() {
            return Err(Error::Internal(format!(
                "statement expects {} parameters, got {}",
                stmt.parameter_count(),
                params.len()
            )));
        }
        for (i, value) in params.iter().enumerate() {
            let name = format!("${}", i + 1);
            let index = stmt
                .parameter_index(&name)?
                .ok_or_else(|| Error::Internal(format!("placeholder {name} missing from: {sql}")))?;
            stmt.raw_bind_parameter(index, SqlParam(value))?;
        }
        Ok(stmt)
    }
}

fn from_sql(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
