//! Store adapter (§2 component 1, §6 inward contract).
//!
//! A thin abstraction over a relational key/JSON backend: prepared
//! statements with bound parameters, a batched-execution path for the
//! two-statement version append (§4.1.3), and SQLite's native
//! `json_extract` operator used directly by the filter compiler and the
//! version-chain store. Backed by `sqlx::SqlitePool`; nothing above this
//! module imports `sqlx` directly.

mod migrate;

pub use migrate::run_migrations;

use crate::error::Result;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Arguments, Row};

/// A single bound parameter. Heterogeneous bindings (as produced by the
/// filter compiler's `(sql, bindings)` pairs) are threaded through one
/// `Vec<Bound>` rather than requiring callers to know sqlx's generic
/// `Encode`/`Type` machinery.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for Bound {
    fn from(s: &str) -> Self {
        Bound::Text(s.to_string())
    }
}
impl From<String> for Bound {
    fn from(s: String) -> Self {
        Bound::Text(s)
    }
}
impl From<i64> for Bound {
    fn from(v: i64) -> Self {
        Bound::Int(v)
    }
}
impl From<bool> for Bound {
    fn from(v: bool) -> Self {
        Bound::Bool(v)
    }
}
impl From<f64> for Bound {
    fn from(v: f64) -> Self {
        Bound::Float(v)
    }
}

fn build_args(bindings: &[Bound]) -> Result<SqliteArguments<'static>> {
    let mut args = SqliteArguments::default();
    for b in bindings {
        match b.clone() {
            Bound::Null => args.add(Option::<i64>::None),
            Bound::Bool(v) => args.add(v),
            Bound::Int(v) => args.add(v),
            Bound::Float(v) => args.add(v),
            Bound::Text(v) => args.add(v),
        }
        .map_err(|e| crate::error::CoreError::internal(format!("bind error: {e}")))?;
    }
    Ok(args)
}

/// A logical statement plus its bindings, as emitted by the filter
/// compiler and the version-chain store. `batch` executes a sequence of
/// these as one atomic unit when the backend supports it.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Bound>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, bindings: Vec<Bound>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }

    pub fn plain(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Handle to the backing pool. Cheap to clone (it wraps an `Arc` pool
/// internally, per sqlx).
#[derive(Clone)]
pub struct StorePool {
    pool: SqlitePool,
}

impl StorePool {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<SqliteRow>> {
        let args = build_args(&stmt.bindings)?;
        let rows = sqlx::query_with(&stmt.sql, args).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn fetch_optional(&self, stmt: &Statement) -> Result<Option<SqliteRow>> {
        let args = build_args(&stmt.bindings)?;
        let row = sqlx::query_with(&stmt.sql, args)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Executes a statement, returning the number of rows affected.
    pub async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let args = build_args(&stmt.bindings)?;
        let result = sqlx::query_with(&stmt.sql, args).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Executes every statement inside one transaction (§4.1.3, §5:
    /// "the two-step flip/insert MUST execute as a single batched unit
    /// whenever the store supports it"). Returns the rows-affected count
    /// for each statement in order, so callers can detect a zero-row
    /// flip (§5 concurrent-modification detection) before committing.
    pub async fn batch(&self, stmts: &[Statement]) -> Result<Vec<u64>> {
        let mut tx = self.pool.begin().await?;
        let mut affected = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let args = build_args(&stmt.bindings)?;
            let result = sqlx::query_with(&stmt.sql, args).execute(&mut *tx).await?;
            affected.push(result.rows_affected());
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Like `batch`, but runs the given closure with the open
    /// transaction so the caller can short-circuit (e.g. roll back
    /// without committing) based on intermediate rows-affected counts —
    /// used by the version-chain store to detect and abort on a losing
    /// flip-latest race instead of committing a half-applied append.
    pub async fn batch_with<F>(&self, stmts: &[Statement], check: F) -> Result<Vec<u64>>
    where
        F: Fn(usize, u64) -> Result<()>,
    {
        let mut tx = self.pool.begin().await?;
        let mut affected = Vec::with_capacity(stmts.len());
        for (i, stmt) in stmts.iter().enumerate() {
            let args = build_args(&stmt.bindings)?;
            let result = sqlx::query_with(&stmt.sql, args).execute(&mut *tx).await?;
            let n = result.rows_affected();
            if let Err(e) = check(i, n) {
                tx.rollback().await?;
                return Err(e);
            }
            affected.push(n);
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Narrow row-reading helpers shared by the higher components, so they
/// don't each re-derive sqlx column access.
pub fn get_str(row: &SqliteRow, col: &str) -> Result<String> {
    row.try_get::<String, _>(col)
        .map_err(|e| crate::error::CoreError::internal(format!("column {col}: {e}")))
}

pub fn get_opt_str(row: &SqliteRow, col: &str) -> Result<Option<String>> {
    row.try_get::<Option<String>, _>(col)
        .map_err(|e| crate::error::CoreError::internal(format!("column {col}: {e}")))
}

pub fn get_i64(row: &SqliteRow, col: &str) -> Result<i64> {
    row.try_get::<i64, _>(col)
        .map_err(|e| crate::error::CoreError::internal(format!("column {col}: {e}")))
}

pub fn get_bool(row: &SqliteRow, col: &str) -> Result<bool> {
    row.try_get::<bool, _>(col)
        .map_err(|e| crate::error::CoreError::internal(format!("column {col}: {e}")))
}
