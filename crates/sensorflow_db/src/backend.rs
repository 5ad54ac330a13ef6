//! DuckDB connection wrapper.
//!
//! Synchronous, single-connection backend:
//! - Typed parameters (`DbValue`) and rows (`DbRow`)
//! - Closure-scoped transactions with rollback on error
//! - Chunked multi-row inserts with an explicit conflict policy
//! - Single-writer enforced via file lock

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug_span, info};

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is locked by another process: {0}")]
    Locked(String),

    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (holds the exclusive lock)
    ReadWrite,
    /// Read-only access (can coexist with other readers)
    ReadOnly,
}

/// What to do when an inserted row hits a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail the statement (and the surrounding transaction).
    Abort,
    /// Keep the stored row and silently drop the new one.
    Ignore,
}

/// Timestamp wrapper for database values.
///
/// Sensor clocks carry no zone; naive timestamps are stored as-is in
/// `TIMESTAMP` columns and treated as UTC on the Rust side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbTimestamp {
    inner: DateTime<Utc>,
}

impl DbTimestamp {
    /// Current timestamp in UTC.
    pub fn now() -> Self {
        Self { inner: Utc::now() }
    }

    /// Wrap a zone-less timestamp.
    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self {
            inner: Utc.from_utc_datetime(&value),
        }
    }

    fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(|inner| Self { inner })
    }

    pub fn to_rfc3339(&self) -> String {
        self.inner.to_rfc3339()
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.inner.naive_utc()
    }

    pub fn as_chrono(&self) -> &DateTime<Utc> {
        &self.inner
    }
}

impl serde::Serialize for DbTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

/// Value type for query parameters and results.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DbTimestamp),
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<DbTimestamp> for DbValue {
    fn from(v: DbTimestamp) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(v: NaiveDateTime) -> Self {
        DbValue::Timestamp(DbTimestamp::from_naive(v))
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Rc<[String]>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        self.values
            .get(index)
            .ok_or_else(|| {
                BackendError::TypeConversion(format!("Column index {} out of bounds", index))
            })
            .and_then(|v| T::from_db_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, BackendError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| BackendError::TypeConversion(format!("Column '{}' not found", name)))?;
        self.get(index)
    }
}

/// Conversion out of a `DbValue`.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

impl DbValue {
    fn kind(&self) -> &'static str {
        match self {
            DbValue::Null => "NULL",
            DbValue::Integer(_) => "integer",
            DbValue::Real(_) => "real",
            DbValue::Text(_) => "text",
            DbValue::Timestamp(_) => "timestamp",
        }
    }
}

/// Nullable columns are read as `Option<T>`.
fn mismatch(expected: &str, found: &DbValue) -> BackendError {
    BackendError::TypeConversion(format!("expected {}, found {}", expected, found.kind()))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("real", other)),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FromDbValue for DbTimestamp {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Timestamp(v) => Ok(v.clone()),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl FromDbValue for NaiveDateTime {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        DbTimestamp::from_db_value(value).map(|ts| ts.naive())
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

/// A DuckDB connection.
#[derive(Clone)]
pub struct DbConnection {
    conn: Rc<duckdb::Connection>,
    access_mode: AccessMode,
    /// Held for RAII only: dropping the last clone releases the file lock.
    #[allow(dead_code)]
    lock_guard: Option<Rc<crate::lock::DbLockGuard>>,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"DuckDB")
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl DbConnection {
    /// Open a DuckDB database with the exclusive writer lock.
    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        use crate::lock::{try_lock_exclusive, LockError};

        let lock_guard = try_lock_exclusive(path).map_err(|e| match e {
            LockError::Locked(p) => BackendError::Locked(p.display().to_string()),
            LockError::CreateFailed(io) => {
                BackendError::Database(format!("Lock file error: {}", io))
            }
            LockError::AcquireFailed(io) => {
                BackendError::Database(format!("Lock acquire error: {}", io))
            }
        })?;

        let conn = Rc::new(duckdb::Connection::open(path)?);
        info!(
            "Opened DuckDB database with exclusive lock: {}",
            path.display()
        );

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            lock_guard: Some(Rc::new(lock_guard)),
        })
    }

    /// Open a DuckDB database in read-only mode (no lock required).
    pub fn open_duckdb_readonly(path: &Path) -> Result<Self, BackendError> {
        use duckdb::{AccessMode as DuckAccessMode, Config};

        let config = Config::default().access_mode(DuckAccessMode::ReadOnly)?;
        let conn = Rc::new(duckdb::Connection::open_with_flags(path, config)?);
        info!("Opened DuckDB database (read-only): {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadOnly,
            lock_guard: None,
        })
    }

    /// Open an in-memory DuckDB database (for testing).
    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        let conn = Rc::new(duckdb::Connection::open_in_memory()?);
        info!("Opened in-memory DuckDB database");

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            lock_guard: None,
        })
    }

    /// Execute a SQL statement, returning the affected row count.
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        self.require_writable()?;
        execute_on_conn(&self.conn, sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        self.require_writable()?;
        execute_batch_on_conn(&self.conn, sql)
    }

    /// Insert rows into a table in parameter-bounded chunks.
    ///
    /// Column order must match the row value order.
    pub fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
        on_conflict: ConflictPolicy,
    ) -> Result<u64, BackendError> {
        self.require_writable()?;
        let conn = self.conn.as_ref();
        insert_rows_chunked(
            |sql, params| execute_on_conn(conn, sql, params),
            table,
            columns,
            rows,
            on_conflict,
        )
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        query_on_conn(&self.conn, sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self
            .query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))?;
        row.get(0)
    }

    /// Run `op` inside `BEGIN`/`COMMIT`, rolling back if it fails.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: for<'a> FnOnce(&'a mut DbTransaction<'a>) -> Result<T, BackendError>,
    {
        self.require_writable()?;
        self.conn.execute_batch("BEGIN")?;
        let mut tx = DbTransaction {
            conn: self.conn.as_ref(),
        };
        let result = op(&mut tx);

        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(BackendError::Transaction(format!(
                    "Transaction failed: {}; rollback failed: {}",
                    err, rollback_err
                ))),
            },
        }
    }

    fn require_writable(&self) -> Result<(), BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }
        Ok(())
    }
}

/// Statements issued inside `DbConnection::transaction`.
pub struct DbTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl<'a> DbTransaction<'a> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute_on_conn(self.conn, sql, params)
    }

    pub fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        query_on_conn(self.conn, sql, params)
    }

    pub fn query_scalar<T: FromDbValue>(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self
            .query_all(sql, params)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))?;
        row.get(0)
    }

    /// Chunked insert within this transaction.
    pub fn insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
        on_conflict: ConflictPolicy,
    ) -> Result<u64, BackendError> {
        let conn = self.conn;
        insert_rows_chunked(
            |sql, params| execute_on_conn(conn, sql, params),
            table,
            columns,
            rows,
            on_conflict,
        )
    }
}

fn execute_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<u64, BackendError> {
    let span = debug_span!(
        "db.exec",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();
    let rows = stmt.execute(param_refs.as_slice())?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(rows as u64)
}

fn execute_batch_on_conn(conn: &duckdb::Connection, sql: &str) -> Result<(), BackendError> {
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql)?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(())
}

fn query_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<Vec<DbRow>, BackendError> {
    let span = debug_span!(
        "db.query",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();

    let mut rows_iter = stmt.query(param_refs.as_slice())?;

    let columns: Rc<[String]> = match rows_iter.as_ref() {
        Some(stmt_ref) => (0..stmt_ref.column_count())
            .map(|i| {
                stmt_ref
                    .column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect(),
        None => return Ok(Vec::new()),
    };

    let mut result = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(duckdb_value_to_db_value(row, i)?);
        }
        result.push(DbRow {
            columns: Rc::clone(&columns),
            values,
        });
    }

    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(result)
}

fn to_duckdb_params(params: &[DbValue]) -> Vec<duckdb::types::Value> {
    use duckdb::types::{TimeUnit, Value};

    params
        .iter()
        .map(|p| match p {
            DbValue::Null => Value::Null,
            DbValue::Integer(v) => Value::BigInt(*v),
            DbValue::Real(v) => Value::Double(*v),
            DbValue::Text(v) => Value::Text(v.clone()),
            DbValue::Timestamp(v) => {
                Value::Timestamp(TimeUnit::Microsecond, v.as_chrono().timestamp_micros())
            }
        })
        .collect()
}

fn duckdb_value_to_db_value(row: &duckdb::Row, index: usize) -> Result<DbValue, duckdb::Error> {
    use duckdb::types::{TimeUnit, ValueRef};

    match row.get_ref(index)? {
        ValueRef::Null => Ok(DbValue::Null),
        ValueRef::Boolean(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::TinyInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::SmallInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::Int(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::BigInt(v) => Ok(DbValue::Integer(v)),
        ValueRef::HugeInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UTinyInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::USmallInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::UBigInt(v) => Ok(DbValue::Integer(v as i64)),
        ValueRef::Float(v) => Ok(DbValue::Real(v as f64)),
        ValueRef::Double(v) => Ok(DbValue::Real(v)),
        ValueRef::Text(v) => Ok(DbValue::Text(String::from_utf8_lossy(v).to_string())),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v * 1_000_000,
                TimeUnit::Millisecond => v * 1_000,
                TimeUnit::Microsecond => v,
                TimeUnit::Nanosecond => v / 1_000,
            };
            Ok(DbTimestamp::from_micros(micros)
                .map(DbValue::Timestamp)
                .unwrap_or(DbValue::Integer(micros)))
        }
        other => {
            tracing::warn!(
                "DuckDB type {:?} at column {} mapped to debug string",
                std::mem::discriminant(&other),
                index
            );
            Ok(DbValue::Text(format!("{:?}", other)))
        }
    }
}

const DEFAULT_MAX_PARAMS: usize = 999;

fn insert_rows_chunked<F>(
    mut execute: F,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
    on_conflict: ConflictPolicy,
) -> Result<u64, BackendError>
where
    F: FnMut(&str, &[DbValue]) -> Result<u64, BackendError>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    if columns.is_empty() {
        return Err(BackendError::InvalidInput(
            "insert_rows requires at least one column".to_string(),
        ));
    }
    if columns.len() > DEFAULT_MAX_PARAMS {
        return Err(BackendError::InvalidInput(format!(
            "Too many columns ({}) for max params ({})",
            columns.len(),
            DEFAULT_MAX_PARAMS
        )));
    }
    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(BackendError::InvalidInput(format!(
                "Row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
    }

    let rows_per_chunk = DEFAULT_MAX_PARAMS / columns.len();
    let quoted_table = quote_ident_path(table);
    let quoted_cols = columns
        .iter()
        .map(|col| quote_ident(col))
        .collect::<Vec<_>>()
        .join(", ");
    let row_clause = format!("({})", vec!["?"; columns.len()].join(", "));
    let conflict_clause = match on_conflict {
        ConflictPolicy::Abort => "",
        ConflictPolicy::Ignore => " ON CONFLICT DO NOTHING",
    };

    let mut total = 0;
    for chunk in rows.chunks(rows_per_chunk) {
        let values_clause = vec![row_clause.as_str(); chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}{}",
            quoted_table, quoted_cols, values_clause, conflict_clause
        );
        let params: Vec<DbValue> = chunk.iter().flatten().cloned().collect();
        total += execute(&sql, &params)?;
    }

    Ok(total)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_ident_path(path: &str) -> String {
    path.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit: stable, low-cardinality statement id for spans.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn readings_table(conn: &DbConnection) {
        conn.execute_batch(
            "CREATE TABLE r (ts TIMESTAMP NOT NULL, id TEXT NOT NULL, v DOUBLE, PRIMARY KEY (ts, id))",
        )
        .unwrap();
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn insert_rows_inserts_expected_rows() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);

        let rows = vec![
            vec![ts(0, 0).into(), "T1".into(), 1.5.into()],
            vec![ts(0, 1).into(), "T1".into(), 2.5.into()],
        ];
        let inserted = conn
            .insert_rows("r", &["ts", "id", "v"], &rows, ConflictPolicy::Abort)
            .unwrap();

        assert_eq!(inserted, 2);
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM r", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn insert_rows_ignore_keeps_first_value() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);
        let cols = ["ts", "id", "v"];

        conn.insert_rows(
            "r",
            &cols,
            &[vec![ts(0, 0).into(), "T1".into(), 1.0.into()]],
            ConflictPolicy::Ignore,
        )
        .unwrap();
        conn.insert_rows(
            "r",
            &cols,
            &[
                vec![ts(0, 0).into(), "T1".into(), 9.0.into()],
                vec![ts(0, 5).into(), "T1".into(), 2.0.into()],
            ],
            ConflictPolicy::Ignore,
        )
        .unwrap();

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM r", &[]).unwrap();
        assert_eq!(count, 2);
        let first: f64 = conn
            .query_scalar("SELECT v FROM r WHERE ts = ?", &[ts(0, 0).into()])
            .unwrap();
        assert_eq!(first, 1.0);
    }

    #[test]
    fn insert_rows_abort_fails_on_duplicate() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);
        let row = vec![ts(0, 0).into(), "T1".into(), 1.0.into()];

        conn.insert_rows("r", &["ts", "id", "v"], &[row.clone()], ConflictPolicy::Abort)
            .unwrap();
        let err = conn.insert_rows("r", &["ts", "id", "v"], &[row], ConflictPolicy::Abort);
        assert!(err.is_err());
    }

    #[test]
    fn insert_rows_rejects_mismatched_row_len() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);

        let rows = vec![vec![ts(0, 0).into()]];
        let err = conn
            .insert_rows("r", &["ts", "id", "v"], &rows, ConflictPolicy::Ignore)
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[test]
    fn insert_rows_spans_multiple_chunks() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);

        let rows: Vec<Vec<DbValue>> = (0..1_000)
            .map(|i| {
                let at = ts(0, 0) + chrono::Duration::seconds(i);
                vec![at.into(), "T1".into(), (i as f64).into()]
            })
            .collect();
        conn.insert_rows("r", &["ts", "id", "v"], &rows, ConflictPolicy::Ignore)
            .unwrap();

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM r", &[]).unwrap();
        assert_eq!(count, 1_000);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);

        let result: Result<(), BackendError> = conn.transaction(|tx| {
            tx.execute(
                "INSERT INTO r (ts, id, v) VALUES (?, ?, ?)",
                &[ts(1, 0).into(), "T1".into(), 1.0.into()],
            )?;
            Err(BackendError::InvalidInput("abort".to_string()))
        });

        assert!(result.is_err());
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM r", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_round_trip_as_naive() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        readings_table(&conn);
        conn.execute(
            "INSERT INTO r (ts, id, v) VALUES (?, ?, ?)",
            &[ts(13, 45).into(), "T1".into(), DbValue::Null],
        )
        .unwrap();

        let row = conn
            .query_optional("SELECT ts, v FROM r", &[])
            .unwrap()
            .unwrap();
        let stored: NaiveDateTime = row.get_by_name("ts").unwrap();
        let value: Option<f64> = row.get(1).unwrap();
        assert_eq!(stored, ts(13, 45));
        assert_eq!(value, None);
    }

    #[test]
    fn null_and_mismatched_values_need_the_right_type() {
        let err = i64::from_db_value(&DbValue::Null).unwrap_err();
        assert!(err.to_string().contains("expected integer, found NULL"));

        let err = String::from_db_value(&DbValue::Real(1.5)).unwrap_err();
        assert!(matches!(err, BackendError::TypeConversion(_)));

        let nullable: Option<String> = FromDbValue::from_db_value(&DbValue::Null).unwrap();
        assert_eq!(nullable, None);
        assert_eq!(f64::from_db_value(&DbValue::Integer(3)).unwrap(), 3.0);
    }
}
