//! Storage layer for SensorFlow.
//!
//! DuckDB is columnar, OLAP optimized, and enforces a single-writer model.
//! Every writable connection holds an exclusive process-level lock file next
//! to the database, so two ingestion runs can never write the same store.
//!
//! # Example
//!
//! ```rust,ignore
//! use sensorflow_db::{DbConnection, DbValue};
//!
//! let conn = DbConnection::open_duckdb(Path::new("./sensor_data.duckdb"))?;
//! conn.execute("INSERT INTO t (id) VALUES (?)", &[1.into()])?;
//! let rows = conn.query_all("SELECT * FROM t", &[])?;
//! ```

pub mod backend;
pub mod lock;

pub use backend::{
    AccessMode, BackendError, ConflictPolicy, DbConnection, DbRow, DbTimestamp, DbTransaction,
    DbValue, FromDbValue,
};
pub use lock::{
    lock_path_for, read_lock_owner, try_lock_exclusive, DbLockGuard, LockError, LockOwner,
};
