//! Storage layer
//!
//! Owns the SQLite connection and schema.
//!
//! ## Architecture
//!
//! - **Database**: opens the file (or an in-memory database for tests),
//!   enables foreign keys, registers the SQL functions compiled filters
//!   use and initializes the schema
//! - **Transactions**: every store operation runs against a `&Connection`
//!   supplied by its caller. `Database::write` opens a `BEGIN IMMEDIATE`
//!   transaction so read-then-write operations hold the write lock from the
//!   first read, and commits only when the closure succeeds.

pub mod schema;
pub mod sql;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

pub use schema::{init_schema, needs_init, PARENT_CHILD_LINK_TYPE_ID, SCHEMA_VERSION};

/// SQLite database holding work items and their related tables
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database configured in `config`
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.database_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Internal(format!("failed to create directory {:?}: {}", parent, e))
            })?;
        }

        debug!(path = %path.display(), "opening database");
        let conn = Connection::open(&path)?;
        Self::prepare(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        sql::register_functions(&conn)?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an immediate write transaction
    pub fn write<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a deferred read transaction
    pub fn read<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
