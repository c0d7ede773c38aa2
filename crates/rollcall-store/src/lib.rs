//! rollcall-store — SQLite persistence for the attendance engine.
//!
//! One [`Store`] wraps one connection. The roster tables (teachers,
//! students, classes, enrollments) are plain CRUD; the encoding store
//! and the session ledger hold the invariants the matcher relies on.
//! `Store` is `Send` but not `Sync`: the daemon gives it to a single
//! worker thread.

pub mod encodings;
pub mod error;
pub mod ledger;
pub mod roster;
mod schema;

pub use encodings::EncodingInfo;
pub use error::{Result, StoreError};
pub use ledger::{DeletedRecord, DeletedSessions};

use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %err, "failed to enable WAL mode");
        }
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }
}

/// Wrap a domain parse failure so it can leave a row-mapping closure.
pub(crate) fn conversion_error<E>(column: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, ty, Box::new(err))
}
