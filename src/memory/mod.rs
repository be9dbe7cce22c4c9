// src/memory/mod.rs — Memory manager

pub mod decay;
pub mod embeddings;
pub mod patterns;
pub mod schema;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use patterns::{Pattern, PatternMatch, PatternMemory};

/// Shared handle to the SQLite store.
pub type SharedStore = Arc<Mutex<store::Store>>;

/// Owns the SQLite connection backing patterns, ledger and plan history.
pub struct MemoryManager {
    pub store: store::Store,
}

impl MemoryManager {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        schema::run_migrations(&conn)?;

        Ok(Self {
            store: store::Store::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            store: store::Store::new(conn),
        })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self.store))
    }
}
