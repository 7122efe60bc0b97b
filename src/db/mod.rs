// src/db/mod.rs — Durable store collaborator
//
// Persistence is a side effect of distribution, never a dependency: callers
// fire writes from spawned tasks and only log failures.

pub mod schema;
pub mod store;
pub mod store_server;

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;

use store::{DetectionRow, EventRow, Store, UnitLocation};

/// Write paths the distribution layer needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn upsert_unit_status(&self, unit_id: String, status: String) -> anyhow::Result<()>;
    async fn update_unit_location(&self, location: UnitLocation) -> anyhow::Result<()>;
    async fn mark_unit_inactive(&self, unit_id: String) -> anyhow::Result<()>;
    async fn insert_detection(&self, row: DetectionRow) -> anyhow::Result<()>;
    async fn insert_event(&self, row: EventRow) -> anyhow::Result<()>;
}

/// Discards every write. Used when persistence is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl DataSink for NullSink {
    async fn upsert_unit_status(&self, _unit_id: String, _status: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_unit_location(&self, _location: UnitLocation) -> anyhow::Result<()> {
        Ok(())
    }

    async fn mark_unit_inactive(&self, _unit_id: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_detection(&self, _row: DetectionRow) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_event(&self, _row: EventRow) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Open (or create) the database at the given path.
pub fn open(path: &Path) -> anyhow::Result<Store> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn in_memory() -> anyhow::Result<Store> {
    let conn = Connection::open_in_memory()?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}
