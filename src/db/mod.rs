//! Relational store adapter.
//!
//! Owns the embedded SQLite database and hands out scoped pools: a write pool
//! with referential integrity enforced, and a read-only pool (`query_only`)
//! used by the query and export paths so they can never mutate state.

pub mod schema;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::EngineError;

#[derive(Clone)]
pub struct Store {
    write: SqlitePool,
    read: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and both pools.
    pub async fn open(path: &str) -> Result<Self, EngineError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let write_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let write = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(write_options)
            .await?;

        let read_options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .pragma("query_only", "ON");
        let read = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_options)
            .await?;

        Ok(Self { write, read })
    }

    /// In-memory store for tests. A single shared connection backs both the
    /// read and write handles, since each in-memory connection is its own
    /// database.
    pub async fn open_in_memory() -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            write: pool.clone(),
            read: pool,
        })
    }

    pub fn write_pool(&self) -> &SqlitePool {
        &self.write
    }

    pub fn read_pool(&self) -> &SqlitePool {
        &self.read
    }
}
