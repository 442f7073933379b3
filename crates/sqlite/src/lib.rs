//! Durable `ProcessStorage` backend on SQLite.
//!
//! One connection behind an async mutex. A snapshot owns the connection
//! for its lifetime and runs inside `BEGIN IMMEDIATE`, so snapshots are
//! serialized and the uniqueness constraints are enforced by real
//! `UNIQUE` indexes.

mod codec;
mod connection;
mod error;
mod migrations;
mod storage;
mod stores;

pub use connection::{SqliteSnapshot, SqliteStorage};
pub use error::{Error, Result};
pub use migrations::MigrationManager;
