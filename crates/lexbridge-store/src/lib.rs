//! # lexbridge-store
//!
//! SQLite persistence for cases, proposals, direct connections, channels and
//! messages.
//!
//! [`Database`] wraps a synchronous `rusqlite::Connection` and exposes typed
//! helpers per record type. Writes that must not race carry an expected
//! version and fail with [`StoreError::Conflict`] when another writer got
//! there first. [`StoreHandle`] is the async face used by the rest of the
//! system: it runs every call on the blocking pool under a timeout.

pub mod cases;
pub mod channels;
pub mod connections;
pub mod database;
pub mod handle;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use handle::StoreHandle;
pub use models::*;
