//! SQLite persistence adapter for the scheduling core.
//!
//! Implements the [`agb_core::ports::SchedulingStore`] port with `sqlx`
//! using the runtime query API, so the crate builds without a database at
//! hand. See [`sqlite::SqliteStore`].

pub mod sqlite;

pub use sqlite::SqliteStore;
