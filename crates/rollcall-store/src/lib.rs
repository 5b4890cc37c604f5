//! rollcall-store: SQLite persistence for Rollcall.
//!
//! [`SqliteStorage`] backs the core key-value [`Storage`](rollcall_core::Storage)
//! trait; [`Roster`] is the async student table behind the HTTP API.

pub mod roster;
pub mod sqlite;

pub use roster::{Roster, RosterError, Student};
pub use sqlite::{DbError, SqliteStorage};
