//! DocVault Store — SQLite metadata for stored files and their owners.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteStore;
pub use types::*;
