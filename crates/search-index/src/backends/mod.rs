//! Reference search clients.
//!
//! These clients execute the filters produced by [`crate::compiler`] against
//! real or in-process storage:
//!
//! - [`table::MemoryTableClient`] - an in-process wide-column table
//! - [`sqlite::SqliteSearchClient`] - the relational schema on SQLite
//!   (feature `sqlite`)

pub mod table;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use table::{MemoryTableClient, TableContinuation};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteClientConfig, SqliteCursor, SqliteSearchClient};
