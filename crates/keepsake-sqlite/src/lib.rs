//! SQLite storage for Keepsake.
//!
//! [`SqliteStorage`] implements `keepsake_core::Storage` on top of a bundled
//! libsqlite3, and [`ddl`] creates one table per registered class.
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake_sqlite::SqliteStorage;
//!
//! let storage = Arc::new(SqliteStorage::open_file("app.db")?);
//! storage.create_tables(&registry)?;
//! let session = Session::new(storage, Arc::new(registry))?;
//! ```
//!
//! # Thread Safety
//!
//! `SqliteStorage` is `Send` and `Sync`; every call locks an internal mutex
//! around the database handle.

// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]

pub mod connection;
pub mod ddl;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteStorage};
pub use ddl::{create_tables, drop_tables};

/// SQLite library version string.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
