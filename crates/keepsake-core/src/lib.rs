//! Core types for Keepsake.
//!
//! This crate holds everything the identity and cascade engine needs from the
//! outside world, without depending on any particular backend:
//!
//! - `Value`, `Row` and `SqlType` for field data and its encode/decode hooks
//! - `ClassDef` / `ClassRegistry` / `ClassInfo` for declared fields and
//!   relationships, flattened across inheritance at registration time
//! - the `Storage` trait, a statement builder for SQL backends, and
//!   `MemoryStorage` for tests and embedded use
//! - the crate-wide `Error` taxonomy

pub mod class;
pub mod criteria;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod memory;
pub mod relationship;
pub mod row;
pub mod sql;
pub mod storage;
pub mod types;
pub mod value;

pub use class::{ClassDef, ClassInfo, ClassRegistry, FieldSource, Validator};
pub use criteria::{Criteria, OrderBy};
pub use error::{
    ConnectionError, ConnectionErrorKind, DuplicateError, Error, FieldValidationError,
    MethodError, NotFoundError, ProxyError, QueryError, QueryErrorKind, Result, SchemaError,
    SchemaErrorKind, TypeError, ValidationError, ValidationErrorKind,
};
pub use field::FieldInfo;
pub use identifiers::{RESERVED_COLUMNS, quote_ident};
pub use memory::{MemoryStorage, StorageStats};
pub use relationship::{RelationshipInfo, RelationshipKind};
pub use row::{ColumnInfo, FromValue, Row};
pub use storage::{SelectQuery, Storage};
pub use types::SqlType;
pub use value::Value;
