//! Keepsake: identity-preserving object persistence.
//!
//! Declare classes with fields and ownership relationships, then create,
//! load, store, delete, revert and clone objects through a [`Session`].
//! Within a session every object id maps to exactly one live instance;
//! related objects arrive as lazy proxies that fill themselves in place.
//!
//! # Quick Start
//!
//! ```ignore
//! use keepsake::prelude::*;
//!
//! let session = SessionBuilder::new()
//!     .class(
//!         ClassDef::new("Album")
//!             .field(FieldInfo::new("title", SqlType::Text))
//!             .has_many("tracks", "Track"),
//!     )?
//!     .class(ClassDef::new("Track").field(FieldInfo::new("name", SqlType::Text)))?
//!     .build_sqlite(&SqliteConfig::file("music.db"))?;
//!
//! let album = session.create_with("Album", [("title", "Blue")])?;
//! let track = session.create_with("Track", [("name", "River")])?;
//! album.collection(&session, "tracks")?.push(&session, &track)?;
//! session.store(&album)?;
//! ```
//!
//! # Crates
//!
//! - `keepsake-core`: values, class metadata, the `Storage` trait, errors
//! - `keepsake-session`: identity cache, proxies, cascades, collections
//! - `keepsake-sqlite`: SQLite storage and DDL (feature `sqlite`, on by default)

pub mod builder;

pub use builder::SessionBuilder;

pub use keepsake_core::{
    ClassDef, ClassInfo, ClassRegistry, Criteria, Error, FieldInfo, FieldSource, MemoryStorage,
    OrderBy, RelationshipInfo, RelationshipKind, Result, Row, SqlType, Storage, StorageStats,
    ValidationError, Value,
};
pub use keepsake_session::{
    Collection, IdentityCache, Object, ObjectId, OwnerRef, Proxy, Session, SessionConfig,
    StoreReport,
};

#[cfg(feature = "sqlite")]
pub use keepsake_sqlite::{OpenFlags, SqliteConfig, SqliteStorage};

/// Everything needed to declare classes and work with objects.
///
/// ```ignore
/// use keepsake::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ClassDef, Collection, Criteria, Error, FieldInfo, Object, OrderBy, Result, Session,
        SessionBuilder, SessionConfig, SqlType, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConfig;
}
