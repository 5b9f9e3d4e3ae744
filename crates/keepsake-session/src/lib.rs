//! Identity-preserving persistence for Keepsake.
//!
//! `keepsake-session` is the **object layer**. It keeps one live instance per
//! object id, hands out lazy proxies that fill themselves in place, and walks
//! ownership trees when storing, deleting, reverting or cloning.
//!
//! # Role In The Architecture
//!
//! - **Identity cache**: weak map from id to the single live [`Object`].
//! - **Proxies**: [`Object`]s holding only class and id until first access.
//! - **Cascades**: store/delete/revert/clone follow has-one, has-many and
//!   might-have relationships, skipping weak ones.
//! - **Collections**: ordered has-many children, loaded on first use.
//!
//! # Design Philosophy
//!
//! - **Explicit context**: every operation takes a [`Session`]; there is no
//!   global cache.
//! - **Owners by value**: a child records its owner's class and id, never a
//!   strong pointer, so ownership trees cannot form cycles.
//! - **No transactions**: a cascade that fails partway leaves the children it
//!   already wrote.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(storage, Arc::new(registry))?;
//!
//! let page = session.create_with("Page", [("title", "Home")])?;
//! let body = session.create_with("Body", [("text", "hello")])?;
//! page.set_related(&session, "body", Some(&body))?;
//! session.store(&page)?;
//!
//! // Same instance, now a proxy that reloads on access
//! let again = session.load("Body", body.id().as_str())?;
//! assert!(again.ptr_eq(&body));
//! ```

mod cascade;
pub mod collection;
pub mod config;
pub mod identity_cache;
pub mod object;
pub mod proxy;
pub mod session;

pub use collection::Collection;
pub use config::SessionConfig;
pub use identity_cache::IdentityCache;
pub use object::{Object, ObjectId, OwnerRef};
pub use proxy::Proxy;
pub use session::{Session, StoreReport};
