//! Lazy stand-ins for stored objects.
//!
//! A proxy is an [`Object`] whose slot holds only its class and id. It is
//! registered in the identity cache exactly like a loaded object, so
//! resolving it later changes what every holder sees.

use crate::object::{Object, ObjectId, Slot};
use crate::session::Session;
use keepsake_core::{Error, ProxyError, Result};
use std::sync::Arc;

/// Constructors and transitions between proxy and loaded state.
pub struct Proxy;

impl Proxy {
    /// A handle for `class`/`id` without touching storage.
    ///
    /// If the identity cache already holds a live object for `id`, that object
    /// is returned instead of a fresh proxy.
    pub fn create(session: &Session, class: &str, id: &str) -> Result<Object> {
        if class.is_empty() || id.is_empty() {
            return Err(Error::InvalidParameters(
                "a proxy needs both a class and an id".to_string(),
            ));
        }
        let id = ObjectId::new(id)?;
        if let Some(existing) = session.cache().get(&id) {
            return Ok(existing);
        }
        let class = session.registry().class(class)?;
        let proxy = Object::new_proxy(id, class);
        session.register(&proxy)
    }

    /// Fill a proxy's slot from storage, in place. No-op for loaded objects.
    ///
    /// The stored row may belong to a subclass of the proxy's class, in which
    /// case the object takes the stored class.
    pub fn load(session: &Session, object: &Object) -> Result<()> {
        let class = match &*object.read_slot() {
            Slot::Proxy { class } => Arc::clone(class),
            Slot::Loaded(_) => return Ok(()),
        };

        let Some((actual, row)) = session.fetch_row(&class, object.id())? else {
            return Err(Error::Proxy(ProxyError {
                class: class.name().to_string(),
                id: object.id().to_string(),
                message: "no such row in storage".to_string(),
            }));
        };
        let record = session.record_from_row(&actual, &row)?;

        let mut slot = object.write_slot();
        if matches!(&*slot, Slot::Proxy { .. }) {
            tracing::debug!(
                class = %actual.name(),
                id = %object.id(),
                "Loaded proxy in place"
            );
            *slot = Slot::Loaded(record);
        }
        Ok(())
    }

    /// Turn a stored object back into a proxy, in place.
    ///
    /// Every holder of `object` now sees a proxy; its fields are released
    /// until the next access. No-op for an object that is already a proxy.
    pub fn promote(object: &Object) -> Result<()> {
        if object.demote() || object.is_proxy() {
            return Ok(());
        }
        Err(Error::InvalidParameters(format!(
            "{} {} has never been stored and cannot stand behind a proxy",
            object.class_name(),
            object.id()
        )))
    }
}
