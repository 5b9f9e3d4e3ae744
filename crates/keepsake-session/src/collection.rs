//! Ordered, lazily loaded has-many children.
//!
//! A collection knows its owner only as an [`OwnerRef`]. Membership is loaded
//! on first use by querying for rows owned by that id, each row materialized
//! through the identity cache, so elements already live elsewhere are the
//! same instances here.
//!
//! A weak collection owns nothing. Its membership is the id list kept on the
//! holder's row, so it is always loaded and never changes its elements' owner.

use crate::cascade;
use crate::object::{Object, ObjectId, OwnerRef};
use crate::proxy::Proxy;
use crate::session::Session;
use keepsake_core::{ClassInfo, Error, Result};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct CollectionState {
    element_class: Arc<ClassInfo>,
    owner: Option<OwnerRef>,
    elements: Vec<Object>,
    loaded: bool,
    weak: bool,
}

/// Shared handle to a has-many relationship's elements.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<RwLock<CollectionState>>,
}

impl Collection {
    /// `loaded` is true when there is nothing in storage to fetch yet.
    pub(crate) fn new(element_class: Arc<ClassInfo>, owner: Option<OwnerRef>, loaded: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CollectionState {
                element_class,
                owner,
                elements: Vec::new(),
                loaded,
                weak: false,
            })),
        }
    }

    /// A weak collection over `elements`, held by `holder`.
    pub(crate) fn weak(
        element_class: Arc<ClassInfo>,
        holder: Option<OwnerRef>,
        elements: Vec<Object>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CollectionState {
                element_class,
                owner: holder,
                elements,
                loaded: true,
                weak: true,
            })),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Same underlying collection?
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element_class(&self) -> Arc<ClassInfo> {
        Arc::clone(&self.state().element_class)
    }

    pub fn owner_ref(&self) -> Option<OwnerRef> {
        self.state().owner.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    pub fn is_weak(&self) -> bool {
        self.state().weak
    }

    /// Ids of the elements currently held, without loading anything.
    pub(crate) fn element_ids(&self) -> Vec<ObjectId> {
        self.state().elements.iter().map(|e| e.id().clone()).collect()
    }

    /// A weak collection holding the same elements under another holder.
    pub(crate) fn share_with(&self, holder: OwnerRef) -> Collection {
        let state = self.state();
        Collection::weak(
            Arc::clone(&state.element_class),
            Some(holder),
            state.elements.clone(),
        )
    }

    /// The owning object, live if cached, otherwise as a proxy.
    pub fn owner(&self, session: &Session) -> Result<Option<Object>> {
        match self.owner_ref() {
            Some(owner) => Proxy::create(session, &owner.class, owner.id.as_str()).map(Some),
            None => Ok(None),
        }
    }

    /// Re-parent the collection and every element it currently holds.
    ///
    /// A weak collection only changes holder.
    pub fn set_owner(&self, session: &Session, owner: &Object) -> Result<()> {
        let owner = OwnerRef {
            class: owner.class_name(),
            id: owner.id().clone(),
        };
        let elements = {
            let mut state = self.state_mut();
            state.owner = Some(owner.clone());
            if state.weak {
                return Ok(());
            }
            state.elements.clone()
        };
        for element in &elements {
            element.set_owner_ref(session, Some(owner.clone()))?;
        }
        Ok(())
    }

    /// Query storage for the owner's children.
    ///
    /// Elements are materialized as proxies, or as the cached live instance.
    /// Elements pushed in memory and not found in storage stay at the end.
    pub fn load(&self, session: &Session) -> Result<()> {
        self.load_members(session, true)
    }

    fn load_members(&self, session: &Session, keep_unsaved: bool) -> Result<()> {
        let (class, owner) = {
            let state = self.state();
            if state.weak {
                return Ok(());
            }
            (Arc::clone(&state.element_class), state.owner.clone())
        };
        let found = match &owner {
            Some(owner) => session.find_all_owned(&class, &owner.id)?,
            None => Vec::new(),
        };
        tracing::trace!(class = %class.name(), count = found.len(), "Loaded collection members");

        let mut state = self.state_mut();
        if keep_unsaved {
            let extras: Vec<Object> = state
                .elements
                .iter()
                .filter(|e| !found.iter().any(|f| f.ptr_eq(e)))
                .cloned()
                .collect();
            state.elements = found;
            state.elements.extend(extras);
        } else {
            state.elements = found;
        }
        state.loaded = true;
        Ok(())
    }

    fn ensure_loaded(&self, session: &Session) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            self.load(session)
        }
    }

    /// Store every loaded element under this collection's owner, then swap it
    /// for a proxy. Elements that are already proxies have nothing to write.
    /// A weak collection stores nothing.
    pub fn store(&self, session: &Session) -> Result<()> {
        let (owner, elements) = {
            let state = self.state();
            if state.weak {
                tracing::trace!(class = %state.element_class.name(), "Weak collection has nothing to store");
                return Ok(());
            }
            (state.owner.clone(), state.elements.clone())
        };
        for element in elements.iter().filter(|e| !e.is_proxy()) {
            if let Some(owner) = &owner {
                element.set_owner_ref(session, Some(owner.clone()))?;
            }
            session.store(element)?;
            if session.config().proxy_after_store {
                Proxy::promote(element)?;
            }
        }
        Ok(())
    }

    fn adopt(&self, session: &Session, object: &Object) -> Result<()> {
        let (class, owner) = {
            let state = self.state();
            let owner = if state.weak { None } else { state.owner.clone() };
            (Arc::clone(&state.element_class), owner)
        };
        if !object.class().is_a(class.name()) {
            return Err(Error::InvalidParameters(format!(
                "collection of {} cannot hold {}",
                class.name(),
                object.class_name()
            )));
        }
        if owner.is_some() {
            object.set_owner_ref(session, owner)?;
        }
        Ok(())
    }

    /// Append, setting the element's owner unless the collection is weak.
    /// Nothing is stored.
    pub fn push(&self, session: &Session, object: &Object) -> Result<()> {
        self.adopt(session, object)?;
        self.state_mut().elements.push(object.clone());
        Ok(())
    }

    /// Prepend, setting the element's owner unless the collection is weak.
    /// Nothing is stored.
    pub fn unshift(&self, session: &Session, object: &Object) -> Result<()> {
        self.adopt(session, object)?;
        self.state_mut().elements.insert(0, object.clone());
        Ok(())
    }

    pub fn get(&self, session: &Session, index: usize) -> Result<Option<Object>> {
        self.ensure_loaded(session)?;
        Ok(self.state().elements.get(index).cloned())
    }

    pub fn elements(&self, session: &Session) -> Result<Vec<Object>> {
        self.ensure_loaded(session)?;
        Ok(self.state().elements.clone())
    }

    /// Number of elements, loading membership first if needed.
    pub fn count(&self, session: &Session) -> Result<usize> {
        self.ensure_loaded(session)?;
        Ok(self.state().elements.len())
    }

    fn element_at(&self, index: usize) -> Result<Object> {
        let state = self.state();
        state.elements.get(index).cloned().ok_or_else(|| {
            Error::InvalidParameters(format!(
                "index {} out of range for collection of {} with {} elements",
                index,
                state.element_class.name(),
                state.elements.len()
            ))
        })
    }

    fn forget(&self, object: &Object) {
        self.state_mut().elements.retain(|e| !e.ptr_eq(object));
    }

    /// Delete one element (by index) or all of them, cascading into each.
    pub fn delete(&self, session: &Session, index: Option<usize>) -> Result<()> {
        self.ensure_loaded(session)?;
        let targets = match index {
            Some(i) => vec![self.element_at(i)?],
            None => self.state().elements.clone(),
        };
        for element in &targets {
            cascade::delete_child(session, element)?;
            self.forget(element);
        }
        Ok(())
    }

    /// Revert one element (by index) or all of them.
    ///
    /// Reverting everything detaches elements that were never stored or whose
    /// row is gone, then reloads membership from storage. Proxies hold no
    /// changes and are left unloaded.
    pub fn revert(&self, session: &Session, index: Option<usize>) -> Result<()> {
        if let Some(i) = index {
            self.ensure_loaded(session)?;
            return session.revert(&self.element_at(i)?);
        }

        let elements = self.state().elements.clone();
        for element in elements.iter().filter(|e| !e.is_proxy()) {
            match session.revert(element) {
                Ok(()) => {}
                Err(err) if cascade::is_gone(&err) => {
                    tracing::warn!(
                        id = %element.id(),
                        error = %err,
                        "Detaching collection element missing from storage"
                    );
                    element.set_owner_ref(session, None)?;
                    self.forget(element);
                }
                Err(err) => return Err(err),
            }
        }
        self.load_members(session, false)
    }

    /// Clone one element (by index) or all of them under `new_owner`, into a
    /// new unsaved collection.
    pub fn clone_into(
        &self,
        session: &Session,
        new_owner: &Object,
        index: Option<usize>,
    ) -> Result<Collection> {
        self.ensure_loaded(session)?;
        let sources = match index {
            Some(i) => vec![self.element_at(i)?],
            None => self.state().elements.clone(),
        };
        let owner = OwnerRef {
            class: new_owner.class_name(),
            id: new_owner.id().clone(),
        };
        let copy = Collection::new(self.element_class(), Some(owner), true);
        for source in &sources {
            let clone = session.clone_object(source, Some(new_owner))?;
            copy.state_mut().elements.push(clone);
        }
        Ok(copy)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Collection")
            .field("element_class", &state.element_class.name())
            .field("owner", &state.owner)
            .field("elements", &state.elements)
            .field("loaded", &state.loaded)
            .field("weak", &state.weak)
            .finish()
    }
}
