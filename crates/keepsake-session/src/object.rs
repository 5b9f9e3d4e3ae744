//! Persistent objects and the shared handle every holder sees.
//!
//! An [`Object`] is a cheap clone of one shared slot. The slot is either a
//! proxy (class and id only) or a loaded [`Record`]. Loading a proxy and
//! turning a record back into a proxy both rewrite the slot in place, so every
//! clone of the handle observes the change.
//!
//! Identity accessors (`id`, `class_name`, `is_proxy`, `ptr_eq`) never touch
//! storage. Everything else takes the [`Session`] and resolves the proxy first.

use crate::collection::Collection;
use crate::proxy::Proxy;
use crate::session::Session;
use chrono::{DateTime, Utc};
use keepsake_core::{ClassInfo, Error, FieldSource, ProxyError, RelationshipKind, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Globally unique, immutable object identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// A fresh time-ordered UUID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().hyphenated().to_string())
    }

    /// Wrap an existing identifier. Empty ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidParameters("object id must not be empty".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Text(self.0.clone())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An owner back-reference, held by value so children never keep parents alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub class: String,
    pub id: ObjectId,
}

/// A relationship slot on a loaded record.
#[derive(Clone)]
pub(crate) enum Relation {
    /// has-one, or a might-have that has been looked up.
    One(Option<Object>),
    /// A might-have not yet looked up.
    Deferred,
    Many(Collection),
}

/// The field set of a loaded object.
#[derive(Clone)]
pub(crate) struct Record {
    pub(crate) class: Arc<ClassInfo>,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) relations: BTreeMap<String, Relation>,
    pub(crate) owner: Option<OwnerRef>,
    pub(crate) from_storage: bool,
    pub(crate) created_at: DateTime<Utc>,
    /// Owned children replaced or cleared since the last store.
    pub(crate) displaced: Vec<Object>,
}

impl FieldSource for Record {
    fn class_name(&self) -> &str {
        self.class.name()
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

pub(crate) enum Slot {
    Proxy { class: Arc<ClassInfo> },
    Loaded(Record),
}

pub(crate) struct ObjectInner {
    id: ObjectId,
    slot: RwLock<Slot>,
}

/// Shared handle to a persistent object or its proxy.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    pub(crate) fn new_proxy(id: ObjectId, class: Arc<ClassInfo>) -> Self {
        Self::with_slot(id, Slot::Proxy { class })
    }

    pub(crate) fn new_loaded(id: ObjectId, record: Record) -> Self {
        Self::with_slot(id, Slot::Loaded(record))
    }

    fn with_slot(id: ObjectId, slot: Slot) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id,
                slot: RwLock::new(slot),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ObjectInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.inner.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.inner.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &ObjectId {
        &self.inner.id
    }

    /// Class currently known for this object. For an unloaded proxy this is the
    /// class it was created for, which may be an ancestor of the stored class.
    pub fn class(&self) -> Arc<ClassInfo> {
        match &*self.read_slot() {
            Slot::Proxy { class } => Arc::clone(class),
            Slot::Loaded(record) => Arc::clone(&record.class),
        }
    }

    pub fn class_name(&self) -> String {
        self.class().name().to_string()
    }

    pub fn is_proxy(&self) -> bool {
        matches!(&*self.read_slot(), Slot::Proxy { .. })
    }

    /// Same underlying instance?
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Loaded and never stored. Never touches storage.
    pub(crate) fn is_transient(&self) -> bool {
        match &*self.read_slot() {
            Slot::Proxy { .. } => false,
            Slot::Loaded(record) => !record.from_storage,
        }
    }

    /// Swap a stored record for a proxy in place. Returns whether it changed.
    pub(crate) fn demote(&self) -> bool {
        let mut slot = self.write_slot();
        let class = match &*slot {
            Slot::Loaded(record) if record.from_storage => Arc::clone(&record.class),
            _ => return false,
        };
        *slot = Slot::Proxy { class };
        true
    }

    /// Resolve, then read the record.
    pub(crate) fn with_record<R>(
        &self,
        session: &Session,
        f: impl FnOnce(&Record) -> R,
    ) -> Result<R> {
        Proxy::load(session, self)?;
        match &*self.read_slot() {
            Slot::Loaded(record) => Ok(f(record)),
            Slot::Proxy { class } => Err(self.unresolved(class)),
        }
    }

    /// Resolve, then mutate the record.
    pub(crate) fn with_record_mut<R>(
        &self,
        session: &Session,
        f: impl FnOnce(&mut Record) -> R,
    ) -> Result<R> {
        Proxy::load(session, self)?;
        match &mut *self.write_slot() {
            Slot::Loaded(record) => Ok(f(record)),
            Slot::Proxy { class } => Err(self.unresolved(class)),
        }
    }

    /// Another thread turned the object back into a proxy between our load
    /// and our lock.
    fn unresolved(&self, class: &ClassInfo) -> Error {
        Error::Proxy(ProxyError {
            class: class.name().to_string(),
            id: self.id().to_string(),
            message: "object was turned back into a proxy while being accessed".to_string(),
        })
    }

    /// Read a scalar field.
    pub fn get(&self, session: &Session, field: &str) -> Result<Value> {
        self.with_record(session, |record| match record.values.get(field) {
            Some(value) => Ok(value.clone()),
            None => Err(undefined(record, field)),
        })?
    }

    /// Assign a scalar field. Nothing is written until the object is stored.
    pub fn set(&self, session: &Session, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_record_mut(session, |record| match record.values.get_mut(field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(undefined(record, field)),
        })?
    }

    /// Current child of a has-one or might-have relationship.
    ///
    /// A might-have is looked up in storage the first time it is read.
    pub fn related(&self, session: &Session, name: &str) -> Result<Option<Object>> {
        let current = self.with_record(session, |record| match record.relations.get(name) {
            Some(Relation::One(child)) => Ok(Some(child.clone())),
            Some(Relation::Deferred) => Ok(None),
            Some(Relation::Many(_)) => Err(Error::InvalidParameters(format!(
                "{}.{} is a has-many relationship; use collection()",
                record.class.name(),
                name
            ))),
            None => Err(undefined(record, name)),
        })??;
        if let Some(child) = current {
            return Ok(child);
        }

        let class = self.class();
        let Some(rel) = class.relationship(name) else {
            return Err(Error::method(class.name(), name));
        };
        let target = session.registry().class(&rel.target)?;
        let found = session.find_owned(&target, self.id())?;
        self.with_record_mut(session, |record| {
            let slot = record
                .relations
                .entry(name.to_string())
                .or_insert(Relation::Deferred);
            if matches!(slot, Relation::Deferred) {
                *slot = Relation::One(found);
            }
            match slot {
                Relation::One(child) => child.clone(),
                _ => None,
            }
        })
    }

    /// Attach a child to a has-one or might-have relationship.
    ///
    /// Unless the relationship is weak the child's owner becomes this object,
    /// and the child it replaces is detached from this object on the next
    /// store or delete.
    pub fn set_related(&self, session: &Session, name: &str, child: Option<&Object>) -> Result<()> {
        let class = self.with_record(session, |record| Arc::clone(&record.class))?;
        let Some(rel) = class.relationship(name) else {
            return Err(Error::method(class.name(), name));
        };
        if rel.kind == RelationshipKind::HasMany {
            return Err(Error::InvalidParameters(format!(
                "{}.{} is a has-many relationship; use collection()",
                class.name(),
                name
            )));
        }
        if let Some(child) = child {
            let child_class = child.class();
            let target = session.registry().class(&rel.target)?;
            if !child_class.is_a(target.name()) && !target.is_a(child_class.name()) {
                return Err(Error::InvalidParameters(format!(
                    "{}.{} expects {}, got {}",
                    class.name(),
                    name,
                    rel.target,
                    child_class.name()
                )));
            }
        }
        let mut previous = None;
        if !rel.weak {
            previous = self
                .related(session, name)?
                .filter(|old| !child.is_some_and(|new| new.ptr_eq(old)));
            if let Some(child) = child {
                child.set_owner(session, Some(self))?;
            }
        }
        self.with_record_mut(session, |record| {
            record
                .relations
                .insert(name.to_string(), Relation::One(child.cloned()));
            let fresh = previous.filter(|old| !record.displaced.iter().any(|d| d.ptr_eq(old)));
            record.displaced.extend(fresh);
        })
    }

    /// The collection behind a has-many relationship.
    pub fn collection(&self, session: &Session, name: &str) -> Result<Collection> {
        self.with_record(session, |record| match record.relations.get(name) {
            Some(Relation::Many(collection)) => Ok(collection.clone()),
            Some(_) => Err(Error::InvalidParameters(format!(
                "{}.{} is not a has-many relationship",
                record.class.name(),
                name
            ))),
            None => Err(undefined(record, name)),
        })?
    }

    /// The owner, as the live instance if one is cached, otherwise a proxy.
    pub fn owner(&self, session: &Session) -> Result<Option<Object>> {
        match self.owner_ref(session)? {
            Some(owner) => Proxy::create(session, &owner.class, owner.id.as_str()).map(Some),
            None => Ok(None),
        }
    }

    pub fn owner_ref(&self, session: &Session) -> Result<Option<OwnerRef>> {
        self.with_record(session, |record| record.owner.clone())
    }

    pub fn set_owner(&self, session: &Session, owner: Option<&Object>) -> Result<()> {
        let owner = owner.map(|o| OwnerRef {
            class: o.class_name(),
            id: o.id().clone(),
        });
        self.set_owner_ref(session, owner)
    }

    pub(crate) fn set_owner_ref(&self, session: &Session, owner: Option<OwnerRef>) -> Result<()> {
        self.with_record_mut(session, |record| record.owner = owner)
    }

    /// Does this object have a row in storage?
    pub fn from_storage(&self, session: &Session) -> Result<bool> {
        self.with_record(session, |record| record.from_storage)
    }

    pub fn created_at(&self, session: &Session) -> Result<DateTime<Utc>> {
        self.with_record(session, |record| record.created_at)
    }

    /// Shallow JSON snapshot: scalar fields by value, relationships by id.
    pub fn to_json(&self, session: &Session) -> Result<serde_json::Value> {
        let (class, values, owner, created_at) = self.with_record(session, |record| {
            (
                Arc::clone(&record.class),
                record.values.clone(),
                record.owner.clone(),
                record.created_at,
            )
        })?;

        let mut map = serde_json::Map::new();
        map.insert("class".to_string(), class.name().into());
        map.insert("id".to_string(), self.id().as_str().into());
        map.insert("owner".to_string(), serde_json::to_value(owner)?);
        map.insert("created_at".to_string(), created_at.to_rfc3339().into());
        for field in class.fields() {
            let value = values.get(&field.name).cloned().unwrap_or_default();
            map.insert(field.name.clone(), value_to_json(&value));
        }
        for rel in class.relationships() {
            let json = match rel.kind {
                RelationshipKind::HasMany => {
                    let ids: Vec<serde_json::Value> = self
                        .collection(session, &rel.name)?
                        .elements(session)?
                        .iter()
                        .map(|o| o.id().as_str().into())
                        .collect();
                    serde_json::Value::Array(ids)
                }
                RelationshipKind::HasOne | RelationshipKind::MightHave => self
                    .related(session, &rel.name)?
                    .map_or(serde_json::Value::Null, |o| o.id().as_str().into()),
            };
            map.insert(rel.name.clone(), json);
        }
        Ok(serde_json::Value::Object(map))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, proxy) = match &*self.read_slot() {
            Slot::Proxy { class } => (class.name().to_string(), true),
            Slot::Loaded(record) => (record.class.name().to_string(), false),
        };
        f.debug_struct("Object")
            .field("class", &class)
            .field("id", &self.inner.id)
            .field("proxy", &proxy)
            .finish()
    }
}

/// The error for touching a name the class does not declare as a field.
fn undefined(record: &Record, name: &str) -> Error {
    match record.class.relationship(name) {
        Some(rel) => Error::InvalidParameters(format!(
            "{}.{} is a {} relationship, not a field",
            record.class.name(),
            name,
            rel.kind.label()
        )),
        None => Error::method(record.class.name(), name),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::BigInt(i) | Value::TimestampTz(i) => (*i).into(),
        Value::Double(d) => (*d).into(),
        Value::Text(s) => s.clone().into(),
        Value::Bytes(b) => b.iter().map(|x| serde_json::Value::from(*x)).collect(),
        Value::Uuid(u) => uuid::Uuid::from_bytes(*u).hyphenated().to_string().into(),
        Value::Json(j) => j.clone(),
        Value::Array(items) => items.iter().map(value_to_json).collect(),
    }
}
