//! Identity cache: one live instance per object id.
//!
//! Entries are held weakly, so the cache never keeps an object alive on its
//! own. Every path that hands out an [`Object`] (proxy creation, row
//! materialization, loading) funnels through [`IdentityCache::store`].
//!
//! Lock order is cache map, then object slot. Nothing in this crate calls into
//! the cache while holding a slot lock.

use crate::object::{Object, ObjectId, ObjectInner, Slot};
use keepsake_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

#[derive(Default)]
struct Entries {
    map: HashMap<ObjectId, Weak<ObjectInner>>,
    inserts_since_compact: usize,
}

/// Weak map from object id to the single live instance for that id.
pub struct IdentityCache {
    entries: Mutex<Entries>,
    compact_every: Option<usize>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::with_compaction(None)
    }

    /// Drop decayed entries automatically after every `every` insertions.
    pub fn with_compaction(every: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            compact_every: every.filter(|n| *n > 0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live object for `id`, if any holder still keeps it reachable.
    pub fn get(&self, id: &ObjectId) -> Option<Object> {
        self.lock().map.get(id).and_then(Object::upgrade)
    }

    /// Register `object`, returning the instance callers must use from now on.
    ///
    /// - no live entry: `object` is registered and returned
    /// - the entry is `object` itself: no-op
    /// - `object` is a proxy: the existing entry wins
    /// - the entry is a proxy and `object` is loaded: the proxy's slot takes a
    ///   copy of `object`'s record in place and the proxy's handle is returned
    /// - both are loaded and distinct: [`Error::DuplicateIdentity`]
    pub fn store(&self, object: &Object) -> Result<Object> {
        let mut entries = self.lock();
        let existing = entries.map.get(object.id()).and_then(Object::upgrade);
        let Some(existing) = existing else {
            entries.map.insert(object.id().clone(), object.downgrade());
            entries.inserts_since_compact += 1;
            if let Some(every) = self.compact_every {
                if entries.inserts_since_compact >= every {
                    let removed = compact_entries(&mut entries);
                    tracing::trace!(removed, "Compacted identity cache");
                }
            }
            return Ok(object.clone());
        };

        if existing.ptr_eq(object) {
            return Ok(existing);
        }

        let incoming = match &*object.read_slot() {
            Slot::Proxy { .. } => return Ok(existing),
            Slot::Loaded(record) => record.clone(),
        };

        let mut slot = existing.write_slot();
        match &*slot {
            Slot::Proxy { .. } => {
                tracing::debug!(
                    id = %object.id(),
                    class = %incoming.class.name(),
                    "Promoting cached proxy in place"
                );
                *slot = Slot::Loaded(incoming);
                drop(slot);
                Ok(existing)
            }
            Slot::Loaded(_) => Err(Error::DuplicateIdentity {
                id: object.id().to_string(),
            }),
        }
    }

    /// Make `object` the entry for its id, whatever was there before.
    pub(crate) fn replace(&self, object: &Object) {
        let mut entries = self.lock();
        let previous = entries
            .map
            .insert(object.id().clone(), object.downgrade());
        if previous
            .and_then(|weak| Object::upgrade(&weak))
            .is_some_and(|old| !old.ptr_eq(object))
        {
            tracing::debug!(id = %object.id(), "Replaced stale identity cache entry");
        }
    }

    /// Remove `object`'s entry. Fails unless the entry is `object` itself.
    pub fn remove(&self, object: &Object) -> Result<()> {
        let mut entries = self.lock();
        let held = entries
            .map
            .get(object.id())
            .and_then(Object::upgrade)
            .is_some_and(|entry| entry.ptr_eq(object));
        if !held {
            return Err(Error::NotStored {
                id: object.id().to_string(),
            });
        }
        entries.map.remove(object.id());
        Ok(())
    }

    /// Ids of all still-live entries.
    ///
    /// Liveness is checked as the iterator advances. Decayed entries are
    /// skipped, not removed.
    pub fn all(&self) -> impl Iterator<Item = ObjectId> {
        let snapshot: Vec<(ObjectId, Weak<ObjectInner>)> = self
            .lock()
            .map
            .iter()
            .map(|(id, weak)| (id.clone(), weak.clone()))
            .collect();
        snapshot
            .into_iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id)
    }

    /// Drop decayed entries. Returns how many were removed.
    pub fn compact(&self) -> usize {
        compact_entries(&mut self.lock())
    }

    /// Forget every entry, live or not.
    ///
    /// Outstanding handles keep working but are no longer the canonical
    /// instance for their id, so a later load produces a second instance.
    /// Only for controlled teardown such as between test cases.
    pub fn reset_all(&self) -> usize {
        let mut entries = self.lock();
        let live = entries
            .map
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count();
        if live > 0 {
            tracing::warn!(live, "Resetting identity cache with live objects");
        }
        let cleared = entries.map.len();
        entries.map.clear();
        entries.inserts_since_compact = 0;
        cleared
    }

    /// Turn every loaded, stored object in the cache back into a proxy,
    /// releasing its fields. Returns how many objects were demoted.
    pub fn proxy_all(&self) -> usize {
        let live: Vec<Object> = self
            .lock()
            .map
            .values()
            .filter_map(Object::upgrade)
            .collect();
        let demoted = live.iter().filter(|object| object.demote()).count();
        tracing::debug!(demoted, live = live.len(), "Proxied all cached objects");
        demoted
    }

    /// Number of entries, including decayed ones not yet compacted.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

fn compact_entries(entries: &mut Entries) -> usize {
    let before = entries.map.len();
    entries.map.retain(|_, weak| weak.strong_count() > 0);
    entries.inserts_since_compact = 0;
    before - entries.map.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Record;
    use chrono::Utc;
    use keepsake_core::{ClassDef, ClassInfo, ClassRegistry, FieldInfo, SqlType, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn hero_class() -> Arc<ClassInfo> {
        let mut registry = ClassRegistry::new();
        registry
            .register(ClassDef::new("Hero").field(FieldInfo::new("name", SqlType::Text)))
            .unwrap()
    }

    fn record(class: &Arc<ClassInfo>, name: &str, from_storage: bool) -> Record {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), Value::from(name));
        Record {
            class: Arc::clone(class),
            values,
            relations: BTreeMap::new(),
            owner: None,
            from_storage,
            created_at: Utc::now(),
            displaced: Vec::new(),
        }
    }

    fn id(s: &str) -> ObjectId {
        ObjectId::new(s).unwrap()
    }

    fn name_of(object: &Object) -> Option<Value> {
        match &*object.read_slot() {
            Slot::Loaded(r) => r.values.get("name").cloned(),
            Slot::Proxy { .. } => None,
        }
    }

    #[test]
    fn store_then_get_returns_same_instance() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let hero = Object::new_loaded(id("1"), record(&class, "Ann", true));

        let stored = cache.store(&hero).unwrap();
        assert!(stored.ptr_eq(&hero));
        assert!(cache.store(&hero).unwrap().ptr_eq(&hero));
        assert!(cache.get(&id("1")).unwrap().ptr_eq(&hero));
    }

    #[test]
    fn proxy_over_real_returns_real() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let real = Object::new_loaded(id("42"), record(&class, "Ann", true));
        let proxy = Object::new_proxy(id("42"), Arc::clone(&class));

        let first = cache.store(&real).unwrap();
        let second = cache.store(&proxy).unwrap();
        assert!(first.ptr_eq(&real));
        assert!(second.ptr_eq(&real));
        let cached = cache.get(&id("42")).unwrap();
        assert!(cached.ptr_eq(&real));
        assert!(!cached.is_proxy());
    }

    #[test]
    fn real_over_proxy_promotes_in_place() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let proxy = Object::new_proxy(id("7"), Arc::clone(&class));
        let holder = proxy.clone();
        cache.store(&proxy).unwrap();

        let real = Object::new_loaded(id("7"), record(&class, "Bob", true));
        let result = cache.store(&real).unwrap();
        assert!(result.ptr_eq(&proxy));
        assert!(!holder.is_proxy());
        assert_eq!(name_of(&holder), Some(Value::from("Bob")));
    }

    #[test]
    fn two_real_objects_conflict() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let a = Object::new_loaded(id("9"), record(&class, "A", true));
        let b = Object::new_loaded(id("9"), record(&class, "B", true));
        cache.store(&a).unwrap();
        let err = cache.store(&b).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity { .. }));
        assert!(err.is_programming_error());
    }

    #[test]
    fn remove_requires_identical_entry() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let a = Object::new_loaded(id("5"), record(&class, "A", true));
        let b = Object::new_loaded(id("5"), record(&class, "B", true));
        cache.store(&a).unwrap();

        assert!(matches!(cache.remove(&b), Err(Error::NotStored { .. })));
        cache.remove(&a).unwrap();
        assert!(cache.get(&id("5")).is_none());
        assert!(matches!(cache.remove(&a), Err(Error::NotStored { .. })));
    }

    #[test]
    fn dropped_objects_decay_and_compact() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let kept = Object::new_loaded(id("k"), record(&class, "K", true));
        cache.store(&kept).unwrap();
        {
            let gone = Object::new_loaded(id("g"), record(&class, "G", true));
            cache.store(&gone).unwrap();
        }

        assert!(cache.get(&id("g")).is_none());
        let live: Vec<ObjectId> = cache.all().collect();
        assert_eq!(live, vec![id("k")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.compact(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn automatic_compaction() {
        let class = hero_class();
        let cache = IdentityCache::with_compaction(Some(2));
        for i in 0..4 {
            let temp = Object::new_loaded(id(&i.to_string()), record(&class, "T", true));
            cache.store(&temp).unwrap();
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn reset_all_forgets_live_entries() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let a = Object::new_loaded(id("a"), record(&class, "A", true));
        cache.store(&a).unwrap();
        assert_eq!(cache.reset_all(), 1);
        assert!(cache.is_empty());
        assert!(cache.get(&id("a")).is_none());
    }

    #[test]
    fn proxy_all_demotes_only_stored_objects() {
        let class = hero_class();
        let cache = IdentityCache::new();
        let stored = Object::new_loaded(id("s"), record(&class, "S", true));
        let transient = Object::new_loaded(id("t"), record(&class, "T", false));
        cache.store(&stored).unwrap();
        cache.store(&transient).unwrap();

        assert_eq!(cache.proxy_all(), 1);
        assert!(stored.is_proxy());
        assert!(!transient.is_proxy());
    }
}
