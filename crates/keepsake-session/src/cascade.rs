//! Store, delete, revert and clone, each walking owned relationships.
//!
//! Weak relationships are never followed. Nothing here holds a slot lock while
//! calling back into the session: record state is snapshotted first.

use crate::collection::Collection;
use crate::object::{Object, ObjectId, OwnerRef, Record, Relation, Slot};
use crate::proxy::Proxy;
use crate::session::Session;
use chrono::Utc;
use keepsake_core::{
    ClassInfo, Criteria, DuplicateError, Error, RelationshipKind, Result, ValidationError, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct Snapshot {
    class: Arc<ClassInfo>,
    from_storage: bool,
    relations: BTreeMap<String, Relation>,
    displaced: Vec<Object>,
}

fn snapshot(session: &Session, object: &Object) -> Result<Snapshot> {
    object.with_record(session, |record| Snapshot {
        class: Arc::clone(&record.class),
        from_storage: record.from_storage,
        relations: record.relations.clone(),
        displaced: record.displaced.clone(),
    })
}

/// Errors meaning the object has no row to go back to.
pub(crate) fn is_gone(err: &Error) -> bool {
    err.is_not_found() || matches!(err, Error::Revert { .. })
}

// ----------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------

#[tracing::instrument(level = "debug", skip_all, fields(class = %object.class_name(), id = %object.id()))]
pub(crate) fn store(session: &Session, object: &Object) -> Result<()> {
    if object.is_proxy() {
        tracing::trace!("Proxy has nothing to store");
        return Ok(());
    }
    let snap = snapshot(session, object)?;
    object.with_record(session, check_record)??;
    if !snap.from_storage && session.config().check_uniqueness {
        check_unique(session, object, &snap.class)?;
    }

    detach_displaced(session, object, &snap)?;
    for rel in snap.class.owned_relationships() {
        match snap.relations.get(&rel.name) {
            Some(Relation::One(Some(child))) if !child.is_proxy() => {
                child.set_owner(session, Some(object))?;
                store(session, child)?;
                if session.config().proxy_after_store {
                    Proxy::promote(child)?;
                }
            }
            Some(Relation::Many(collection)) => collection.store(session)?,
            _ => {}
        }
    }

    let (columns, values) = object.with_record(session, |record| row_values(object.id(), record))??;
    let table = snap.class.table();
    if snap.from_storage {
        let affected = session.storage().update(
            table,
            "id",
            &object.id().to_value(),
            &columns[1..],
            &values[1..],
        )?;
        if affected == 0 {
            return Err(Error::not_found(
                snap.class.name(),
                format!("id = {}", object.id()),
            ));
        }
        tracing::debug!("Updated row");
    } else {
        session.storage().insert(table, &columns, &values)?;
        tracing::debug!("Inserted row");
    }
    object.with_record_mut(session, |record| record.from_storage = true)
}

/// Release owned children that were replaced or cleared since the last
/// write: their owner is cleared and, if they have a row, written back.
///
/// A child that has since been attached elsewhere, or put back, is left alone.
fn detach_displaced(session: &Session, object: &Object, snap: &Snapshot) -> Result<()> {
    for child in &snap.displaced {
        let reattached = snap
            .relations
            .values()
            .any(|r| matches!(r, Relation::One(Some(current)) if current.ptr_eq(child)));
        if reattached {
            continue;
        }
        let owner = match child.owner_ref(session) {
            Ok(owner) => owner,
            Err(e) if is_gone(&e) => {
                tracing::debug!(child = %child.id(), "Displaced child already gone from storage");
                continue;
            }
            Err(e) => return Err(e),
        };
        if owner.is_none_or(|o| &o.id != object.id()) {
            continue;
        }
        child.set_owner_ref(session, None)?;
        if !child.is_transient() {
            store(session, child)?;
        }
        tracing::debug!(child = %child.id(), "Detached displaced child");
    }
    object.with_record_mut(session, |record| {
        record
            .displaced
            .retain(|d| !snap.displaced.iter().any(|done| done.ptr_eq(d)));
    })
}

/// Field-level checks run before anything is written.
fn check_record(record: &Record) -> Result<()> {
    let class = &record.class;
    let mut errors = ValidationError::new();
    for field in class.fields() {
        let Some(value) = record.values.get(&field.name) else {
            continue;
        };
        match field.sql_type.deflate(value) {
            Ok(_) => {}
            Err(found @ "ARRAY") => {
                return Err(Error::StoreReference {
                    class: class.name().to_string(),
                    field: field.name.clone(),
                    found,
                });
            }
            Err(found) => errors.add_type(&field.name, field.sql_type.sql_name(), found),
        }
    }
    if let Err(e) = class.validate(record) {
        errors.extend(e);
    }
    errors.into_result().map_err(Error::Validation)
}

fn check_unique(session: &Session, object: &Object, class: &Arc<ClassInfo>) -> Result<()> {
    'keys: for key in class.unique_keys() {
        let mut criteria = Criteria::new();
        for field in key {
            let value = object.get(session, field)?;
            if value.is_null() {
                continue 'keys;
            }
            criteria = criteria.eq(field.as_str(), value);
        }
        let clash = session
            .select_ids(class, &criteria, &[], Some(2))?
            .into_iter()
            .find(|(_, id)| id != object.id());
        if let Some((_, existing)) = clash {
            return Err(Error::Duplicate(DuplicateError {
                class: class.name().to_string(),
                fields: key.clone(),
                existing_id: existing.to_string(),
            }));
        }
    }
    Ok(())
}

/// Column names and values in the class's column order, `id` first.
fn row_values(id: &ObjectId, record: &Record) -> Result<(Vec<String>, Vec<Value>)> {
    let class = &record.class;
    let columns = class.columns().to_vec();
    let mut values = Vec::with_capacity(columns.len());
    for column in &columns {
        let value = match column.as_str() {
            "id" => id.to_value(),
            "owner_class" => record
                .owner
                .as_ref()
                .map_or(Value::Null, |o| Value::Text(o.class.clone())),
            "owner_id" => record.owner.as_ref().map_or(Value::Null, |o| o.id.to_value()),
            "created_at" => Value::TimestampTz(record.created_at.timestamp_micros()),
            name => match class.field(name) {
                Some(field) => {
                    let value = record.values.get(name).cloned().unwrap_or_default();
                    field.sql_type.deflate(&value).map_err(|found| Error::StoreReference {
                        class: class.name().to_string(),
                        field: name.to_string(),
                        found,
                    })?;
                    value
                }
                None => match record.relations.get(name) {
                    Some(Relation::One(Some(child))) => child.id().to_value(),
                    Some(Relation::Many(list)) => Value::Json(
                        list.element_ids()
                            .iter()
                            .map(|id| serde_json::Value::from(id.as_str()))
                            .collect(),
                    ),
                    _ => Value::Null,
                },
            },
        };
        values.push(value);
    }
    Ok((columns, values))
}

// ----------------------------------------------------------------------
// Delete
// ----------------------------------------------------------------------

#[tracing::instrument(level = "debug", skip_all, fields(class = %object.class_name(), id = %object.id()))]
pub(crate) fn delete(session: &Session, object: &Object) -> Result<()> {
    let snap = snapshot(session, object)?;
    if !snap.from_storage {
        return Err(never_stored(&snap.class, object));
    }

    detach_displaced(session, object, &snap)?;
    for rel in snap.class.owned_relationships() {
        match snap.relations.get(&rel.name) {
            Some(Relation::One(Some(child))) => delete_child(session, child)?,
            Some(Relation::Deferred) => {
                if let Some(child) = object.related(session, &rel.name)? {
                    delete_child(session, &child)?;
                }
            }
            Some(Relation::Many(collection)) => collection.delete(session, None)?,
            _ => {}
        }
    }
    delete_row(session, object, &snap.class)
}

pub(crate) fn delete_this(session: &Session, object: &Object) -> Result<()> {
    let snap = snapshot(session, object)?;
    if !snap.from_storage {
        return Err(never_stored(&snap.class, object));
    }
    delete_row(session, object, &snap.class)
}

/// Delete an owned child as part of a parent's cascade.
///
/// Unsaved children have nothing to delete. A proxied child whose row is
/// already gone is skipped.
pub(crate) fn delete_child(session: &Session, child: &Object) -> Result<()> {
    if child.is_transient() {
        tracing::trace!(id = %child.id(), "Skipping unsaved child");
        return Ok(());
    }
    match delete(session, child) {
        Err(e) if e.is_not_found() && child.is_proxy() => {
            tracing::warn!(id = %child.id(), error = %e, "Owned child already gone from storage");
            Ok(())
        }
        other => other,
    }
}

fn delete_row(session: &Session, object: &Object, class: &ClassInfo) -> Result<()> {
    let affected = session
        .storage()
        .delete(class.table(), "id", &object.id().to_value())?;
    if affected == 0 {
        tracing::warn!("No row deleted");
    } else {
        tracing::debug!("Deleted row");
    }
    object.with_record_mut(session, |record| record.from_storage = false)
}

fn never_stored(class: &ClassInfo, object: &Object) -> Error {
    Error::not_found(class.name(), format!("id = {} (never stored)", object.id()))
}

// ----------------------------------------------------------------------
// Revert
// ----------------------------------------------------------------------

#[tracing::instrument(level = "debug", skip_all, fields(class = %object.class_name(), id = %object.id()))]
pub(crate) fn revert(session: &Session, object: &Object) -> Result<()> {
    if object.is_proxy() {
        return Proxy::load(session, object).map_err(|e| match e {
            Error::Proxy(p) => Error::not_found(p.class, format!("id = {}", p.id)),
            other => other,
        });
    }

    let snap = snapshot(session, object)?;
    if !snap.from_storage {
        return Err(Error::Revert {
            class: snap.class.name().to_string(),
            id: object.id().to_string(),
        });
    }

    let mut gone = BTreeSet::new();
    for rel in snap.class.owned_relationships() {
        match snap.relations.get(&rel.name) {
            Some(Relation::One(Some(child))) if !child.is_proxy() => match revert(session, child) {
                Ok(()) => {}
                Err(e) if is_gone(&e) => {
                    tracing::warn!(
                        relationship = %rel.name,
                        child = %child.id(),
                        error = %e,
                        "Dropping reference to child missing from storage"
                    );
                    gone.insert((rel.name.clone(), child.id().clone()));
                }
                Err(e) => return Err(e),
            },
            Some(Relation::Many(collection)) => collection.revert(session, None)?,
            _ => {}
        }
    }

    let Some((actual, row)) = session.fetch_row(&snap.class, object.id())? else {
        return Err(Error::not_found(
            snap.class.name(),
            format!("id = {}", object.id()),
        ));
    };
    let mut record = session.record_from_row(&actual, &row)?;
    for (name, relation) in &mut record.relations {
        let replacement = match (&*relation, snap.relations.get(name)) {
            (Relation::Many(_), Some(Relation::Many(existing))) if !snap.class.is_weak(name) => {
                Some(Relation::Many(existing.clone()))
            }
            (Relation::One(Some(child)), _)
                if gone.contains(&(name.clone(), child.id().clone())) =>
            {
                Some(Relation::One(None))
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *relation = replacement;
        }
    }

    *object.write_slot() = Slot::Loaded(record);
    session.cache().replace(object);
    tracing::debug!("Reverted from storage");
    Ok(())
}

// ----------------------------------------------------------------------
// Clone
// ----------------------------------------------------------------------

/// Deep copy of `source` under a fresh id, parents before children.
#[tracing::instrument(level = "debug", skip_all, fields(class = %source.class_name(), id = %source.id()))]
pub(crate) fn clone_object(
    session: &Session,
    source: &Object,
    new_owner: Option<&Object>,
) -> Result<Object> {
    let original = source.with_record(session, Record::clone)?;
    let class = Arc::clone(&original.class);
    let id = ObjectId::generate();
    let owner = match new_owner {
        Some(o) => Some(OwnerRef {
            class: o.class_name(),
            id: o.id().clone(),
        }),
        None => original.owner.clone(),
    };

    let mut relations = BTreeMap::new();
    for rel in class.relationships() {
        let relation = if rel.weak {
            match original.relations.get(&rel.name) {
                Some(Relation::Many(list)) => Relation::Many(list.share_with(OwnerRef {
                    class: class.name().to_string(),
                    id: id.clone(),
                })),
                Some(shared) => shared.clone(),
                None => continue,
            }
        } else if rel.kind == RelationshipKind::HasMany {
            Relation::Many(Collection::new(
                session.registry().class(&rel.target)?,
                Some(OwnerRef {
                    class: class.name().to_string(),
                    id: id.clone(),
                }),
                true,
            ))
        } else {
            Relation::One(None)
        };
        relations.insert(rel.name.clone(), relation);
    }

    let record = Record {
        class: Arc::clone(&class),
        values: original.values.clone(),
        relations,
        owner,
        from_storage: false,
        created_at: Utc::now(),
        displaced: Vec::new(),
    };
    let clone = session.register(&Object::new_loaded(id, record))?;
    tracing::debug!(clone = %clone.id(), "Cloned object");

    for rel in class.owned_relationships() {
        let copied = match original.relations.get(&rel.name) {
            Some(Relation::One(Some(child))) => {
                Relation::One(Some(clone_object(session, child, Some(&clone))?))
            }
            Some(Relation::Deferred) => match source.related(session, &rel.name)? {
                Some(child) => Relation::One(Some(clone_object(session, &child, Some(&clone))?)),
                None => Relation::One(None),
            },
            Some(Relation::Many(collection)) => {
                Relation::Many(collection.clone_into(session, &clone, None)?)
            }
            _ => continue,
        };
        clone.with_record_mut(session, |record| {
            record.relations.insert(rel.name.clone(), copied);
        })?;
    }
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{ClassDef, ClassRegistry, FieldInfo, MemoryStorage, SqlType};

    fn session() -> (Session, Arc<MemoryStorage>) {
        let mut registry = ClassRegistry::new();
        registry
            .register(
                ClassDef::new("Page")
                    .field(FieldInfo::new("title", SqlType::Text))
                    .field(FieldInfo::new("tags", SqlType::Json).nullable(true))
                    .has_one("body", "Body")
                    .has_many("comments", "Comment")
                    .weak_has_one("author", "Author"),
            )
            .unwrap();
        registry
            .register(ClassDef::new("Body").field(FieldInfo::new("text", SqlType::Text)))
            .unwrap();
        registry
            .register(ClassDef::new("Comment").field(FieldInfo::new("text", SqlType::Text)))
            .unwrap();
        registry
            .register(ClassDef::new("Author").field(FieldInfo::new("name", SqlType::Text)))
            .unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let session = Session::new(storage.clone(), Arc::new(registry)).unwrap();
        (session, storage)
    }

    fn page(session: &Session) -> Object {
        let page = session.create_with("Page", [("title", "Home")]).unwrap();
        let body = session.create_with("Body", [("text", "hello")]).unwrap();
        page.set_related(session, "body", Some(&body)).unwrap();
        page
    }

    #[test]
    fn array_field_is_a_store_reference_error() {
        let (session, storage) = session();
        let page = page(&session);
        page.set(&session, "tags", Value::Array(vec![Value::from("a")]))
            .unwrap();
        let err = session.store(&page).unwrap_err();
        assert!(matches!(err, Error::StoreReference { ref field, .. } if field == "tags"));
        assert_eq!(storage.stats().inserts, 0);
    }

    #[test]
    fn type_mismatch_is_a_validation_error() {
        let (session, _) = session();
        let page = page(&session);
        page.set(&session, "title", 5_i64).unwrap();
        let err = session.store(&page).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn delete_of_unsaved_object_is_not_found() {
        let (session, _) = session();
        let page = page(&session);
        assert!(session.delete(&page).unwrap_err().is_not_found());
    }

    #[test]
    fn revert_of_unsaved_object_fails() {
        let (session, _) = session();
        let page = page(&session);
        assert!(matches!(session.revert(&page), Err(Error::Revert { .. })));
    }

    #[test]
    fn delete_skips_unsaved_children() {
        let (session, storage) = session();
        let page = page(&session);
        session.store(&page).unwrap();

        let extra = session.create_with("Comment", [("text", "draft")]).unwrap();
        page.collection(&session, "comments")
            .unwrap()
            .push(&session, &extra)
            .unwrap();
        session.delete(&page).unwrap();
        assert_eq!(storage.row_count("page"), 0);
        assert_eq!(storage.row_count("body"), 0);
    }

    #[test]
    fn delete_this_leaves_children() {
        let (session, storage) = session();
        let page = page(&session);
        session.store(&page).unwrap();
        session.delete_this(&page).unwrap();
        assert_eq!(storage.row_count("page"), 0);
        assert_eq!(storage.row_count("body"), 1);
    }

    #[test]
    fn update_of_vanished_row_is_not_found() {
        let (session, storage) = session();
        let page = page(&session);
        session.store(&page).unwrap();
        storage.clear();
        page.set(&session, "title", "Changed").unwrap();
        assert!(session.store(&page).unwrap_err().is_not_found());
    }

    #[test]
    fn clone_copies_fields_under_new_id() {
        let (session, _) = session();
        let page = page(&session);
        let author = session.create_with("Author", [("name", "Ann")]).unwrap();
        page.set_related(&session, "author", Some(&author)).unwrap();

        let copy = session.clone_object(&page, None).unwrap();
        assert_ne!(copy.id(), page.id());
        assert_eq!(copy.get(&session, "title").unwrap(), Value::from("Home"));
        assert!(!copy.from_storage(&session).unwrap());

        let body = page.related(&session, "body").unwrap().unwrap();
        let copied_body = copy.related(&session, "body").unwrap().unwrap();
        assert!(!copied_body.ptr_eq(&body));
        assert_eq!(
            copied_body.owner_ref(&session).unwrap().unwrap().id,
            copy.id().clone()
        );

        let shared = copy.related(&session, "author").unwrap().unwrap();
        assert!(shared.ptr_eq(&author));
    }
}
