//! The session: storage, class metadata and identity cache threaded through
//! every operation.

use crate::cascade;
use crate::collection::Collection;
use crate::config::SessionConfig;
use crate::identity_cache::IdentityCache;
use crate::object::{Object, ObjectId, OwnerRef, Record, Relation};
use crate::proxy::Proxy;
use chrono::{DateTime, Utc};
use keepsake_core::{
    ClassInfo, ClassRegistry, Criteria, Error, OrderBy, RelationshipInfo, RelationshipKind,
    Result, Row, SelectQuery, SqlType, Storage, TypeError, Value,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of [`Session::store_all`].
#[derive(Debug, Default)]
pub struct StoreReport {
    /// Objects stored successfully, in input order.
    pub stored: Vec<ObjectId>,
    /// Objects whose store failed with a recoverable error.
    pub failed: Vec<(ObjectId, Error)>,
}

impl StoreReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Explicit persistence context.
///
/// Holds the storage backend, the class registry and the identity cache. Two
/// sessions never share instances; within one session every id resolves to a
/// single live object.
pub struct Session {
    storage: Arc<dyn Storage>,
    registry: Arc<ClassRegistry>,
    cache: IdentityCache,
    config: SessionConfig,
}

impl Session {
    /// Create a session with the default configuration.
    ///
    /// Fails if any relationship targets an unregistered class.
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<ClassRegistry>) -> Result<Self> {
        Self::with_config(storage, registry, SessionConfig::default())
    }

    pub fn with_config(
        storage: Arc<dyn Storage>,
        registry: Arc<ClassRegistry>,
        config: SessionConfig,
    ) -> Result<Self> {
        registry.verify()?;
        tracing::debug!(
            backend = storage.backend_name(),
            classes = registry.len(),
            "Opened session"
        );
        Ok(Self {
            storage,
            registry,
            cache: IdentityCache::with_compaction(config.compact_every),
            config,
        })
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Construction and lookup
    // ------------------------------------------------------------------

    /// A new, unsaved object with declared defaults and a fresh id.
    pub fn create(&self, class: &str) -> Result<Object> {
        let class = self.registry.class(class)?;
        let id = ObjectId::generate();
        let record = self.blank_record(&class, &id)?;
        self.register(&Object::new_loaded(id, record))
    }

    /// A new, unsaved object with some fields assigned.
    pub fn create_with<I, K, V>(&self, class: &str, fields: I) -> Result<Object>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let object = self.create(class)?;
        for (name, value) in fields {
            object.set(self, name.as_ref(), value)?;
        }
        Ok(object)
    }

    /// A handle for `class`/`id` that loads on first use.
    pub fn proxy(&self, class: &str, id: &str) -> Result<Object> {
        Proxy::create(self, class, id)
    }

    /// Load by id. The live instance is returned if one is cached.
    ///
    /// A cached proxy that cannot resolve under its own class (it was created
    /// for an unrelated class) is filled from `class`'s row instead.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn load(&self, class: &str, id: &str) -> Result<Object> {
        let info = self.registry.class(class)?;
        let id = ObjectId::new(id)?;
        let missing = || Error::not_found(class, format!("id = {}", id));

        if let Some(existing) = self.cache.get(&id) {
            match Proxy::load(self, &existing) {
                Ok(()) => {
                    if !existing.class().is_a(class) {
                        return Err(missing());
                    }
                    tracing::trace!("Identity cache hit");
                    return Ok(existing);
                }
                Err(Error::Proxy(e)) => {
                    tracing::debug!(proxy_class = %e.class, "Cached proxy did not resolve, reading row");
                }
                Err(e) => return Err(e),
            }
        }

        let Some((actual, row)) = self.fetch_row(&info, &id)? else {
            return Err(missing());
        };
        self.materialize(&actual, &row)
    }

    /// Load the first object whose `field` equals `value`.
    pub fn load_by(&self, class: &str, field: &str, value: impl Into<Value>) -> Result<Object> {
        let value = value.into();
        let lookup = format!("{} = {:?}", field, value);
        let criteria = Criteria::new().eq(field, value);
        self.search(class, &criteria, &[])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(class, lookup))
    }

    /// All objects of `class` (and its subclasses) matching `criteria`.
    #[tracing::instrument(level = "debug", skip(self, criteria, order_by))]
    pub fn search(
        &self,
        class: &str,
        criteria: &Criteria,
        order_by: &[OrderBy],
    ) -> Result<Vec<Object>> {
        let info = self.registry.class(class)?;
        for (column, _) in criteria.filters() {
            check_column(&info, column)?;
        }
        for term in order_by {
            check_column(&info, &term.column)?;
        }
        let rows = self.select_tables(
            &info,
            |member| member.columns().to_vec(),
            criteria,
            order_by,
            None,
        )?;
        tracing::debug!(count = rows.len(), "Search complete");
        rows.iter()
            .map(|(member, row)| self.materialize(member, row))
            .collect()
    }

    // ------------------------------------------------------------------
    // Cascades
    // ------------------------------------------------------------------

    /// Store `object` and its owned children.
    pub fn store(&self, object: &Object) -> Result<()> {
        cascade::store(self, object)
    }

    /// Store several objects, recording recoverable failures and carrying on.
    ///
    /// Programming errors still abort the batch.
    pub fn store_all(&self, objects: &[Object]) -> Result<StoreReport> {
        let mut report = StoreReport::default();
        for object in objects {
            match cascade::store(self, object) {
                Ok(()) => report.stored.push(object.id().clone()),
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(id = %object.id(), error = %e, "Store failed, continuing batch");
                    report.failed.push((object.id().clone(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Delete `object` and its owned children.
    pub fn delete(&self, object: &Object) -> Result<()> {
        cascade::delete(self, object)
    }

    /// Delete only `object`'s own row. Owned children are left behind.
    pub fn delete_this(&self, object: &Object) -> Result<()> {
        cascade::delete_this(self, object)
    }

    /// Discard in-memory changes to `object` and its owned children.
    pub fn revert(&self, object: &Object) -> Result<()> {
        cascade::revert(self, object)
    }

    /// Deep copy under a fresh id. Weak relationships are shared.
    pub fn clone_object(&self, object: &Object, new_owner: Option<&Object>) -> Result<Object> {
        cascade::clone_object(self, object, new_owner)
    }

    pub fn owner(&self, object: &Object) -> Result<Option<Object>> {
        object.owner(self)
    }

    // ------------------------------------------------------------------
    // Row plumbing
    // ------------------------------------------------------------------

    pub(crate) fn register(&self, object: &Object) -> Result<Object> {
        self.cache.store(object)
    }

    /// Fresh record with defaults; owned collections start loaded and empty.
    pub(crate) fn blank_record(&self, class: &Arc<ClassInfo>, id: &ObjectId) -> Result<Record> {
        let values = class
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect();
        let mut relations = BTreeMap::new();
        for rel in class.relationships() {
            let relation = match rel.kind {
                RelationshipKind::HasOne | RelationshipKind::MightHave => Relation::One(None),
                RelationshipKind::HasMany => {
                    let target = self.registry.class(&rel.target)?;
                    let holder = Some(OwnerRef {
                        class: class.name().to_string(),
                        id: id.clone(),
                    });
                    if rel.weak {
                        Relation::Many(Collection::weak(target, holder, Vec::new()))
                    } else {
                        Relation::Many(Collection::new(target, holder, true))
                    }
                }
            };
            relations.insert(rel.name.clone(), relation);
        }
        Ok(Record {
            class: Arc::clone(class),
            values,
            relations,
            owner: None,
            from_storage: false,
            created_at: Utc::now(),
            displaced: Vec::new(),
        })
    }

    /// Decode a stored row. has-one children and weak references become
    /// proxies (or their live instances), owned might-have children are looked
    /// up on first access, and owned collections load on first use.
    pub(crate) fn record_from_row(&self, class: &Arc<ClassInfo>, row: &Row) -> Result<Record> {
        let id: String = row.get_named("id")?;
        let owner_class: Option<String> = row.get_named("owner_class")?;
        let owner_id: Option<String> = row.get_named("owner_id")?;
        let owner = match (owner_class, owner_id) {
            (Some(class), Some(id)) => Some(OwnerRef {
                class,
                id: ObjectId::new(id)?,
            }),
            _ => None,
        };
        let created_at = decode_timestamp(row.get_by_name("created_at"))?;

        let mut values = BTreeMap::new();
        for field in class.fields() {
            let raw = row.get_by_name(&field.name).cloned().unwrap_or_default();
            let value = field.sql_type.inflate(raw).map_err(|e| match e {
                Error::Type(mut te) => {
                    te.column = Some(field.name.clone());
                    Error::Type(te)
                }
                other => other,
            })?;
            values.insert(field.name.clone(), value);
        }

        let holder = OwnerRef {
            class: class.name().to_string(),
            id: ObjectId::new(id)?,
        };
        let mut relations = BTreeMap::new();
        for rel in class.relationships() {
            let relation = if rel.is_id_list() {
                let ids = decode_id_list(rel, row.get_by_name(&rel.name))?;
                let elements = ids
                    .iter()
                    .map(|id| Proxy::create(self, &rel.target, id))
                    .collect::<Result<Vec<_>>>()?;
                Relation::Many(Collection::weak(
                    self.registry.class(&rel.target)?,
                    Some(holder.clone()),
                    elements,
                ))
            } else if rel.has_column() {
                let child: Option<String> = row.get_named(&rel.name)?;
                match child {
                    Some(child) => Relation::One(Some(Proxy::create(self, &rel.target, &child)?)),
                    None => Relation::One(None),
                }
            } else if rel.kind == RelationshipKind::MightHave {
                Relation::Deferred
            } else {
                Relation::Many(Collection::new(
                    self.registry.class(&rel.target)?,
                    Some(holder.clone()),
                    false,
                ))
            };
            relations.insert(rel.name.clone(), relation);
        }

        Ok(Record {
            class: Arc::clone(class),
            values,
            relations,
            owner,
            from_storage: true,
            created_at,
            displaced: Vec::new(),
        })
    }

    /// Turn a row into the canonical instance for its id.
    ///
    /// A loaded live instance wins over the row, keeping in-memory changes; a
    /// cached proxy is filled from the row in place.
    pub(crate) fn materialize(&self, class: &Arc<ClassInfo>, row: &Row) -> Result<Object> {
        let id = ObjectId::new(row.get_named::<String>("id")?)?;
        if let Some(existing) = self.cache.get(&id) {
            if !existing.is_proxy() {
                return Ok(existing);
            }
        }
        let record = self.record_from_row(class, row)?;
        self.register(&Object::new_loaded(id, record))
    }

    /// The row for `id` in `class`'s table or a descendant's.
    pub(crate) fn fetch_row(
        &self,
        class: &Arc<ClassInfo>,
        id: &ObjectId,
    ) -> Result<Option<(Arc<ClassInfo>, Row)>> {
        let criteria = Criteria::new().eq("id", id.to_value());
        for member in self.registry.family(class.name()) {
            let query = SelectQuery::new(member.table(), member.columns().to_vec())
                .filter(criteria.clone())
                .limit(1);
            if let Some(row) = self.storage.select(&query)?.into_iter().next() {
                return Ok(Some((member, row)));
            }
        }
        Ok(None)
    }

    /// Class and id of rows matching `criteria`, without loading them.
    pub(crate) fn select_ids(
        &self,
        class: &Arc<ClassInfo>,
        criteria: &Criteria,
        order_by: &[OrderBy],
        limit: Option<usize>,
    ) -> Result<Vec<(Arc<ClassInfo>, ObjectId)>> {
        let columns = |_: &ClassInfo| {
            std::iter::once("id".to_string())
                .chain(order_by.iter().map(|o| o.column.clone()))
                .collect()
        };
        self.select_tables(class, columns, criteria, order_by, limit)?
            .into_iter()
            .map(|(member, row)| Ok((member, ObjectId::new(row.get_named::<String>("id")?)?)))
            .collect()
    }

    /// The newest child of `target` owned by `owner`, as a proxy or live instance.
    pub(crate) fn find_owned(
        &self,
        target: &Arc<ClassInfo>,
        owner: &ObjectId,
    ) -> Result<Option<Object>> {
        let criteria = Criteria::new().eq("owner_id", owner.to_value());
        let order = [OrderBy::desc("created_at"), OrderBy::desc("id")];
        match self.select_ids(target, &criteria, &order, Some(1))?.into_iter().next() {
            Some((member, id)) => Proxy::create(self, member.name(), id.as_str()).map(Some),
            None => Ok(None),
        }
    }

    /// Every child of `target` owned by `owner`, oldest first.
    pub(crate) fn find_all_owned(
        &self,
        target: &Arc<ClassInfo>,
        owner: &ObjectId,
    ) -> Result<Vec<Object>> {
        let criteria = Criteria::new().eq("owner_id", owner.to_value());
        let order = [OrderBy::asc("created_at"), OrderBy::asc("id")];
        self.select_ids(target, &criteria, &order, None)?
            .into_iter()
            .map(|(member, id)| Proxy::create(self, member.name(), id.as_str()))
            .collect()
    }

    /// Run one select per table in `class`'s family and merge the results.
    fn select_tables(
        &self,
        class: &Arc<ClassInfo>,
        columns: impl Fn(&ClassInfo) -> Vec<String>,
        criteria: &Criteria,
        order_by: &[OrderBy],
        limit: Option<usize>,
    ) -> Result<Vec<(Arc<ClassInfo>, Row)>> {
        let family = self.registry.family(class.name());
        let mut rows = Vec::new();
        for member in &family {
            let mut query = SelectQuery::new(member.table(), columns(member))
                .filter(criteria.clone())
                .order_by(order_by.to_vec());
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            for row in self.storage.select(&query)? {
                rows.push((Arc::clone(member), row));
            }
        }
        if family.len() > 1 && !order_by.is_empty() {
            rows.sort_by(|(_, a), (_, b)| compare_rows(a, b, order_by));
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.storage.backend_name())
            .field("classes", &self.registry.len())
            .field("cached", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

static NULL: Value = Value::Null;

fn check_column(class: &ClassInfo, column: &str) -> Result<()> {
    if class.column_type(column).is_some() {
        Ok(())
    } else {
        Err(Error::InvalidParameters(format!(
            "{} has no column '{}'",
            class.name(),
            column
        )))
    }
}

fn compare_rows(a: &Row, b: &Row, order_by: &[OrderBy]) -> Ordering {
    for term in order_by {
        let left = a.get_by_name(&term.column).unwrap_or(&NULL);
        let right = b.get_by_name(&term.column).unwrap_or(&NULL);
        let ord = if term.descending {
            right.sort_cmp(left)
        } else {
            left.sort_cmp(right)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// The id list behind a weak has-many column. A NULL column is an empty list.
fn decode_id_list(rel: &RelationshipInfo, raw: Option<&Value>) -> Result<Vec<String>> {
    let bad = |actual: String| {
        Error::Type(TypeError {
            expected: "JSON array of ids",
            actual,
            column: Some(rel.name.clone()),
        })
    };
    let json = match SqlType::Json.inflate(raw.cloned().unwrap_or_default())? {
        Value::Null => return Ok(Vec::new()),
        Value::Json(json) => json,
        other => return Err(bad(other.type_name().to_string())),
    };
    match json {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(id) => Ok(id),
                other => Err(bad(other.to_string())),
            })
            .collect(),
        other => Err(bad(other.to_string())),
    }
}

fn decode_timestamp(raw: Option<&Value>) -> Result<DateTime<Utc>> {
    let value = SqlType::TimestampTz.inflate(raw.cloned().unwrap_or_default())?;
    let micros = match value {
        Value::TimestampTz(micros) => micros,
        other => {
            return Err(Error::Type(TypeError {
                expected: "TIMESTAMPTZ",
                actual: other.type_name().to_string(),
                column: Some("created_at".to_string()),
            }));
        }
    };
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        Error::Type(TypeError {
            expected: "TIMESTAMPTZ",
            actual: format!("out of range timestamp {}", micros),
            column: Some("created_at".to_string()),
        })
    })
}
