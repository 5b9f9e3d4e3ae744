//! Class declarations and the registry that flattens them.
//!
//! A [`ClassDef`] is what callers write: a name, an optional parent, the
//! fields and relationships the class itself adds. Registering it with a
//! [`ClassRegistry`] merges the whole inheritance chain into one immutable
//! [`ClassInfo`], so no lookup ever walks ancestors again.

use crate::error::{Error, Result, SchemaError, SchemaErrorKind, ValidationError};
use crate::field::FieldInfo;
use crate::identifiers::{is_reserved, is_valid_identifier, table_name_for, RESERVED_COLUMNS};
use crate::relationship::{RelationshipInfo, RelationshipKind};
use crate::types::SqlType;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Read access to an object's scalar fields, handed to validators.
pub trait FieldSource {
    /// Concrete class of the object.
    fn class_name(&self) -> &str;
    /// Current value of a scalar field, if the class declares it.
    fn field(&self, name: &str) -> Option<&Value>;
}

/// Pluggable object validation run before every store.
pub type Validator =
    Arc<dyn Fn(&dyn FieldSource) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// Declaration of one persistent class.
#[derive(Clone)]
pub struct ClassDef {
    name: String,
    table: Option<String>,
    extends: Option<String>,
    fields: Vec<FieldInfo>,
    relationships: Vec<RelationshipInfo>,
    unique: Vec<Vec<String>>,
    validator: Option<Validator>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            extends: None,
            fields: Vec::new(),
            relationships: Vec::new(),
            unique: Vec::new(),
            validator: None,
        }
    }

    /// Override the table name (defaults to the snake-cased class name).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Inherit fields, relationships, unique keys and validators from `parent`.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn has_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipInfo::new(name, RelationshipKind::HasOne, target))
    }

    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipInfo::new(name, RelationshipKind::HasMany, target))
    }

    pub fn might_have(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipInfo::new(name, RelationshipKind::MightHave, target))
    }

    /// A has-one reference that is never owned or cascaded.
    pub fn weak_has_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipInfo::new(name, RelationshipKind::HasOne, target).weak(true))
    }

    pub fn weak_has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipInfo::new(name, RelationshipKind::HasMany, target).weak(true))
    }

    pub fn weak_might_have(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(
            RelationshipInfo::new(name, RelationshipKind::MightHave, target).weak(true),
        )
    }

    pub fn relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Declare a set of fields whose combined values must be unique.
    pub fn unique<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&dyn FieldSource) -> std::result::Result<(), ValidationError>
            + Send
            + Sync
            + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("extends", &self.extends)
            .field("fields", &self.fields)
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

/// Flattened metadata for one registered class.
pub struct ClassInfo {
    name: String,
    table: String,
    /// This class first, then its ancestors up to the root.
    lineage: Vec<String>,
    fields: Vec<FieldInfo>,
    relationships: Vec<RelationshipInfo>,
    unique: Vec<Vec<String>>,
    validators: Vec<Validator>,
    columns: Vec<String>,
}

impl ClassInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Scalar fields, inherited ones first.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every relationship, including inherited ones, in declaration order.
    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn weak_relationships(&self) -> impl Iterator<Item = &RelationshipInfo> {
        self.relationships.iter().filter(|r| r.weak)
    }

    /// Relationships taking part in cascades.
    pub fn owned_relationships(&self) -> impl Iterator<Item = &RelationshipInfo> {
        self.relationships.iter().filter(|r| !r.weak)
    }

    pub fn is_weak(&self, name: &str) -> bool {
        self.relationship(name).is_some_and(|r| r.weak)
    }

    /// Row column order: reserved columns, scalar fields, then relationship
    /// columns (has-one ids and every weak reference).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Is this class `class` or one of its descendants?
    pub fn is_a(&self, class: &str) -> bool {
        self.lineage.iter().any(|c| c == class)
    }

    /// SQL type of a column on this class's table.
    pub fn column_type(&self, column: &str) -> Option<SqlType> {
        match column {
            "id" | "owner_class" | "owner_id" => Some(SqlType::Text),
            "created_at" => Some(SqlType::TimestampTz),
            _ => self.field(column).map(|f| f.sql_type).or_else(|| {
                self.relationship(column)
                    .filter(|r| r.has_column())
                    .map(|r| if r.is_id_list() { SqlType::Json } else { SqlType::Text })
            }),
        }
    }

    /// Run every validator in the lineage, root class first.
    pub fn validate(&self, source: &dyn FieldSource) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        for field in &self.fields {
            if !field.nullable
                && field.default.is_none()
                && source.field(&field.name).is_none_or(Value::is_null)
            {
                errors.add_required(field.name.clone());
            }
        }
        for validator in &self.validators {
            if let Err(e) = validator(source) {
                errors.extend(e);
            }
        }
        errors.into_result()
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("lineage", &self.lineage)
            .field("fields", &self.fields)
            .field("relationships", &self.relationships)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}

fn schema_error(kind: SchemaErrorKind, message: String) -> Error {
    Error::Schema(SchemaError { kind, message })
}

/// All registered classes, in registration order.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Arc<ClassInfo>>,
    by_name: HashMap<String, usize>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten `def` with its ancestors and register the result.
    ///
    /// Parents must be registered before their subclasses. Relationship
    /// targets may be registered later; [`ClassRegistry::verify`] checks them
    /// once everything is declared.
    #[tracing::instrument(level = "debug", skip(self, def), fields(class = %def.name))]
    pub fn register(&mut self, def: ClassDef) -> Result<Arc<ClassInfo>> {
        if self.by_name.contains_key(&def.name) {
            return Err(schema_error(
                SchemaErrorKind::ClassExists,
                format!("class {} is already registered", def.name),
            ));
        }
        check_name(&def.name, "class")?;

        let parent = match &def.extends {
            Some(parent) => Some(self.get(parent).ok_or_else(|| {
                schema_error(
                    SchemaErrorKind::UnknownClass,
                    format!("class {} extends unknown class {}", def.name, parent),
                )
            })?),
            None => None,
        };

        let mut lineage = vec![def.name.clone()];
        let mut fields = Vec::new();
        let mut relationships = Vec::new();
        let mut unique = Vec::new();
        let mut validators = Vec::new();
        if let Some(parent) = &parent {
            lineage.extend(parent.lineage.iter().cloned());
            fields.extend(parent.fields.iter().cloned());
            relationships.extend(parent.relationships.iter().cloned());
            unique.extend(parent.unique.iter().cloned());
            validators.extend(parent.validators.iter().cloned());
        }

        let mut seen: BTreeSet<String> = fields
            .iter()
            .map(|f| f.name.clone())
            .chain(relationships.iter().map(|r| r.name.clone()))
            .collect();
        let mut claim = |name: &str, what: &str| -> Result<()> {
            check_name(name, what)?;
            if is_reserved(name) {
                return Err(schema_error(
                    SchemaErrorKind::InvalidName,
                    format!(
                        "{} '{}' of {} collides with a reserved column ({})",
                        what,
                        name,
                        def.name,
                        RESERVED_COLUMNS.join(", ")
                    ),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(schema_error(
                    SchemaErrorKind::FieldExists,
                    format!("{} '{}' is declared more than once on {}", what, name, def.name),
                ));
            }
            Ok(())
        };
        for field in &def.fields {
            claim(&field.name, "field")?;
        }
        for rel in &def.relationships {
            claim(&rel.name, "relationship")?;
            check_name(&rel.target, "class")?;
        }
        fields.extend(def.fields.iter().cloned());
        relationships.extend(def.relationships.iter().cloned());

        for key in &def.unique {
            if key.is_empty() {
                return Err(Error::InvalidParameters(format!(
                    "empty unique key on {}",
                    def.name
                )));
            }
            for name in key {
                if !fields.iter().any(|f| &f.name == name) {
                    return Err(schema_error(
                        SchemaErrorKind::InvalidName,
                        format!("unique key on {} names unknown field '{}'", def.name, name),
                    ));
                }
            }
        }
        unique.extend(def.unique.iter().cloned());
        for field in def.fields.iter().filter(|f| f.unique) {
            unique.push(vec![field.name.clone()]);
        }
        validators.extend(def.validator.iter().cloned());

        check_targets_unambiguous(&def.name, &relationships)?;

        let table = match &def.table {
            Some(table) => {
                check_name(table, "table")?;
                table.clone()
            }
            None => table_name_for(&def.name),
        };
        if let Some(other) = self.classes.iter().find(|c| c.table == table) {
            return Err(schema_error(
                SchemaErrorKind::ClassExists,
                format!("table {} is already used by class {}", table, other.name),
            ));
        }

        let columns = RESERVED_COLUMNS
            .iter()
            .map(|c| (*c).to_string())
            .chain(fields.iter().map(|f| f.name.clone()))
            .chain(
                relationships
                    .iter()
                    .filter(|r| r.has_column())
                    .map(|r| r.name.clone()),
            )
            .collect();

        let info = Arc::new(ClassInfo {
            name: def.name.clone(),
            table,
            lineage,
            fields,
            relationships,
            unique,
            validators,
            columns,
        });
        tracing::debug!(
            table = %info.table,
            fields = info.fields.len(),
            relationships = info.relationships.len(),
            "Registered class"
        );
        self.by_name.insert(def.name, self.classes.len());
        self.classes.push(Arc::clone(&info));
        Ok(info)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.classes[i]))
    }

    /// Like [`ClassRegistry::get`] but failing with a schema error.
    pub fn class(&self, name: &str) -> Result<Arc<ClassInfo>> {
        self.get(name).ok_or_else(|| {
            schema_error(
                SchemaErrorKind::UnknownClass,
                format!("class {} is not registered", name),
            )
        })
    }

    /// `name` followed by every registered descendant, in registration order.
    pub fn family(&self, name: &str) -> Vec<Arc<ClassInfo>> {
        self.classes
            .iter()
            .filter(|c| c.is_a(name))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClassInfo>> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Check every relationship target is a registered class.
    pub fn verify(&self) -> Result<()> {
        for class in &self.classes {
            for rel in &class.relationships {
                if !self.by_name.contains_key(&rel.target) {
                    return Err(schema_error(
                        SchemaErrorKind::UnknownClass,
                        format!(
                            "relationship {}.{} targets unknown class {}",
                            class.name, rel.name, rel.target
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_name(name: &str, what: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(schema_error(
            SchemaErrorKind::InvalidName,
            format!("'{}' is not a valid {} name", name, what),
        ))
    }
}

/// A child class reached through more than one relationship cannot tell which
/// one owns it, unless every such relationship stores the child's id itself.
/// Weak relationships own nothing and are ignored.
fn check_targets_unambiguous(class: &str, relationships: &[RelationshipInfo]) -> Result<()> {
    let mut by_target: BTreeMap<&str, Vec<&RelationshipInfo>> = BTreeMap::new();
    for rel in relationships.iter().filter(|r| !r.weak) {
        by_target.entry(rel.target.as_str()).or_default().push(rel);
    }
    for (target, rels) in by_target {
        if rels.len() > 1 && rels.iter().any(|r| !r.has_column()) {
            let names: Vec<String> = rels
                .iter()
                .map(|r| format!("{} ({})", r.name, r.kind.label()))
                .collect();
            return Err(schema_error(
                SchemaErrorKind::AmbiguousRelationship,
                format!(
                    "{} reaches {} through several relationships: {}",
                    class,
                    target,
                    names.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_kind(err: Error) -> SchemaErrorKind {
        match err {
            Error::Schema(e) => e.kind,
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    fn animal() -> ClassDef {
        ClassDef::new("Animal")
            .field(FieldInfo::new("name", SqlType::Text))
            .has_one("tag", "Tag")
            .weak_has_one("friend", "Animal")
    }

    #[test]
    fn inheritance_is_flattened() {
        let mut registry = ClassRegistry::new();
        registry.register(animal()).unwrap();
        let dog = registry
            .register(
                ClassDef::new("Dog")
                    .extends("Animal")
                    .field(FieldInfo::new("breed", SqlType::Text).nullable(true))
                    .has_many("puppies", "Puppy"),
            )
            .unwrap();

        let fields: Vec<&str> = dog.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, vec!["name", "breed"]);
        assert_eq!(dog.relationships().len(), 3);
        assert!(dog.is_weak("friend"));
        assert!(!dog.is_weak("tag"));
        assert_eq!(dog.weak_relationships().count(), 1);
        assert!(dog.is_a("Animal"));
        assert!(dog.is_a("Dog"));
        assert_eq!(dog.lineage(), ["Dog".to_string(), "Animal".to_string()]);
        assert_eq!(dog.table(), "dog");
        assert_eq!(
            dog.columns(),
            [
                "id",
                "owner_class",
                "owner_id",
                "created_at",
                "name",
                "breed",
                "tag",
                "friend"
            ]
            .map(String::from)
        );
        assert_eq!(registry.family("Animal").len(), 2);
    }

    #[test]
    fn weak_references_live_on_the_referring_row() {
        let mut registry = ClassRegistry::new();
        let post = registry
            .register(
                ClassDef::new("Post")
                    .has_many("replies", "Reply")
                    .weak_has_many("tags", "Tag")
                    .weak_might_have("pinned", "Reply"),
            )
            .unwrap();
        assert_eq!(
            post.columns()[RESERVED_COLUMNS.len()..],
            ["tags", "pinned"].map(String::from)
        );
        assert_eq!(post.column_type("tags"), Some(SqlType::Json));
        assert_eq!(post.column_type("pinned"), Some(SqlType::Text));
        assert_eq!(post.column_type("replies"), None);
        assert_eq!(post.owned_relationships().count(), 1);
    }

    #[test]
    fn unknown_parent_rejected() {
        let mut registry = ClassRegistry::new();
        let err = registry
            .register(ClassDef::new("Dog").extends("Animal"))
            .unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::UnknownClass);
    }

    #[test]
    fn subclass_cannot_hide_parent_names() {
        let mut registry = ClassRegistry::new();
        registry.register(animal()).unwrap();
        let err = registry
            .register(
                ClassDef::new("Cat")
                    .extends("Animal")
                    .field(FieldInfo::new("name", SqlType::Text)),
            )
            .unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::FieldExists);
    }

    #[test]
    fn reserved_and_invalid_names_rejected() {
        let mut registry = ClassRegistry::new();
        let err = registry
            .register(ClassDef::new("Bad").field(FieldInfo::new("owner_id", SqlType::Text)))
            .unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::InvalidName);

        let err = registry
            .register(ClassDef::new("Bad").field(FieldInfo::new("a b", SqlType::Text)))
            .unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::InvalidName);
    }

    #[test]
    fn duplicate_class_rejected() {
        let mut registry = ClassRegistry::new();
        registry.register(animal()).unwrap();
        let err = registry.register(animal()).unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::ClassExists);
    }

    #[test]
    fn two_kinds_to_same_class_rejected() {
        let mut registry = ClassRegistry::new();
        let err = registry
            .register(
                ClassDef::new("Team")
                    .has_one("captain", "Player")
                    .has_many("players", "Player"),
            )
            .unwrap_err();
        assert_eq!(schema_kind(err), SchemaErrorKind::AmbiguousRelationship);

        registry
            .register(
                ClassDef::new("Match")
                    .has_one("home", "Side")
                    .has_one("away", "Side"),
            )
            .unwrap();
    }

    #[test]
    fn verify_reports_missing_targets() {
        let mut registry = ClassRegistry::new();
        registry.register(animal()).unwrap();
        assert!(registry.verify().is_err());
        registry.register(ClassDef::new("Tag")).unwrap();
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn unique_fields_become_keys() {
        let mut registry = ClassRegistry::new();
        let info = registry
            .register(
                ClassDef::new("User")
                    .field(FieldInfo::new("email", SqlType::Text).unique(true))
                    .field(FieldInfo::new("first", SqlType::Text))
                    .field(FieldInfo::new("last", SqlType::Text))
                    .unique(["first", "last"]),
            )
            .unwrap();
        assert_eq!(info.unique_keys().len(), 2);
    }

    struct Fields(Vec<(&'static str, Value)>);

    impl FieldSource for Fields {
        fn class_name(&self) -> &str {
            "Account"
        }

        fn field(&self, name: &str) -> Option<&Value> {
            self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
        }
    }

    #[test]
    fn validation_collects_required_and_custom_errors() {
        let mut registry = ClassRegistry::new();
        let info = registry
            .register(
                ClassDef::new("Account")
                    .field(FieldInfo::new("owner_name", SqlType::Text))
                    .field(FieldInfo::new("balance", SqlType::BigInt).default(0))
                    .validator(|obj| {
                        let mut errors = ValidationError::new();
                        if obj.field("balance").and_then(Value::as_i64).unwrap_or(0) < 0 {
                            errors.add_custom("balance", "must not be negative");
                        }
                        errors.into_result()
                    }),
            )
            .unwrap();

        let err = info
            .validate(&Fields(vec![("balance", Value::BigInt(-5))]))
            .unwrap_err();
        assert_eq!(err.errors.len(), 2);

        assert!(
            info.validate(&Fields(vec![
                ("owner_name", Value::from("Ann")),
                ("balance", Value::BigInt(3)),
            ]))
            .is_ok()
        );
    }
}
