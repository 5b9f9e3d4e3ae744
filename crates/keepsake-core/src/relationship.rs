//! Relationship metadata.
//!
//! Three ownership cardinalities are supported. Any of them may be declared
//! weak, which excludes it from ownership assignment and from the store,
//! delete, revert and clone cascades.
//!
//! Owned children are found through their `owner_id`. A weak target has no
//! owner pointing back, so every weak relationship is kept on the referring
//! row instead: a single id for has-one and might-have, a JSON array of ids
//! for has-many.

/// How a child is attached to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The owner row stores the child's id in a column named after the relationship.
    HasOne,
    /// An ordered collection; children carry the owner's id.
    HasMany,
    /// Zero or one child, found by querying for rows owned by the parent.
    MightHave,
}

impl RelationshipKind {
    /// Human readable label used in diagnostics.
    pub const fn label(self) -> &'static str {
        match self {
            RelationshipKind::HasOne => "has-one",
            RelationshipKind::HasMany => "has-many",
            RelationshipKind::MightHave => "might-have",
        }
    }
}

/// A declared relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Field name on the owning object
    pub name: String,
    pub kind: RelationshipKind,
    /// Class name of the child objects
    pub target: String,
    /// Excluded from ownership and cascades
    pub weak: bool,
}

impl RelationshipInfo {
    pub fn new(name: impl Into<String>, kind: RelationshipKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            weak: false,
        }
    }

    /// Mark this relationship weak.
    pub fn weak(mut self, value: bool) -> Self {
        self.weak = value;
        self
    }

    /// Does this relationship take part in cascades?
    pub fn cascades(&self) -> bool {
        !self.weak
    }

    /// Whether this relationship occupies a column on the referring row.
    pub fn has_column(&self) -> bool {
        self.weak || self.kind == RelationshipKind::HasOne
    }

    /// A weak has-many, stored as a list of ids.
    pub fn is_id_list(&self) -> bool {
        self.weak && self.kind == RelationshipKind::HasMany
    }
}
