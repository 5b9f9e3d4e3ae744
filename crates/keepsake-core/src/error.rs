//! Error types for Keepsake operations.
//!
//! Errors fall into two groups. Recoverable failures (validation, uniqueness,
//! missing rows) are returned so callers and batch operations can carry on.
//! Programming errors (identity violations, unstorable field values, malformed
//! class declarations) signal a bug in the caller and are not meant to be
//! handled at runtime.

use std::fmt;

/// The primary error type for all Keepsake operations.
#[derive(Debug)]
pub enum Error {
    /// A call was made with missing or malformed arguments.
    InvalidParameters(String),
    /// An expected row is absent from storage.
    NotFound(NotFoundError),
    /// A uniqueness check failed while storing.
    Duplicate(DuplicateError),
    /// A second live instance was offered to the identity cache for an id.
    DuplicateIdentity {
        /// The id that already maps to a different live instance.
        id: String,
    },
    /// An object was removed from the identity cache that it does not hold.
    NotStored {
        /// The id of the object that was not registered.
        id: String,
    },
    /// A field value cannot be written to a column.
    StoreReference {
        /// Class owning the field.
        class: String,
        /// Offending field.
        field: String,
        /// Type name of the value found in the field.
        found: &'static str,
    },
    /// Revert was attempted on an object that has never been stored.
    Revert {
        /// Class of the object.
        class: String,
        /// Id of the object.
        id: String,
    },
    /// An undefined operation was invoked on an object.
    Method(MethodError),
    /// A proxy could not be resolved into its object.
    Proxy(ProxyError),
    /// Storage query errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Class declaration errors
    Schema(SchemaError),
    /// Validation errors
    Validation(ValidationError),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub class: String,
    /// Human readable description of what was looked up (`id = ...`, criteria).
    pub lookup: String,
}

#[derive(Debug, Clone)]
pub struct DuplicateError {
    pub class: String,
    /// The unique key whose values collided.
    pub fields: Vec<String>,
    /// Id of the row already holding those values.
    pub existing_id: String,
}

/// An operation the target class does not define.
///
/// The `Display` impl is the single place the message is shaped, so the error
/// looks the same whether the call went through a proxy or the real object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodError {
    pub class: String,
    pub method: String,
}

#[derive(Debug, Clone)]
pub struct ProxyError {
    pub class: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// A UNIQUE, NOT NULL or other table constraint rejected the write
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied or read-only storage
    Permission,
    /// Storage is busy or locked
    Busy,
    /// Operation is not supported by this backend
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the storage
    Connect,
}

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Class name registered twice
    ClassExists,
    /// Referenced class (parent or relationship target) is not registered
    UnknownClass,
    /// Field or relationship name declared twice along the inheritance chain
    FieldExists,
    /// Name is not a valid identifier or collides with a reserved column
    InvalidName,
    /// Relationship declarations that cannot be resolved unambiguously
    AmbiguousRelationship,
}

/// Everything wrong with an object that was about to be stored.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// One entry per failed check; object-level checks use `"__object__"`.
    pub errors: Vec<FieldValidationError>,
}

#[derive(Debug, Clone)]
pub struct FieldValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Non-nullable field without a default is null
    Required,
    /// Value has the wrong type for the declared column
    Type,
    /// Custom validation failed
    Custom,
}

impl ValidationError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(
            field,
            ValidationErrorKind::Required,
            "is required".to_string(),
        );
    }

    /// A value whose variant does not match the declared column type.
    pub fn add_type(&mut self, field: impl Into<String>, expected: &str, actual: &str) {
        self.add(
            field,
            ValidationErrorKind::Type,
            format!("expected {expected}, got {actual}"),
        );
    }

    pub fn add_custom(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(field, ValidationErrorKind::Custom, message);
    }

    /// Merge another set of errors into this one.
    pub fn extend(&mut self, other: ValidationError) {
        self.errors.extend(other.errors);
    }

    /// `Ok` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(self)
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl Error {
    /// Build a query error with no SQL attached.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Build a not-found error for a class lookup.
    pub fn not_found(class: impl Into<String>, lookup: impl Into<String>) -> Self {
        Error::NotFound(NotFoundError {
            class: class.into(),
            lookup: lookup.into(),
        })
    }

    /// Build an "undefined operation" error.
    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Error::Method(MethodError {
            class: class.into(),
            method: method.into(),
        })
    }

    /// Failures a caller (or a batch) can inspect and move past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Duplicate(_) | Error::NotFound(_) | Error::Proxy(_)
        )
    }

    /// Invariant violations that indicate a bug in calling code.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateIdentity { .. }
                | Error::NotStored { .. }
                | Error::StoreReference { .. }
                | Error::Schema(_)
        )
    }

    /// Is this a "row is gone" failure (direct lookup or via a proxy)?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Proxy(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            Error::NotFound(e) => write!(f, "{}", e),
            Error::Duplicate(e) => write!(f, "{}", e),
            Error::DuplicateIdentity { id } => write!(
                f,
                "Identity cache already holds a different live object for id {}",
                id
            ),
            Error::NotStored { id } => write!(f, "Object {} is not stored in the identity cache", id),
            Error::StoreReference {
                class,
                field,
                found,
            } => write!(
                f,
                "Cannot store field '{}' of {}: {} is not a storable value",
                field, class, found
            ),
            Error::Revert { class, id } => {
                write!(f, "Cannot revert {} {}: object has never been stored", class, id)
            }
            Error::Method(e) => write!(f, "{}", e),
            Error::Proxy(e) => write!(f, "{}", e),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No {} found with {}", self.class, self.lookup)
    }
}

impl fmt::Display for DuplicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Duplicate {}: ({}) already used by {}",
            self.class,
            self.fields.join(", "),
            self.existing_id
        )
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Can't locate object method \"{}\" via class \"{}\"",
            self.method, self.class
        )
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proxy for {} {} could not be loaded: {}",
            self.class, self.id, self.message
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "validation error on '{}': {}", err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<MethodError> for Error {
    fn from(err: MethodError) -> Self {
        Error::Method(err)
    }
}

impl From<ProxyError> for Error {
    fn from(err: ProxyError) -> Self {
        Error::Proxy(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Keepsake operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_error_message_shape() {
        let err = Error::method("Hero", "fly");
        assert_eq!(
            err.to_string(),
            "Can't locate object method \"fly\" via class \"Hero\""
        );
    }

    #[test]
    fn recoverable_and_programming_flags() {
        let dup = Error::Duplicate(DuplicateError {
            class: "Hero".to_string(),
            fields: vec!["name".to_string()],
            existing_id: "abc".to_string(),
        });
        assert!(dup.is_recoverable());
        assert!(!dup.is_programming_error());

        let identity = Error::DuplicateIdentity {
            id: "abc".to_string(),
        };
        assert!(identity.is_programming_error());
        assert!(!identity.is_recoverable());

        let missing = Error::not_found("Hero", "id = abc");
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "No Hero found with id = abc");
    }

    #[test]
    fn validation_error_display() {
        let mut err = ValidationError::new();
        assert!(err.clone().into_result().is_ok());

        err.add_required("name");
        assert_eq!(err.to_string(), "validation error on 'name': is required");

        err.add_custom("age", "must be positive");
        let text = err.to_string();
        assert!(text.starts_with("validation errors:"));
        assert!(text.contains("  - age: must be positive"));
    }

    #[test]
    fn query_error_keeps_sql() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO heroes".to_string()),
            message: "UNIQUE constraint failed".to_string(),
            source: None,
        });
        assert_eq!(err.sql(), Some("INSERT INTO heroes"));
        assert_eq!(err.to_string(), "Query error: UNIQUE constraint failed");
    }
}
