//! Fluent construction of a [`Session`] from class declarations.

use keepsake_core::{ClassDef, ClassRegistry, MemoryStorage, Result, Storage};
use keepsake_session::{Session, SessionConfig};
use std::sync::Arc;

/// Collects class declarations and configuration, then opens a session.
///
/// ```ignore
/// let session = SessionBuilder::new()
///     .class(ClassDef::new("Page").field(FieldInfo::new("title", SqlType::Text)))?
///     .build_memory()?;
/// ```
#[derive(Debug, Default)]
pub struct SessionBuilder {
    registry: ClassRegistry,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Parents must come before their subclasses.
    pub fn class(mut self, def: ClassDef) -> Result<Self> {
        self.registry.register(def)?;
        Ok(self)
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Open a session over any storage.
    pub fn build_with(self, storage: Arc<dyn Storage>) -> Result<Session> {
        Session::with_config(storage, Arc::new(self.registry), self.config)
    }

    /// Open a session over a fresh in-memory store.
    pub fn build_memory(self) -> Result<Session> {
        self.build_with(Arc::new(MemoryStorage::new()))
    }

    /// Open (or create) a SQLite database, create missing tables, and open a
    /// session over it.
    #[cfg(feature = "sqlite")]
    pub fn build_sqlite(self, config: &keepsake_sqlite::SqliteConfig) -> Result<Session> {
        let storage = keepsake_sqlite::SqliteStorage::open(config)?;
        storage.create_tables(&self.registry)?;
        tracing::debug!(path = %storage.path(), "SQLite schema ready");
        self.build_with(Arc::new(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{FieldInfo, SqlType};

    #[test]
    fn test_builder_registers_classes() {
        let builder = SessionBuilder::new()
            .class(ClassDef::new("Page").field(FieldInfo::new("title", SqlType::Text)))
            .unwrap();
        assert_eq!(builder.registry().len(), 1);
        let session = builder.build_memory().unwrap();
        assert_eq!(session.storage().backend_name(), "memory");
    }

    #[test]
    fn test_builder_rejects_dangling_relationship() {
        let builder = SessionBuilder::new()
            .class(ClassDef::new("Page").has_one("body", "Body"))
            .unwrap();
        assert!(builder.build_memory().is_err());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_builder_sqlite_memory() {
        let session = SessionBuilder::new()
            .class(ClassDef::new("Page").field(FieldInfo::new("title", SqlType::Text)))
            .unwrap()
            .config(SessionConfig::new().proxy_after_store(false))
            .build_sqlite(&keepsake_sqlite::SqliteConfig::memory())
            .unwrap();
        assert_eq!(session.storage().backend_name(), "sqlite");
        assert!(!session.config().proxy_after_store);
    }
}
