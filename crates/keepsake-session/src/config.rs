//! Session configuration.

/// Behavior switches for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Check declared unique keys before the first store of an object.
    pub check_uniqueness: bool,
    /// Swap owned children for proxies once they have been stored.
    pub proxy_after_store: bool,
    /// Compact the identity cache after this many insertions.
    pub compact_every: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_uniqueness: true,
            proxy_after_store: true,
            compact_every: Some(1024),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_uniqueness(mut self, value: bool) -> Self {
        self.check_uniqueness = value;
        self
    }

    pub fn proxy_after_store(mut self, value: bool) -> Self {
        self.proxy_after_store = value;
        self
    }

    /// `None` disables automatic compaction.
    pub fn compact_every(mut self, value: Option<usize>) -> Self {
        self.compact_every = value;
        self
    }
}
