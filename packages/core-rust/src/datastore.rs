//! Named datastore connections available for injection.
//!
//! Connections are opaque: the registry only knows a connection's kind and
//! hands it to the managed object, which downcasts it to the concrete client
//! type it declared.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Reserved datastore name for a best-effort cache.
///
/// A cache injection point targeting this name is silently skipped when no
/// connection has been registered under it.
pub const BEST_EFFORT_CACHE: &str = "cache";

/// Broad connection category used to validate injection points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreKind {
    /// Relational or document database connection (repository injection).
    Database,
    /// Key-value cache connection (cache injection).
    Cache,
}

/// A registered connection with its kind.
#[derive(Clone)]
pub struct DatastoreHandle {
    pub kind: DatastoreKind,
    pub connection: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for DatastoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreHandle")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Connection table keyed by datastore name.
#[derive(Debug, Default)]
pub struct Datastores {
    connections: DashMap<String, DatastoreHandle>,
}

impl Datastores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the connection for `name`.
    pub fn insert<C>(&self, name: impl Into<String>, kind: DatastoreKind, connection: Arc<C>)
    where
        C: Any + Send + Sync,
    {
        self.connections.insert(
            name.into(),
            DatastoreHandle {
                kind,
                connection: connection as Arc<dyn Any + Send + Sync>,
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<DatastoreHandle> {
        self.connections.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<DatastoreHandle> {
        self.connections.remove(name).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
