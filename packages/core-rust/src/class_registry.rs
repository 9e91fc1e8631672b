//! FQN-keyed class bookkeeping.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::class::{ClassDescriptor, Component};

/// Registry of class descriptors.
///
/// Provides two lookup mechanisms:
/// - **By FQN** (`resolve`): the stable string key
/// - **By type** (`fqn_of::<T>`): `TypeId` index for typed construction
///
/// Registration is idempotent: the first descriptor registered under an FQN
/// wins and later registrations are ignored.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    by_fqn: DashMap<String, Arc<ClassDescriptor>>,
    by_type: DashMap<TypeId, String>,
    /// Registration order, used for deterministic job enumeration.
    order: RwLock<Vec<String>>,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` unless its FQN is already known.
    ///
    /// Returns the descriptor stored under the FQN, which is the existing one
    /// when the call was a no-op.
    pub fn register(&self, descriptor: ClassDescriptor) -> Arc<ClassDescriptor> {
        let fqn = descriptor.fqn().to_string();
        let descriptor = Arc::new(descriptor);
        match self.by_fqn.entry(fqn.clone()) {
            Entry::Occupied(existing) => {
                debug!(fqn = %fqn, "class already registered, keeping existing descriptor");
                return Arc::clone(existing.get());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&descriptor));
            }
        }

        self.by_type
            .entry(descriptor.type_id())
            .or_insert_with(|| fqn.clone());
        self.order.write().push(fqn.clone());
        info!(fqn = %fqn, job = descriptor.job().is_some(), "registered class");
        descriptor
    }

    /// Registers `T::describe()` unless `T` is already known.
    pub fn register_component<T: Component>(&self) -> Arc<ClassDescriptor> {
        if let Some(existing) = self.resolve_type(TypeId::of::<T>()) {
            return existing;
        }
        self.register(T::describe())
    }

    #[must_use]
    pub fn resolve(&self, fqn: &str) -> Option<Arc<ClassDescriptor>> {
        self.by_fqn.get(fqn).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn resolve_type(&self, type_id: TypeId) -> Option<Arc<ClassDescriptor>> {
        let fqn = self.by_type.get(&type_id)?.value().clone();
        self.resolve(&fqn)
    }

    /// FQN under which `T` was registered.
    #[must_use]
    pub fn fqn_of<T: 'static>(&self) -> Option<String> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, fqn: &str) -> bool {
        self.by_fqn.contains_key(fqn)
    }

    /// Every registered class carrying a job descriptor, in registration order.
    #[must_use]
    pub fn job_classes(&self) -> Vec<Arc<ClassDescriptor>> {
        let order = self.order.read().clone();
        order
            .iter()
            .filter_map(|fqn| self.resolve(fqn))
            .filter(|descriptor| descriptor.job().is_some())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_fqn.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_fqn.is_empty()
    }

    /// Forgets every registration.
    pub fn clear(&self) {
        self.by_fqn.clear();
        self.by_type.clear();
        self.order.write().clear();
    }
}
