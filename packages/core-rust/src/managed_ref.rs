use std::fmt;
use std::sync::{Arc, Weak};

/// Non-owning handle to a registry-managed object.
///
/// Injected managed dependencies are handed out as `ManagedRef`s rather than
/// `Arc`s: the instance registry holds the only strong reference, so cyclic
/// graphs (A injects B, B injects A) never form reference-count cycles and are
/// released when the registry destroys or clears the records.
pub struct ManagedRef<T: ?Sized> {
    name: Arc<str>,
    object: Weak<T>,
}

impl<T: ?Sized> ManagedRef<T> {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, object: Weak<T>) -> Self {
        Self {
            name: name.into(),
            object,
        }
    }

    /// Canonical name of the referenced instance.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upgrades to a strong reference. `None` once the registry released it.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.object.upgrade()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.object.strong_count() > 0
    }

    /// Returns `true` if this handle refers to the same allocation as `other`.
    #[must_use]
    pub fn points_to(&self, other: &Arc<T>) -> bool {
        std::ptr::addr_eq(self.object.as_ptr(), Arc::as_ptr(other))
    }
}

impl<T: ?Sized> Clone for ManagedRef<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            object: Weak::clone(&self.object),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ManagedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRef")
            .field("name", &self.name)
            .field("live", &self.is_live())
            .finish()
    }
}
