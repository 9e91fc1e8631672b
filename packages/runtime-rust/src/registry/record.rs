use std::sync::Arc;

use arc_swap::ArcSwap;
use stagehand_core::{AnyObject, ClassDescriptor};

/// Initialization state of a managed instance.
///
/// State machine: Created -> Initializing -> {Ready | Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Constructed and registered; no dependency resolved yet.
    Created,
    /// Injection or init hooks in progress. Cyclic dependents may observe
    /// the instance in this state.
    Initializing,
    /// Fully injected and initialized.
    Ready,
    /// Injection or an init hook failed. The object stays reachable by name.
    Failed,
}

/// Registry entry for one live object.
///
/// The canonical name and FQN are fixed at construction; only the state
/// transitions. State is held in an `ArcSwap` so readers never block behind
/// an in-progress initialization.
pub struct InstanceRecord {
    name: String,
    descriptor: Arc<ClassDescriptor>,
    object: AnyObject,
    state: ArcSwap<InitState>,
}

impl InstanceRecord {
    pub(crate) fn new(name: String, descriptor: Arc<ClassDescriptor>, object: AnyObject) -> Self {
        Self {
            name,
            descriptor,
            object,
            state: ArcSwap::from_pointee(InitState::Created),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fqn(&self) -> &str {
        self.descriptor.fqn()
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    /// Strong reference to the managed object.
    #[must_use]
    pub fn object(&self) -> AnyObject {
        Arc::clone(&self.object)
    }

    #[must_use]
    pub fn state(&self) -> InitState {
        **self.state.load()
    }

    pub(crate) fn set_state(&self, state: InitState) {
        self.state.store(Arc::new(state));
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("name", &self.name)
            .field("fqn", &self.fqn())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
