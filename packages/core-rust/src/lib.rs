//! Stagehand core: class descriptors, class registry, and the collaborator
//! contracts (configuration, logging, datastores, background services) that
//! the managed-object runtime consumes.

pub mod class;
pub mod class_registry;
pub mod config;
pub mod datastore;
pub mod error;
pub mod logger;
pub mod managed_ref;
pub mod service;

pub use class::{
    AnyObject, ClassBuilder, ClassDescriptor, Component, ConstructContext, HookFn, Injected,
    InjectionKind, InjectionPoint, JobDescriptor, LifecycleHook, ObjectLookup,
};
pub use class_registry::ClassRegistry;
pub use config::{ConfigSource, JsonConfig};
pub use datastore::{DatastoreHandle, DatastoreKind, Datastores, BEST_EFFORT_CACHE};
pub use error::{Error, Result};
pub use logger::Logger;
pub use managed_ref::ManagedRef;
pub use service::BackgroundService;
