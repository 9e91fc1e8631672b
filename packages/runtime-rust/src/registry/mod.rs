//! Instance registry: an arena of managed objects keyed by canonical name.
//!
//! The registry is the only owner of the objects it creates. Dependencies are
//! injected as [`ManagedRef`](stagehand_core::ManagedRef) weak handles, so
//! cyclic object graphs stay representable without reference-count cycles.
//!
//! Construction protocol for a name that is not yet registered:
//! 1. construct the object (synchronous, outside any map lock)
//! 2. insert the record at [`InitState::Created`] with no intervening `.await`
//! 3. resolve injection points, then run init hooks
//! 4. mark [`InitState::Ready`], or [`InitState::Failed`] on error
//!
//! Because step 2 precedes every suspension point, a re-entrant request for
//! the same name (a dependency cycle, or a concurrent caller) finds the record
//! and gets the existing object back instead of recursing.

mod name;
mod record;

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use stagehand_core::{
    AnyObject, ClassDescriptor, ClassRegistry, Component, ConfigSource, ConstructContext,
    DatastoreKind, Datastores, Error, Injected, InjectionKind, InjectionPoint, Logger,
    ObjectLookup, Result, BEST_EFFORT_CACHE,
};
use tracing::{debug, error, info, warn};

pub use name::{canonical_name, lookup_key, split as split_name, DEFAULT_LOCAL};
pub use record::{InitState, InstanceRecord};

use crate::metrics;

/// Registry of live managed objects.
///
/// Constructed once at process start and shared by `Arc` with the scheduler
/// and any other component that creates managed objects.
pub struct InstanceRegistry {
    classes: Arc<ClassRegistry>,
    instances: DashMap<String, Arc<InstanceRecord>>,
    config: Arc<dyn ConfigSource>,
    datastores: Arc<Datastores>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(
        classes: Arc<ClassRegistry>,
        config: Arc<dyn ConfigSource>,
        datastores: Arc<Datastores>,
    ) -> Self {
        Self {
            classes,
            instances: DashMap::new(),
            config,
            datastores,
        }
    }

    /// Shared class registry.
    #[must_use]
    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    #[must_use]
    pub fn config(&self) -> &Arc<dyn ConfigSource> {
        &self.config
    }

    #[must_use]
    pub fn datastores(&self) -> &Arc<Datastores> {
        &self.datastores
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Returns the instance of `T` registered under `name`, creating and
    /// initializing it if needed. Registers `T` first if it is unknown.
    ///
    /// # Errors
    ///
    /// Propagates construction, configuration, and init hook failures, and
    /// returns [`Error::InstanceFailed`] if the name belongs to an instance
    /// whose initialization already failed.
    pub async fn new_instance<T: Component>(
        &self,
        name: Option<&str>,
        args: Vec<Value>,
    ) -> Result<Arc<T>> {
        let descriptor = self.classes.register_component::<T>();
        let object = self.instantiate(descriptor, name, args).await?;
        object.downcast::<T>().map_err(|_| Error::TypeMismatch {
            name: name.unwrap_or_default().to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Like [`new_instance`](Self::new_instance), for a class known only by FQN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] if `fqn` is not registered, otherwise
    /// the same errors as [`new_instance`](Self::new_instance).
    pub fn new_instance_by_fqn<'a>(
        &'a self,
        fqn: &'a str,
        name: Option<&'a str>,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<AnyObject>> {
        Box::pin(async move {
            let descriptor = self.classes.resolve(fqn).ok_or_else(|| Error::ClassNotFound {
                fqn: fqn.to_string(),
            })?;
            self.instantiate(descriptor, name, args).await
        })
    }

    fn instantiate<'a>(
        &'a self,
        descriptor: Arc<ClassDescriptor>,
        name: Option<&'a str>,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<AnyObject>> {
        Box::pin(async move {
            let name = canonical_name(descriptor.fqn(), name);
            if let Some(existing) = self.record(&name) {
                return existing_object(&existing);
            }

            let ctx = ConstructContext {
                fqn: descriptor.fqn().to_string(),
                name: name.clone(),
                args,
                config: Arc::clone(&self.config),
                registry: self,
            };
            let object = descriptor.construct(&ctx)?;
            let record = Arc::new(InstanceRecord::new(
                name.clone(),
                Arc::clone(&descriptor),
                object,
            ));

            let winner = match self.instances.entry(name.clone()) {
                Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&record));
                    None
                }
            };
            if let Some(existing) = winner {
                debug!(name = %name, "lost construction race, discarding duplicate object");
                return existing_object(&existing);
            }

            metrics::increment_instances_created(descriptor.fqn());
            debug!(name = %name, fqn = %descriptor.fqn(), "instance registered");

            match self.initialize(&record).await {
                Ok(()) => {
                    record.set_state(InitState::Ready);
                    debug!(name = %name, "instance ready");
                    Ok(record.object())
                }
                Err(err) => {
                    record.set_state(InitState::Failed);
                    warn!(name = %name, error = %err, "instance initialization failed");
                    Err(err)
                }
            }
        })
    }

    async fn initialize(&self, record: &InstanceRecord) -> Result<()> {
        record.set_state(InitState::Initializing);
        let object = record.object();
        let target: &(dyn Any + Send + Sync) = &*object;
        let descriptor = record.descriptor();

        for point in descriptor.injections() {
            if let Some(value) = self.resolve(record, point).await? {
                point.apply(target, value)?;
            }
        }

        for hook in descriptor.init_hooks() {
            hook.invoke(target).await.map_err(|source| Error::Hook {
                name: record.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Resolves the value for one injection point. `None` means skip.
    async fn resolve(
        &self,
        record: &InstanceRecord,
        point: &InjectionPoint,
    ) -> Result<Option<Injected>> {
        let value = match &point.kind {
            InjectionKind::ConfigValue { path, default } => {
                let value = self
                    .config
                    .get(path)
                    .or_else(|| default.clone())
                    .ok_or_else(|| {
                        Error::configuration(format!(
                            "missing required config path {path} for {}.{}",
                            point.owner, point.member
                        ))
                    })?;
                Injected::Config(value)
            }
            InjectionKind::ConfigWhole => Injected::Config(self.config.whole()),
            InjectionKind::Logger => Injected::Logger(Logger::new(record.name())),
            InjectionKind::Repository { datastore } => {
                match self.connection(point, datastore.as_deref(), DatastoreKind::Database)? {
                    Some(connection) => Injected::Connection(connection),
                    None => return Ok(None),
                }
            }
            InjectionKind::Cache { datastore } => {
                match self.connection(point, datastore.as_deref(), DatastoreKind::Cache)? {
                    Some(connection) => Injected::Connection(connection),
                    None => return Ok(None),
                }
            }
            InjectionKind::Managed {
                type_id,
                name,
                args,
                describe,
            } => {
                let descriptor = match self.classes.resolve_type(*type_id) {
                    Some(descriptor) => descriptor,
                    None => self.classes.register(describe()),
                };
                let local = name.as_deref().unwrap_or(DEFAULT_LOCAL);
                let dependency = canonical_name(descriptor.fqn(), Some(local));
                debug!(
                    name = %record.name(),
                    dependency = %dependency,
                    member = point.member,
                    "resolving managed dependency"
                );
                let object = self
                    .instantiate(descriptor, Some(local), args.clone())
                    .await?;
                Injected::Managed {
                    name: dependency,
                    object,
                }
            }
        };
        Ok(Some(value))
    }

    fn connection(
        &self,
        point: &InjectionPoint,
        datastore: Option<&str>,
        expected: DatastoreKind,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        let Some(datastore) = datastore else {
            return Err(Error::configuration(format!(
                "{}.{} declares no datastore name",
                point.owner, point.member
            )));
        };

        let Some(handle) = self.datastores.get(datastore) else {
            if datastore == BEST_EFFORT_CACHE {
                debug!(member = point.member, "best-effort cache not configured, skipping");
                return Ok(None);
            }
            return Err(Error::configuration(format!(
                "no connection registered for datastore {datastore} ({}.{})",
                point.owner, point.member
            )));
        };

        if handle.kind != expected {
            return Err(Error::configuration(format!(
                "datastore {datastore} is a {:?} connection, {}.{} expects {expected:?}",
                handle.kind, point.owner, point.member
            )));
        }
        Ok(Some(handle.connection))
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Exact-name lookup; bare class names are suffixed with `:default`.
    /// Never constructs.
    #[must_use]
    pub fn get_instance<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get_object(name)?.downcast::<T>().ok()
    }

    /// Looks up the instance of `T` under `local` (or `default`).
    #[must_use]
    pub fn get_instance_of<T: Any + Send + Sync>(&self, local: Option<&str>) -> Option<Arc<T>> {
        let fqn = self.classes.fqn_of::<T>()?;
        let name = canonical_name(&fqn, Some(local.unwrap_or(DEFAULT_LOCAL)));
        self.get_instance(&name)
    }

    #[must_use]
    pub fn get_object(&self, name: &str) -> Option<AnyObject> {
        self.record(name).map(|record| record.object())
    }

    #[must_use]
    pub fn record(&self, name: &str) -> Option<Arc<InstanceRecord>> {
        let key = lookup_key(name);
        self.instances
            .get(key.as_ref())
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<InitState> {
        self.record(name).map(|record| record.state())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(lookup_key(name).as_ref())
    }

    /// Canonical name of a registry-owned object.
    #[must_use]
    pub fn name_of<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<String> {
        let target = Arc::as_ptr(object);
        self.instances
            .iter()
            .find(|entry| std::ptr::addr_eq(Arc::as_ptr(&entry.value().object()), target))
            .map(|entry| entry.key().clone())
    }

    /// Canonical names of every tracked instance.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.instances.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    /// Destroys the named instances, returning how many were destroyed.
    ///
    /// Each instance's most-derived destructor runs at most once; a failing
    /// destructor is logged and does not stop the remaining targets.
    pub async fn destroy<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut destroyed = 0;
        for name in names {
            if self.destroy_one(name.as_ref()).await {
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Destroys a single registry-owned object. Returns `false` if the object
    /// is not tracked.
    pub async fn destroy_object<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        match self.name_of(object) {
            Some(name) => self.destroy_one(&name).await,
            None => false,
        }
    }

    /// Destroys every tracked instance.
    pub async fn destroy_all(&self) -> usize {
        let names = self.names();
        info!(count = names.len(), "destroying all instances");
        self.destroy(names).await
    }

    async fn destroy_one(&self, name: &str) -> bool {
        let key = lookup_key(name);
        // Removal is atomic, so concurrent destroys of one name run the
        // destructor once.
        let Some((name, record)) = self.instances.remove(key.as_ref()) else {
            return false;
        };

        if let Some(destructor) = record.descriptor().destructor() {
            let object = record.object();
            if let Err(source) = destructor.invoke(&*object).await {
                let err = Error::Destruction {
                    name: name.clone(),
                    source,
                };
                error!(name = %name, error = %err, "destructor failed");
            }
        }

        metrics::increment_instances_destroyed(record.fqn());
        debug!(name = %name, "instance destroyed");
        true
    }

    /// Drops every instance record without running destructors.
    pub fn clear(&self) {
        self.instances.clear();
    }

    /// Drops instance records and class registrations without running
    /// destructors.
    pub fn clear_all(&self) {
        self.instances.clear();
        self.classes.clear();
    }
}

impl ObjectLookup for InstanceRegistry {
    fn get_object(&self, name: &str) -> Option<AnyObject> {
        InstanceRegistry::get_object(self, name)
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("classes", &self.classes.len())
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}

fn existing_object(record: &InstanceRecord) -> Result<AnyObject> {
    match record.state() {
        InitState::Failed => Err(Error::InstanceFailed {
            name: record.name().to_string(),
        }),
        state => {
            debug!(name = %record.name(), ?state, "returning existing instance");
            Ok(record.object())
        }
    }
}
