//! Declarative class metadata: constructor, injection points, lifecycle hooks,
//! and job descriptor.
//!
//! A managed type describes itself once, through [`ClassBuilder`], instead of
//! relying on runtime introspection. Inheritance is modelled by composition: a
//! derived type embeds its base and declares a projection (`fn(&Derived) ->
//! &Base`) through which the base's injection points and hooks are re-targeted.
//! The resulting descriptor carries flattened, pre-ordered lists:
//!
//! - injection points: the type's own first, then inherited ones
//! - init hooks: own before inherited
//! - destructors: most-derived first; only the first one is ever invoked

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::managed_ref::ManagedRef;
use crate::service::BackgroundService;

/// Type-erased managed object as stored by the instance registry.
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// Asynchronous lifecycle hook declared as a method: `fn hook(&self) -> BoxFuture<'_, _>`.
pub type HookFn<T> = for<'a> fn(&'a T) -> BoxFuture<'a, anyhow::Result<()>>;

type Constructor = Arc<dyn Fn(&ConstructContext<'_>) -> anyhow::Result<AnyObject> + Send + Sync>;
type Apply = Arc<dyn Fn(&(dyn Any + Send + Sync), Injected) -> Result<()> + Send + Sync>;
type ServiceCaster = fn(AnyObject) -> Option<Arc<dyn BackgroundService>>;

/// Implemented by every type the registry can construct on its own.
pub trait Component: Any + Send + Sync + Sized {
    fn describe() -> ClassDescriptor;
}

/// Read-only view of the live objects of the registry performing a
/// construction.
pub trait ObjectLookup: Send + Sync {
    /// Exact-name lookup; bare class names resolve to `<FQN>:default`.
    fn get_object(&self, name: &str) -> Option<AnyObject>;
}

// ---------------------------------------------------------------------------
// ConstructContext
// ---------------------------------------------------------------------------

/// Inputs handed to a class constructor.
pub struct ConstructContext<'a> {
    /// FQN of the class being constructed.
    pub fqn: String,
    /// Canonical instance name (`<FQN>:<local>`).
    pub name: String,
    /// Constructor arguments, forwarded verbatim from the caller.
    pub args: Vec<Value>,
    /// Shared configuration source.
    pub config: Arc<dyn ConfigSource>,
    /// The registry constructing this object. Objects still initializing
    /// are visible here.
    pub registry: &'a dyn ObjectLookup,
}

impl ConstructContext<'_> {
    /// Deserializes the positional argument at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the argument is absent or does not deserialize into `V`.
    pub fn arg<V: DeserializeOwned>(&self, index: usize) -> anyhow::Result<V> {
        let raw = self
            .args
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("{}: missing constructor argument {index}", self.fqn))?;
        Ok(serde_json::from_value(raw.clone())?)
    }

    /// Looks up an already registered object of type `O`.
    #[must_use]
    pub fn lookup<O: Any + Send + Sync>(&self, name: &str) -> Option<Arc<O>> {
        self.registry.get_object(name)?.downcast::<O>().ok()
    }
}

// ---------------------------------------------------------------------------
// Injection points
// ---------------------------------------------------------------------------

/// What an injection point asks the registry for.
#[derive(Debug, Clone)]
pub enum InjectionKind {
    /// A single configuration value; `default` is used when the path is absent.
    ConfigValue { path: String, default: Option<Value> },
    /// The whole configuration tree.
    ConfigWhole,
    /// A logger scoped to the instance.
    Logger,
    /// A database connection looked up by datastore name.
    Repository { datastore: Option<String> },
    /// A cache connection looked up by datastore name.
    Cache { datastore: Option<String> },
    /// Another managed object, created on demand.
    Managed {
        type_id: TypeId,
        name: Option<String>,
        args: Vec<Value>,
        describe: fn() -> ClassDescriptor,
    },
}

impl InjectionKind {
    /// Resolution phase; lower phases are resolved first.
    #[must_use]
    pub fn phase(&self) -> u8 {
        match self {
            Self::ConfigValue { .. } | Self::ConfigWhole => 0,
            Self::Logger => 1,
            Self::Repository { .. } | Self::Cache { .. } => 2,
            Self::Managed { .. } => 3,
        }
    }
}

/// A value resolved by the registry for one injection point.
pub enum Injected {
    Config(Value),
    Logger(Logger),
    Connection(Arc<dyn Any + Send + Sync>),
    Managed { name: String, object: AnyObject },
}

/// A declared dependency on a member of a managed class.
#[derive(Clone)]
pub struct InjectionPoint {
    /// Declaring class FQN.
    pub owner: String,
    /// Member the value is stored into.
    pub member: &'static str,
    pub kind: InjectionKind,
    apply: Apply,
}

impl InjectionPoint {
    /// Stores `value` into `target`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `target` is not the declaring type and
    /// `Configuration` if `value` cannot be converted to the member's type.
    pub fn apply(&self, target: &(dyn Any + Send + Sync), value: Injected) -> Result<()> {
        (self.apply)(target, value)
    }
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("owner", &self.owner)
            .field("member", &self.member)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

trait ErasedHook: Send + Sync {
    fn call<'a>(&self, target: &'a (dyn Any + Send + Sync)) -> BoxFuture<'a, anyhow::Result<()>>;
}

struct TypedHook<T> {
    hook: HookFn<T>,
}

impl<T: Any + Send + Sync> ErasedHook for TypedHook<T> {
    fn call<'a>(&self, target: &'a (dyn Any + Send + Sync)) -> BoxFuture<'a, anyhow::Result<()>> {
        match target.downcast_ref::<T>() {
            Some(this) => (self.hook)(this),
            None => wrong_target::<T>(),
        }
    }
}

struct ProjectedHook<T, B> {
    project: fn(&T) -> &B,
    inner: Arc<dyn ErasedHook>,
}

impl<T: Any + Send + Sync, B: Any + Send + Sync> ErasedHook for ProjectedHook<T, B> {
    fn call<'a>(&self, target: &'a (dyn Any + Send + Sync)) -> BoxFuture<'a, anyhow::Result<()>> {
        match target.downcast_ref::<T>() {
            Some(this) => {
                let base: &'a B = (self.project)(this);
                self.inner.call(base)
            }
            None => wrong_target::<T>(),
        }
    }
}

fn wrong_target<T>() -> BoxFuture<'static, anyhow::Result<()>> {
    let expected = type_name::<T>();
    Box::pin(async move { Err(anyhow::anyhow!("hook target is not a {expected}")) })
}

/// An init hook or destructor, tagged with the class that declared it.
#[derive(Clone)]
pub struct LifecycleHook {
    /// Declaring class FQN.
    pub owner: String,
    hook: Arc<dyn ErasedHook>,
}

impl LifecycleHook {
    /// Runs the hook against `target`.
    pub fn invoke<'a>(&self, target: &'a (dyn Any + Send + Sync)) -> BoxFuture<'a, anyhow::Result<()>> {
        self.hook.call(target)
    }
}

impl fmt::Debug for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHook")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// Marks a class as a background job. `schedule: None` means run exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDescriptor {
    pub schedule: Option<String>,
}

// ---------------------------------------------------------------------------
// ClassDescriptor
// ---------------------------------------------------------------------------

/// Everything the registry needs to build, wire, and tear down one class.
#[derive(Clone)]
pub struct ClassDescriptor {
    fqn: String,
    type_id: TypeId,
    type_name: &'static str,
    constructor: Constructor,
    injections: Vec<InjectionPoint>,
    init_hooks: Vec<LifecycleHook>,
    destructors: Vec<LifecycleHook>,
    job: Option<JobDescriptor>,
    as_service: Option<ServiceCaster>,
}

impl ClassDescriptor {
    /// Starts a descriptor for `T` with an explicit constructor.
    pub fn builder<T, F>(constructor: F) -> ClassBuilder<T>
    where
        T: Any + Send + Sync,
        F: Fn(&ConstructContext<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        ClassBuilder::new(constructor)
    }

    /// Starts a descriptor for `T` constructed through `Default`.
    #[must_use]
    pub fn with_default<T>() -> ClassBuilder<T>
    where
        T: Any + Send + Sync + Default,
    {
        ClassBuilder::new(|_ctx: &ConstructContext<'_>| Ok(T::default()))
    }

    #[must_use]
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Builds a fresh, uninjected object.
    ///
    /// # Errors
    ///
    /// Wraps constructor failures in [`Error::Construction`].
    pub fn construct(&self, ctx: &ConstructContext<'_>) -> Result<AnyObject> {
        (self.constructor)(ctx).map_err(|source| Error::Construction {
            fqn: self.fqn.clone(),
            source,
        })
    }

    /// Injection points in resolution order: grouped by phase, then own before
    /// inherited, then declaration order.
    #[must_use]
    pub fn injections(&self) -> Vec<&InjectionPoint> {
        let mut points: Vec<&InjectionPoint> = self.injections.iter().collect();
        // Stable sort keeps own-before-inherited and declaration order per phase.
        points.sort_by_key(|point| point.kind.phase());
        points
    }

    #[must_use]
    pub fn init_hooks(&self) -> &[LifecycleHook] {
        &self.init_hooks
    }

    /// The most-derived destructor, if any class in the chain declared one.
    #[must_use]
    pub fn destructor(&self) -> Option<&LifecycleHook> {
        self.destructors.first()
    }

    #[must_use]
    pub fn job(&self) -> Option<&JobDescriptor> {
        self.job.as_ref()
    }

    /// Views a constructed object of this class as a [`BackgroundService`].
    #[must_use]
    pub fn as_service(&self, object: AnyObject) -> Option<Arc<dyn BackgroundService>> {
        self.as_service.and_then(|cast| cast(object))
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("fqn", &self.fqn)
            .field("type_name", &self.type_name)
            .field("injections", &self.injections)
            .field("init_hooks", &self.init_hooks.len())
            .field("destructors", &self.destructors.len())
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ClassBuilder
// ---------------------------------------------------------------------------

/// Builder for [`ClassDescriptor`]. Own declarations always precede inherited
/// ones in the built descriptor, regardless of call order.
pub struct ClassBuilder<T> {
    fqn: String,
    constructor: Constructor,
    injections: Vec<InjectionPoint>,
    inherited_injections: Vec<InjectionPoint>,
    init_hooks: Vec<LifecycleHook>,
    inherited_init_hooks: Vec<LifecycleHook>,
    destructor: Option<LifecycleHook>,
    inherited_destructors: Vec<LifecycleHook>,
    job: Option<JobDescriptor>,
    as_service: Option<ServiceCaster>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    fn new<F>(constructor: F) -> Self
    where
        F: Fn(&ConstructContext<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            fqn: type_name::<T>().to_string(),
            constructor: Arc::new(move |ctx: &ConstructContext<'_>| {
                constructor(ctx).map(|object| Arc::new(object) as AnyObject)
            }),
            injections: Vec::new(),
            inherited_injections: Vec::new(),
            init_hooks: Vec::new(),
            inherited_init_hooks: Vec::new(),
            destructor: None,
            inherited_destructors: Vec::new(),
            job: None,
            as_service: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Overrides the default FQN (`std::any::type_name::<T>()`).
    #[must_use]
    pub fn fqn(mut self, fqn: impl Into<String>) -> Self {
        self.fqn = fqn.into();
        self
    }

    fn point(&mut self, member: &'static str, kind: InjectionKind, apply: Apply) {
        self.injections.push(InjectionPoint {
            owner: self.fqn.clone(),
            member,
            kind,
            apply,
        });
    }

    /// Injects the configuration value at `path`, deserialized into `V`.
    #[must_use]
    pub fn inject_config<V>(
        mut self,
        member: &'static str,
        path: &str,
        default: Option<Value>,
        set: fn(&T, V),
    ) -> Self
    where
        V: DeserializeOwned + 'static,
    {
        let path_owned = path.to_string();
        let apply: Apply = Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
            let this = downcast::<T>(target)?;
            let Injected::Config(raw) = value else {
                return Err(unexpected(member));
            };
            let parsed = serde_json::from_value::<V>(raw).map_err(|err| {
                Error::configuration(format!("config path {path_owned} for {member}: {err}"))
            })?;
            set(this, parsed);
            Ok(())
        });
        let kind = InjectionKind::ConfigValue {
            path: path.to_string(),
            default,
        };
        self.point(member, kind, apply);
        self
    }

    /// Injects the whole configuration tree.
    #[must_use]
    pub fn inject_whole_config(mut self, member: &'static str, set: fn(&T, Value)) -> Self {
        let apply: Apply = Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
            let this = downcast::<T>(target)?;
            let Injected::Config(raw) = value else {
                return Err(unexpected(member));
            };
            set(this, raw);
            Ok(())
        });
        self.point(member, InjectionKind::ConfigWhole, apply);
        self
    }

    /// Injects a [`Logger`] scoped to the instance's canonical name.
    #[must_use]
    pub fn inject_logger(mut self, member: &'static str, set: fn(&T, Logger)) -> Self {
        let apply: Apply = Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
            let this = downcast::<T>(target)?;
            let Injected::Logger(logger) = value else {
                return Err(unexpected(member));
            };
            set(this, logger);
            Ok(())
        });
        self.point(member, InjectionKind::Logger, apply);
        self
    }

    /// Injects the database connection registered under `datastore`.
    #[must_use]
    pub fn inject_repository<C>(
        mut self,
        member: &'static str,
        datastore: Option<&str>,
        set: fn(&T, Arc<C>),
    ) -> Self
    where
        C: Any + Send + Sync,
    {
        let kind = InjectionKind::Repository {
            datastore: datastore.map(str::to_string),
        };
        self.point(member, kind, connection_apply::<T, C>(member, set));
        self
    }

    /// Injects the cache connection registered under `datastore`.
    #[must_use]
    pub fn inject_cache<C>(
        mut self,
        member: &'static str,
        datastore: Option<&str>,
        set: fn(&T, Arc<C>),
    ) -> Self
    where
        C: Any + Send + Sync,
    {
        let kind = InjectionKind::Cache {
            datastore: datastore.map(str::to_string),
        };
        self.point(member, kind, connection_apply::<T, C>(member, set));
        self
    }

    /// Injects another managed object, creating it on demand.
    ///
    /// `name` is the dependency's local (or canonical) name; `None` resolves
    /// to `default`.
    #[must_use]
    pub fn inject_managed<D>(
        mut self,
        member: &'static str,
        name: Option<&str>,
        args: Vec<Value>,
        set: fn(&T, ManagedRef<D>),
    ) -> Self
    where
        D: Component,
    {
        let apply: Apply = Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
            let this = downcast::<T>(target)?;
            let Injected::Managed { name, object } = value else {
                return Err(unexpected(member));
            };
            let typed = object.downcast::<D>().map_err(|_| Error::TypeMismatch {
                name: name.clone(),
                expected: type_name::<D>(),
            })?;
            set(this, ManagedRef::new(name, Arc::downgrade(&typed)));
            Ok(())
        });
        // The dependency is described lazily: describing it here would recurse
        // forever on cyclic graphs.
        let kind = InjectionKind::Managed {
            type_id: TypeId::of::<D>(),
            name: name.map(str::to_string),
            args,
            describe: D::describe,
        };
        self.point(member, kind, apply);
        self
    }

    /// Declares a post-construction hook. Hooks run in declaration order.
    #[must_use]
    pub fn on_init(mut self, hook: HookFn<T>) -> Self {
        self.init_hooks.push(LifecycleHook {
            owner: self.fqn.clone(),
            hook: Arc::new(TypedHook { hook }),
        });
        self
    }

    /// Declares this class's destructor. A class declares at most one; a
    /// second call replaces the first.
    #[must_use]
    pub fn on_destroy(mut self, hook: HookFn<T>) -> Self {
        self.destructor = Some(LifecycleHook {
            owner: self.fqn.clone(),
            hook: Arc::new(TypedHook { hook }),
        });
        self
    }

    /// Inherits `B`'s injection points and hooks through `project`.
    #[must_use]
    pub fn inherit<B: Component>(mut self, project: fn(&T) -> &B) -> Self {
        let base = B::describe();

        for point in base.injections {
            let inner = point.apply;
            let apply: Apply = Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
                let this = downcast::<T>(target)?;
                let base: &(dyn Any + Send + Sync) = project(this);
                inner(base, value)
            });
            self.inherited_injections.push(InjectionPoint { apply, ..point });
        }

        let reproject = |hook: LifecycleHook| LifecycleHook {
            owner: hook.owner,
            hook: Arc::new(ProjectedHook {
                project,
                inner: hook.hook,
            }),
        };
        self.inherited_init_hooks
            .extend(base.init_hooks.into_iter().map(reproject));
        self.inherited_destructors
            .extend(base.destructors.into_iter().map(reproject));
        self
    }

    /// Finalizes the descriptor.
    #[must_use]
    pub fn build(self) -> ClassDescriptor {
        let mut injections = self.injections;
        injections.extend(self.inherited_injections);
        let mut init_hooks = self.init_hooks;
        init_hooks.extend(self.inherited_init_hooks);
        let mut destructors: Vec<LifecycleHook> = self.destructor.into_iter().collect();
        destructors.extend(self.inherited_destructors);

        ClassDescriptor {
            fqn: self.fqn,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            constructor: self.constructor,
            injections,
            init_hooks,
            destructors,
            job: self.job,
            as_service: self.as_service,
        }
    }
}

impl<T: BackgroundService> ClassBuilder<T> {
    /// Marks the class as a background job. `schedule: None` makes it one-shot
    /// unless the service itself reports a schedule.
    #[must_use]
    pub fn job(mut self, schedule: Option<&str>) -> Self {
        self.job = Some(JobDescriptor {
            schedule: schedule.map(str::to_string),
        });
        self.as_service = Some(cast_service::<T>);
        self
    }
}

fn cast_service<T: BackgroundService>(object: AnyObject) -> Option<Arc<dyn BackgroundService>> {
    object
        .downcast::<T>()
        .ok()
        .map(|service| service as Arc<dyn BackgroundService>)
}

fn connection_apply<T, C>(member: &'static str, set: fn(&T, Arc<C>)) -> Apply
where
    T: Any + Send + Sync,
    C: Any + Send + Sync,
{
    Arc::new(move |target: &(dyn Any + Send + Sync), value: Injected| {
        let this = downcast::<T>(target)?;
        let Injected::Connection(connection) = value else {
            return Err(unexpected(member));
        };
        let typed = connection.downcast::<C>().map_err(|_| {
            Error::configuration(format!(
                "connection injected into {member} is not a {}",
                type_name::<C>()
            ))
        })?;
        set(this, typed);
        Ok(())
    })
}

fn downcast<T: Any>(target: &(dyn Any + Send + Sync)) -> Result<&T> {
    target.downcast_ref::<T>().ok_or(Error::TypeMismatch {
        name: "injection target".to_string(),
        expected: type_name::<T>(),
    })
}

fn unexpected(member: &str) -> Error {
    Error::configuration(format!("unexpected value kind injected into {member}"))
}
