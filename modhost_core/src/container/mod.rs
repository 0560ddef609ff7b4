//! Service container.
//!
//! Resolves, constructs and disposes service instances by type and optional
//! key. Registrations may be concrete types or trait objects; every value is
//! handed out as an `Arc<T>`.
//!
//! Construction is explicit rather than reflective: a type either implements
//! [`Injectable`] (the container builds it, resolving its dependencies
//! recursively) or is registered with a factory closure. Lazily built plugin
//! candidates are added as [`Export`]s carrying declarative metadata, so
//! callers can filter on metadata before paying the construction cost.

mod export;
#[cfg(test)]
mod tests;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub use export::Export;

use crate::error::ContainerError;
use crate::guard;

pub type Result<T> = std::result::Result<T, ContainerError>;

/// A type the container can construct on demand.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Build an instance, resolving dependencies from `container`.
    fn create(container: &Container) -> anyhow::Result<Self>;

    /// Hook for types that need disposal; return `Some(this.clone())`.
    fn disposer(_this: &Arc<Self>) -> Option<Arc<dyn Disposable>> {
        None
    }
}

/// Something holding resources that must be released with the container.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// An externally created object that pulls its dependencies from a container.
pub trait Inject {
    fn inject(&self, container: &Container) -> anyhow::Result<()>;
}

type Stored = Box<dyn Any + Send + Sync>;
type StoredFactory = Arc<dyn Fn(&Container) -> anyhow::Result<Stored> + Send + Sync>;
type ExportResolver = Arc<dyn Fn(&Container) -> Result<Stored> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    type_id: TypeId,
    key: Option<String>,
}

impl ServiceKey {
    fn of<T: ?Sized + 'static>(key: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key: key.map(str::to_string),
        }
    }
}

enum Slot {
    Ready(Stored),
    Factory(StoredFactory),
}

struct Registration {
    key: ServiceKey,
    type_name: &'static str,
    slot: Slot,
}

struct ExportEntry {
    contract: TypeId,
    metadata: TypeId,
    export: Stored,
    resolve: ExportResolver,
}

#[derive(Default)]
struct State {
    registrations: Vec<Registration>,
    index: HashMap<ServiceKey, usize>,
    exports: Vec<ExportEntry>,
    owned: Vec<(&'static str, Arc<dyn Disposable>)>,
    disposed: bool,
}

/// Per-session service container.
#[derive(Default)]
pub struct Container {
    state: Mutex<State>,
    constructing: Mutex<Vec<(Frame, &'static str)>>,
}

/// What is under construction: a service by type, or one export by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Service(TypeId),
    Export(usize),
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an externally owned singleton. The container never disposes it.
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, value: Arc<T>) -> Result<()> {
        self.insert(ServiceKey::of::<T>(None), type_name::<T>(), Slot::Ready(Box::new(value)))
    }

    /// Register an externally owned singleton under `key`.
    pub fn register_keyed<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &str,
        value: Arc<T>,
    ) -> Result<()> {
        self.insert(
            ServiceKey::of::<T>(Some(key)),
            type_name::<T>(),
            Slot::Ready(Box::new(value)),
        )
    }

    /// Register a lazily built singleton.
    ///
    /// The factory runs on first resolution; the result is cached. Factories
    /// that build disposable instances hand them to [`Container::own`].
    pub fn register_factory<T, F>(&self, factory: F) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Container) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: StoredFactory = Arc::new(move |container| {
            let value: Stored = Box::new(factory(container)?);
            Ok(value)
        });
        self.insert(ServiceKey::of::<T>(None), type_name::<T>(), Slot::Factory(factory))
    }

    /// Take ownership of a disposable; it is disposed with the container.
    pub fn own(&self, name: &'static str, disposable: Arc<dyn Disposable>) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        state.owned.push((name, disposable));
        Ok(())
    }

    /// Whether a registration exists for `T` without a key.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let state = self.state.lock();
        !state.disposed && state.index.contains_key(&ServiceKey::of::<T>(None))
    }

    /// Fetch a registered (or factory-built) instance of `T`.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_by_key::<T>(ServiceKey::of::<T>(None))
    }

    /// Fetch a registered instance of `T` stored under `key`.
    pub fn get_keyed<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        self.get_by_key::<T>(ServiceKey::of::<T>(Some(key)))
    }

    /// Return the existing instance of `T`, or construct, cache and return one.
    ///
    /// Calling this twice yields the same `Arc`.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>> {
        let key = ServiceKey::of::<T>(None);
        if self.registered(&key)? {
            return self.get_by_key::<T>(key);
        }

        let name = type_name::<T>();
        let value = self.construct(Frame::Service(key.type_id), name, || T::create(self))?;
        let value = Arc::new(value);

        let mut state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        // A dependency's constructor may have registered T meanwhile; first one wins.
        if let Some(&index) = state.index.get(&key) {
            if let Slot::Ready(existing) = &state.registrations[index].slot {
                if let Some(existing) = existing.downcast_ref::<Arc<T>>() {
                    return Ok(existing.clone());
                }
            }
        }
        Self::insert_locked(&mut state, key, name, Slot::Ready(Box::new(value.clone())));
        if let Some(disposer) = T::disposer(&value) {
            state.owned.push((name, disposer));
        }
        debug!(service = name, "Constructed service");
        Ok(value)
    }

    /// Every registration of `T` (any key) in registration order, then every
    /// export of contract `T` in export order.
    pub fn resolve_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let (keys, resolvers) = {
            let state = self.state.lock();
            if state.disposed {
                return Err(ContainerError::Disposed);
            }
            let keys: Vec<ServiceKey> = state
                .registrations
                .iter()
                .filter(|registration| registration.key.type_id == TypeId::of::<T>())
                .map(|registration| registration.key.clone())
                .collect();
            let resolvers: Vec<ExportResolver> = state
                .exports
                .iter()
                .filter(|entry| entry.contract == TypeId::of::<T>())
                .map(|entry| entry.resolve.clone())
                .collect();
            (keys, resolvers)
        };

        let mut all = Vec::with_capacity(keys.len() + resolvers.len());
        for key in keys {
            all.push(self.get_by_key::<T>(key)?);
        }
        for resolve in resolvers {
            let stored = resolve(self)?;
            if let Some(value) = stored.downcast_ref::<Arc<T>>() {
                all.push(value.clone());
            }
        }
        Ok(all)
    }

    /// Inject dependencies into an object the container did not construct.
    pub fn build_up<I: Inject + ?Sized>(&self, target: &I) -> Result<()> {
        if self.state.lock().disposed {
            return Err(ContainerError::Disposed);
        }
        target
            .inject(self)
            .map_err(|err| Self::construction_error(type_name::<I>(), err))
    }

    /// Add a lazily constructed export of contract `T` described by `metadata`.
    pub fn add_export<T, M, F>(&self, origin: &str, metadata: M, factory: F) -> Result<Export<T, M>>
    where
        T: ?Sized + Send + Sync + 'static,
        M: Send + Sync + 'static,
        F: Fn(&Container) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let export = Export::new(origin, metadata, factory);
        let lazy = export.clone();
        let resolve: ExportResolver = Arc::new(move |container| {
            let value: Stored = Box::new(lazy.value(container)?);
            Ok(value)
        });

        let mut state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        state.exports.push(ExportEntry {
            contract: TypeId::of::<T>(),
            metadata: TypeId::of::<M>(),
            export: Box::new(export.clone()),
            resolve,
        });
        Ok(export)
    }

    /// Every export of contract `T` described by metadata `M`, in export order.
    ///
    /// Nothing is constructed; call [`Export::value`] on the ones you keep.
    pub fn get_exports<T, M>(&self) -> Result<Vec<Export<T, M>>>
    where
        T: ?Sized + Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        let state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        Ok(state
            .exports
            .iter()
            .filter(|entry| {
                entry.contract == TypeId::of::<T>() && entry.metadata == TypeId::of::<M>()
            })
            .filter_map(|entry| entry.export.downcast_ref::<Export<T, M>>().cloned())
            .collect())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Dispose every owned instance exactly once, newest first, then drop all
    /// registrations. Later calls are no-ops.
    pub fn dispose(&self) {
        let (registrations, exports, owned) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.index.clear();
            (
                std::mem::take(&mut state.registrations),
                std::mem::take(&mut state.exports),
                std::mem::take(&mut state.owned),
            )
        };

        debug!(owned = owned.len(), "Disposing container");
        for (name, disposable) in owned.into_iter().rev() {
            if let Err(failure) = guard::isolate(|| {
                disposable.dispose();
                Ok(())
            }) {
                warn!(service = name, error = %failure, "Service disposal failed");
            }
        }
        // Dropped outside the lock: values may hold Arcs back into the session.
        drop(exports);
        drop(registrations);
    }

    fn registered(&self, key: &ServiceKey) -> Result<bool> {
        let state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        Ok(state.index.contains_key(key))
    }

    fn get_by_key<T: ?Sized + Send + Sync + 'static>(&self, key: ServiceKey) -> Result<Arc<T>> {
        let name = type_name::<T>();
        let factory = {
            let state = self.state.lock();
            if state.disposed {
                return Err(ContainerError::Disposed);
            }
            let index = *state
                .index
                .get(&key)
                .ok_or_else(|| ContainerError::NotRegistered {
                    type_name: name,
                    key: key.key.clone(),
                })?;
            match &state.registrations[index].slot {
                Slot::Ready(value) => return Self::downcast::<T>(value, name),
                Slot::Factory(factory) => factory.clone(),
            }
        };

        let built = self.construct(Frame::Service(key.type_id), name, || factory(self))?;

        let mut state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        let index = *state
            .index
            .get(&key)
            .ok_or_else(|| ContainerError::NotRegistered {
                type_name: name,
                key: key.key.clone(),
            })?;
        let registration = &mut state.registrations[index];
        if let Slot::Ready(existing) = &registration.slot {
            return Self::downcast::<T>(existing, name);
        }
        let value = Self::downcast::<T>(&built, name)?;
        registration.slot = Slot::Ready(built);
        debug!(service = name, "Constructed service from factory");
        Ok(value)
    }

    fn construct<V, F>(&self, frame: Frame, name: &'static str, build: F) -> Result<V>
    where
        F: FnOnce() -> anyhow::Result<V>,
    {
        {
            let mut constructing = self.constructing.lock();
            if constructing.iter().any(|(open, _)| *open == frame) {
                return Err(ContainerError::CircularDependency(name));
            }
            constructing.push((frame, name));
        }

        // Popped even if the constructor unwinds.
        let _guard = ConstructionFrame {
            stack: &self.constructing,
            frame,
        };
        build().map_err(|err| Self::construction_error(name, err))
    }

    fn construction_error(name: &'static str, err: anyhow::Error) -> ContainerError {
        // Keep nested container errors (cycles, missing registrations) intact.
        match err.downcast::<ContainerError>() {
            Ok(inner) => inner,
            Err(other) => ContainerError::ConstructionFailed {
                type_name: name,
                message: format!("{:#}", other),
            },
        }
    }

    fn downcast<T: ?Sized + 'static>(value: &Stored, name: &'static str) -> Result<Arc<T>> {
        value
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| ContainerError::ConstructionFailed {
                type_name: name,
                message: "stored value has an unexpected type".to_string(),
            })
    }

    fn insert(&self, key: ServiceKey, name: &'static str, slot: Slot) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ContainerError::Disposed);
        }
        Self::insert_locked(&mut state, key, name, slot);
        Ok(())
    }

    fn insert_locked(state: &mut State, key: ServiceKey, name: &'static str, slot: Slot) {
        match state.index.get(&key) {
            Some(&index) => {
                let registration = &mut state.registrations[index];
                registration.type_name = name;
                registration.slot = slot;
            }
            None => {
                state.index.insert(key.clone(), state.registrations.len());
                state.registrations.push(Registration {
                    key,
                    type_name: name,
                    slot,
                });
            }
        }
    }
}

struct ConstructionFrame<'a> {
    stack: &'a Mutex<Vec<(Frame, &'static str)>>,
    frame: Frame,
}

impl Drop for ConstructionFrame<'_> {
    fn drop(&mut self) {
        self.stack.lock().retain(|(open, _)| *open != self.frame);
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Container")
            .field(
                "registrations",
                &state
                    .registrations
                    .iter()
                    .map(|registration| registration.type_name)
                    .collect::<Vec<_>>(),
            )
            .field("exports", &state.exports.len())
            .field("owned", &state.owned.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
