//! Object Pool - process-wide singleton cache with constructor injection.
//!
//! Types are the wiring: a type's [`ConstructorSpec`] lists the dependencies it
//! needs, and the pool resolves each of them as a singleton before calling the
//! constructor. There is no separate binding step.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::component::{Arguments, Component, ConstructorSpec, DependencyKind, Injectable};
use crate::error::{PoolError, PoolResult};
use crate::type_key::TypeKey;
use crate::utils::dependency::{find_cycle, CreationTracker};

#[derive(Default)]
struct PoolState {
    registry: HashMap<TypeKey, Arc<dyn Component>>,
    /// Keys in first-insertion order; teardown walks it backwards.
    creation_order: Vec<TypeKey>,
    creation_tracker: CreationTracker,
    closed: bool,
}

impl PoolState {
    fn insert(&mut self, key: TypeKey, instance: Arc<dyn Component>) -> bool {
        let replaced = self.registry.insert(key, instance).is_some();
        if !replaced {
            self.creation_order.push(key);
        }
        replaced
    }

    /// Slots are only ever filled under `TypeKey::of::<T>()` with a `T`, so
    /// the downcast cannot fail.
    fn cached<T: Component>(&self, key: &TypeKey) -> Option<Arc<T>> {
        let instance = Arc::clone(self.registry.get(key)?);
        match instance.downcast_arc::<T>() {
            Ok(instance) => Some(instance),
            Err(_) => unreachable!("pool slot '{}' holds an instance of another type", key),
        }
    }
}

/// Singleton registry keyed by [`TypeKey`].
///
/// Shared by every request for the lifetime of the process. The registry lock
/// is reentrant: the check-create-insert sequence of [`lookup`](Self::lookup)
/// is atomic with respect to other threads, while the nested lookups a
/// constructor performs on the same thread go through.
pub struct ObjectPool {
    state: ReentrantMutex<RefCell<PoolState>>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(PoolState::default())),
        }
    }

    /// Registers an already-constructed object, replacing any previous entry
    /// for its type.
    pub fn put<T: Component>(&self, instance: T) -> &Self {
        self.put_arc(Arc::new(instance))
    }

    /// Same as [`put`](Self::put) for an object that is already shared.
    pub fn put_arc<T: Component>(&self, instance: Arc<T>) -> &Self {
        let key = TypeKey::of::<T>();
        let guard = self.state.lock();
        let replaced = guard.borrow_mut().insert(key, instance);
        if replaced {
            tracing::debug!("Replaced pooled instance of '{}'", key);
        } else {
            tracing::debug!("Put instance of '{}' into pool", key);
        }
        self
    }

    /// Returns the singleton of `T`, creating and caching it on first use.
    ///
    /// Repeated calls return the same `Arc`. Nothing is cached when
    /// construction fails.
    pub fn lookup<T: Injectable>(&self) -> PoolResult<Arc<T>> {
        let key = TypeKey::of::<T>();
        let guard = self.state.lock();

        if let Some(instance) = guard.borrow().cached::<T>(&key) {
            tracing::trace!("Returning pooled instance of '{}'", key);
            return Ok(instance);
        }

        let instance = Arc::new(self.instantiate::<T>()?);
        guard.borrow_mut().insert(key, Arc::clone(&instance) as Arc<dyn Component>);

        tracing::debug!("Singleton '{}' created and pooled", key);
        Ok(instance)
    }

    /// Returns the pooled instance of `T` without constructing anything.
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        let key = TypeKey::of::<T>();
        let guard = self.state.lock();
        let cached = guard.borrow().cached::<T>(&key);
        cached
    }

    /// Constructs a new `T` without consulting or updating the cache.
    ///
    /// Dependencies are still resolved as singletons through
    /// [`lookup`](Self::lookup).
    ///
    /// # Errors
    ///
    /// - [`PoolError::TypelessArgument`] when a required parameter has no
    ///   injectable type; reported before anything is constructed.
    /// - [`PoolError::CircularDependency`] when `T` is already being built
    ///   further up the resolution chain.
    /// - Any error of a dependency's constructor, unchanged.
    pub fn instantiate<T: Injectable>(&self) -> PoolResult<T> {
        let key = TypeKey::of::<T>();
        let spec = T::constructor_spec();

        if let Some(param) = spec.first_typeless() {
            return Err(PoolError::TypelessArgument {
                type_name: key.name(),
                param: param.name(),
            });
        }

        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if !state.creation_tracker.start_creating(key) {
                let chain = state.creation_tracker.chain_to(&key);
                tracing::error!(
                    "Circular dependency detected while creating '{}'. Creation chain: {:?}",
                    key,
                    chain
                );
                return Err(PoolError::CircularDependency { chain });
            }
        }

        // Clears the in-progress marker on every exit path, unwinding included.
        struct CreationGuard<'a> {
            pool: &'a ObjectPool,
            key: TypeKey,
        }

        impl Drop for CreationGuard<'_> {
            fn drop(&mut self) {
                let guard = self.pool.state.lock();
                guard
                    .borrow_mut()
                    .creation_tracker
                    .finish_creating(&self.key);
            }
        }

        let _creation = CreationGuard { pool: self, key };

        tracing::debug!(
            type_name = key.name(),
            params = spec.len(),
            "Instantiating object"
        );
        T::construct(&Arguments::new(self, key))
    }

    /// Checks that `T` can be resolved, without constructing anything.
    ///
    /// Walks the constructor graph and reports the first typeless parameter,
    /// missing provided instance, or dependency cycle. Types already in the
    /// pool count as resolved.
    pub fn verify<T: Injectable>(&self) -> PoolResult<()> {
        let root = TypeKey::of::<T>();
        let pooled: HashSet<TypeKey> = self.keys().into_iter().collect();

        let mut graph: HashMap<TypeKey, Vec<TypeKey>> = HashMap::new();
        let mut pending: Vec<(TypeKey, ConstructorSpec)> = vec![(root, T::constructor_spec())];

        while let Some((key, spec)) = pending.pop() {
            if graph.contains_key(&key) {
                continue;
            }
            if pooled.contains(&key) {
                graph.insert(key, Vec::new());
                continue;
            }

            let mut edges = Vec::with_capacity(spec.len());
            for param in spec.params() {
                let Some(dependency) = param.dependency() else {
                    return Err(PoolError::TypelessArgument {
                        type_name: key.name(),
                        param: param.name(),
                    });
                };
                match dependency.kind() {
                    DependencyKind::Provided => {
                        if !pooled.contains(&dependency.key()) {
                            return Err(PoolError::NotProvided {
                                type_name: key.name(),
                                param: param.name(),
                                dependency: dependency.key().name(),
                            });
                        }
                    }
                    DependencyKind::Resolved { spec } => {
                        edges.push(dependency.key());
                        pending.push((dependency.key(), spec()));
                    }
                }
            }
            graph.insert(key, edges);
        }

        if let Some(chain) = find_cycle(root, &graph) {
            return Err(PoolError::CircularDependency { chain });
        }

        tracing::debug!(
            "Dependency graph of '{}' verified ({} type(s))",
            root,
            graph.len()
        );
        Ok(())
    }

    pub fn contains<T: Component>(&self) -> bool {
        let key = TypeKey::of::<T>();
        let guard = self.state.lock();
        let found = guard.borrow().registry.contains_key(&key);
        found
    }

    /// Keys of the pooled instances, in creation order.
    pub fn keys(&self) -> Vec<TypeKey> {
        let guard = self.state.lock();
        let keys = guard.borrow().creation_order.clone();
        keys
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().registry.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        let guard = self.state.lock();
        let closed = guard.borrow().closed;
        closed
    }

    /// Tears down every pooled instance, most recently created first.
    ///
    /// Teardown is best-effort: a failing or panicking `close` is logged and
    /// the remaining instances are still closed. Afterwards the pool is empty
    /// and refuses to construct. Closing twice is a no-op.
    pub fn close(&self) {
        let instances: Vec<(TypeKey, Arc<dyn Component>)> = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if state.closed {
                tracing::debug!("Object pool already closed");
                return;
            }
            state.closed = true;

            let order = std::mem::take(&mut state.creation_order);
            let mut registry = std::mem::take(&mut state.registry);
            order
                .into_iter()
                .rev()
                .filter_map(|key| registry.remove(&key).map(|instance| (key, instance)))
                .collect()
        };

        tracing::info!("Closing object pool ({} pooled object(s))", instances.len());

        for (key, instance) in instances {
            match catch_unwind(AssertUnwindSafe(|| instance.close())) {
                Ok(Ok(())) => tracing::debug!("Pooled object '{}' closed", key),
                Ok(Err(e)) => tracing::warn!("Call close failed for object '{}': {:#}", key, e),
                Err(_) => tracing::warn!("Call close panicked for object '{}'", key),
            }
        }

        tracing::info!("Object pool closed");
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.keys();
        f.debug_struct("ObjectPool")
            .field("pooled", &keys)
            .field("closed", &self.is_closed())
            .finish()
    }
}
