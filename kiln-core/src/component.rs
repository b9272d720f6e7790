//! Pooled object contracts.
//!
//! Every value stored in an [`ObjectPool`](crate::ObjectPool) is a
//! [`Component`]. Types the pool can build on its own are [`Injectable`]: they
//! describe their required constructor parameters with a [`ConstructorSpec`]
//! and construct themselves from resolved [`Arguments`].
//!
//! `#[derive(Injectable)]` from `kiln-core-macros` generates both halves:
//!
//! ```ignore
//! use kiln_core::prelude::*;
//! use kiln_core_macros::Injectable;
//! use std::sync::Arc;
//!
//! #[derive(Injectable)]
//! struct UserRepository;
//!
//! #[derive(Injectable)]
//! #[injectable(close = "shutdown")]
//! struct UserService {
//!     repository: Arc<UserRepository>,
//!     #[inject(provided)]
//!     environment: Arc<Environment>,
//!     #[inject(default)]
//!     hits: std::sync::atomic::AtomicU64,
//! }
//!
//! impl UserService {
//!     fn shutdown(&self) {}
//! }
//! ```

use std::sync::Arc;

use downcast_rs::{impl_downcast, DowncastSync};

use crate::error::{PoolError, PoolResult};
use crate::pool::ObjectPool;
use crate::type_key::TypeKey;

/// A value that can live in the object pool.
pub trait Component: DowncastSync {
    /// Zero-argument teardown, invoked once by [`ObjectPool::close`].
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl_downcast!(sync Component);

/// A component the pool can construct by resolving its dependencies.
pub trait Injectable: Component + Sized {
    /// Required constructor parameters, in declaration order.
    fn constructor_spec() -> ConstructorSpec;

    /// Builds a new instance from resolved arguments.
    fn construct(args: &Arguments<'_>) -> PoolResult<Self>;
}

/// How a parameter's value is obtained.
#[derive(Clone, Copy)]
pub enum DependencyKind {
    /// Looked up (and created on demand) as a pool singleton.
    Resolved { spec: fn() -> ConstructorSpec },
    /// Must already be in the pool via `put`.
    Provided,
}

/// The declared type of a constructor parameter.
#[derive(Clone, Copy)]
pub struct Dependency {
    key: TypeKey,
    kind: DependencyKind,
}

impl Dependency {
    pub fn resolved<T: Injectable>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            kind: DependencyKind::Resolved {
                spec: T::constructor_spec,
            },
        }
    }

    pub fn provided<T: Component>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            kind: DependencyKind::Provided,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn kind(&self) -> DependencyKind {
        self.kind
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DependencyKind::Resolved { .. } => "resolved",
            DependencyKind::Provided => "provided",
        };
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("kind", &kind)
            .finish()
    }
}

/// One required constructor parameter.
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    name: &'static str,
    dependency: Option<Dependency>,
}

impl Parameter {
    pub fn typed(name: &'static str, dependency: Dependency) -> Self {
        Self {
            name,
            dependency: Some(dependency),
        }
    }

    /// A parameter the pool cannot identify a type for.
    pub fn typeless(name: &'static str) -> Self {
        Self {
            name,
            dependency: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dependency(&self) -> Option<&Dependency> {
        self.dependency.as_ref()
    }
}

/// Ordered list of the required parameters of a constructor.
#[derive(Debug, Clone, Default)]
pub struct ConstructorSpec {
    params: Vec<Parameter>,
}

impl ConstructorSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// First parameter without a declared dependency type.
    pub fn first_typeless(&self) -> Option<&Parameter> {
        self.params.iter().find(|p| p.dependency.is_none())
    }
}

/// Resolved constructor arguments for one `construct` call.
pub struct Arguments<'p> {
    pool: &'p ObjectPool,
    owner: TypeKey,
}

impl<'p> Arguments<'p> {
    pub(crate) fn new(pool: &'p ObjectPool, owner: TypeKey) -> Self {
        Self { pool, owner }
    }

    /// The pool arguments are resolved from.
    pub fn pool(&self) -> &'p ObjectPool {
        self.pool
    }

    /// Type being constructed.
    pub fn owner(&self) -> TypeKey {
        self.owner
    }

    /// Resolves a dependency as a pool singleton, creating it if needed.
    pub fn resolve<D: Injectable>(&self, param: &'static str) -> PoolResult<Arc<D>> {
        tracing::trace!(
            owner = self.owner.name(),
            param,
            dependency = std::any::type_name::<D>(),
            "Resolving constructor argument"
        );
        self.pool.lookup::<D>()
    }

    /// Fetches a dependency that must have been put into the pool.
    pub fn provided<D: Component>(&self, param: &'static str) -> PoolResult<Arc<D>> {
        self.pool.get::<D>().ok_or(PoolError::NotProvided {
            type_name: self.owner.name(),
            param,
            dependency: std::any::type_name::<D>(),
        })
    }

    /// Fails for a parameter whose type cannot be injected.
    pub fn typeless<V>(&self, param: &'static str) -> PoolResult<V> {
        Err(PoolError::TypelessArgument {
            type_name: self.owner.name(),
            param,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;

    impl Component for Leaf {}

    impl Injectable for Leaf {
        fn constructor_spec() -> ConstructorSpec {
            ConstructorSpec::new()
        }

        fn construct(_args: &Arguments<'_>) -> PoolResult<Self> {
            Ok(Leaf)
        }
    }

    #[test]
    fn test_first_typeless_keeps_declaration_order() {
        let spec = ConstructorSpec::new()
            .with(Parameter::typed("leaf", Dependency::resolved::<Leaf>()))
            .with(Parameter::typeless("name"))
            .with(Parameter::typeless("age"));

        assert_eq!(spec.len(), 3);
        assert_eq!(spec.first_typeless().map(Parameter::name), Some("name"));
    }

    #[test]
    fn test_fully_typed_spec_has_no_typeless() {
        let spec = ConstructorSpec::new()
            .with(Parameter::typed("leaf", Dependency::provided::<Leaf>()));
        assert!(spec.first_typeless().is_none());
        assert_eq!(
            spec.params()[0].dependency().map(|d| d.key()),
            Some(TypeKey::of::<Leaf>())
        );
    }

    #[test]
    fn test_component_downcast() {
        let component: Arc<dyn Component> = Arc::new(Leaf);
        assert!(component.is::<Leaf>());
        assert!(component.downcast_arc::<Leaf>().is_ok());
    }
}
