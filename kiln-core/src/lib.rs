// kiln-core: object pool and request context manager
//
// - Singletons keyed by type, built by constructor injection
// - Circular dependency detection and startup verification
// - Request-scoped contexts entered/exited around each request
// - Ambient lookup of the current request's contexts

// Lets `#[derive(Injectable)]` output (which names `::kiln_core`) compile
// inside this crate's own tests.
extern crate self as kiln_core;

pub mod ambient;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pool;
pub mod type_key;
pub mod utils;

use std::sync::Arc;

/// Return types accepted by a close hook: `()` or `anyhow::Result<()>`.
pub trait IntoResult {
    fn into_result(self) -> anyhow::Result<()>;
}

impl IntoResult for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl IntoResult for anyhow::Result<()> {
    fn into_result(self) -> anyhow::Result<()> {
        self
    }
}

/// Context of type `C` of the request executing on this thread.
///
/// `None` when no request is active or the request has no such context.
pub fn find_context<C: RequestContext>() -> Option<Arc<C>> {
    ambient::current()?.find_context::<C>()
}

pub use component::{Arguments, Component, ConstructorSpec, Dependency, Injectable, Parameter};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use context::{
    ContextDescriptor, ContextRegistration, ContextRegistry, ManagerState, RequestContext,
    RequestContextManager, RequestFailure,
};
pub use error::{
    ApplicationError, ApplicationResult, ContextError, ContextResult, PoolError, PoolResult,
};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use pool::ObjectPool;
pub use type_key::TypeKey;

// Used by `request_context!`, `#[derive(Injectable)]` and downstream
// registration macros.
pub use anyhow;
pub use inventory;

pub mod prelude {
    pub use crate::component::{Component, Injectable};
    pub use crate::config::{ConfigValue, Environment, PropertySource};
    pub use crate::context::{RequestContext, RequestFailure};
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::find_context;
    pub use crate::logging::LoggingConfig;
    pub use crate::pool::ObjectPool;
    pub use anyhow::{anyhow, Context};
}
