//! Error types shared by the pool and the request context manager.
//!
//! Library-facing failures are typed (`thiserror`); code supplied by users
//! (constructors, `enter`/`exit`, teardown) reports through `anyhow::Error`,
//! which is carried unchanged inside the typed variants.

use thiserror::Error;

/// Result alias for object pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Result alias for request context operations.
pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// Result alias for application bootstrap concerns (logging, config).
pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;

/// Errors raised while resolving or constructing pooled objects.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A required constructor parameter has no injectable type.
    ///
    /// This is a static configuration defect of `type_name`; it is never
    /// defaulted silently.
    #[error("{type_name} has a typeless argument: {param}")]
    TypelessArgument {
        type_name: &'static str,
        param: &'static str,
    },

    /// A type was requested again while it was still being constructed.
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<&'static str> },

    /// A parameter marked as provided has no instance in the pool.
    #[error("{type_name} requires {dependency} for argument '{param}', but no instance was put into the pool")]
    NotProvided {
        type_name: &'static str,
        param: &'static str,
        dependency: &'static str,
    },

    /// The pool has been closed and no longer constructs objects.
    #[error("Object pool is closed")]
    Closed,

    /// A constructor reported its own failure.
    #[error("Failed to construct {type_name}: {source}")]
    Construction {
        type_name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl PoolError {
    /// Wraps a user-level failure raised while building `T`.
    pub fn construction<T: ?Sized>(source: impl Into<anyhow::Error>) -> Self {
        PoolError::Construction {
            type_name: std::any::type_name::<T>(),
            source: source.into(),
        }
    }
}

/// Errors raised by the request context manager.
#[derive(Debug, Error)]
pub enum ContextError {
    /// An operation was attempted in the wrong lifecycle state.
    #[error("Request context manager is {found}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// A context failed to enter. Contexts entered before it were rolled back.
    #[error("Request context '{context}' failed to enter: {source}")]
    Enter {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A context failed to exit. Remaining contexts were still exited.
    #[error("Request context '{context}' failed to exit: {source}")]
    Exit {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A context could not be built from the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors raised while preparing the process (logging, configuration).
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),
}
