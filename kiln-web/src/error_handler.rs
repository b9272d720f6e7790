//! Application-wide error handling.
//!
//! A failing view produces an `anyhow::Error`. Registered [`ErrorHandler`]s
//! are consulted by ascending priority; the first one that claims the error
//! and returns a response answers the request. Otherwise a JSON
//! [`ErrorResponse`] is written, with the status taken from a
//! [`WebError`](crate::WebError) when the view returned one, or 500.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kiln_core::{Component, Injectable, ObjectPool, PoolResult, TypeKey};
use serde_json::Value;

use crate::error::WebError;

/// Custom handling for errors returned by views.
///
/// ```ignore
/// #[derive(Injectable)]
/// pub struct NotFoundHandler;
///
/// #[async_trait]
/// impl ErrorHandler for NotFoundHandler {
///     fn can_handle(&self, error: &anyhow::Error) -> bool {
///         error.is::<UserMissing>()
///     }
///
///     async fn handle(&self, error: &anyhow::Error, request_path: &str) -> Option<Response> {
///         Some(ErrorResponse::new(StatusCode::NOT_FOUND, "Not Found", error.to_string(), request_path).into_response())
///     }
/// }
///
/// kiln_web::error_handler!(NotFoundHandler);
/// ```
#[async_trait]
pub trait ErrorHandler: Component {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Lower runs first.
    fn priority(&self) -> i32 {
        100
    }

    fn can_handle(&self, error: &anyhow::Error) -> bool;

    /// `None` passes the error on to the next handler.
    async fn handle(&self, error: &anyhow::Error, request_path: &str) -> Option<Response>;
}

/// Standard error body.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(
        status: StatusCode,
        error: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: error.into(),
            message: message.into(),
            path: path.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Error handlers of an application, sorted by priority.
#[derive(Default)]
pub struct ErrorHandlerRegistry {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl ErrorHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ErrorHandler>) {
        tracing::debug!(
            "Registered error handler '{}' (priority {})",
            handler.name(),
            handler.priority()
        );
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.priority());
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn handle_error(&self, error: &anyhow::Error, request_path: &str) -> Response {
        for handler in &self.handlers {
            if !handler.can_handle(error) {
                continue;
            }
            if let Some(response) = handler.handle(error, request_path).await {
                tracing::debug!(
                    handler = handler.name(),
                    path = request_path,
                    "Error handled by custom handler"
                );
                return response;
            }
        }

        default_error_response(error, request_path).into_response()
    }
}

impl std::fmt::Debug for ErrorHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("ErrorHandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

fn default_error_response(error: &anyhow::Error, request_path: &str) -> ErrorResponse {
    let status = error
        .downcast_ref::<WebError>()
        .map(WebError::status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(
            path = request_path,
            status = status.as_u16(),
            "Unhandled error: {:#}",
            error
        );
    } else {
        tracing::debug!(path = request_path, status = status.as_u16(), "Request rejected: {}", error);
    }

    ErrorResponse::new(
        status,
        status.canonical_reason().unwrap_or("Unknown Error"),
        format!("{:#}", error),
        request_path,
    )
}

/// How to obtain one error handler type from the pool.
#[derive(Clone, Copy)]
pub struct ErrorHandlerDescriptor {
    key: TypeKey,
    lookup: fn(&ObjectPool) -> PoolResult<Arc<dyn ErrorHandler>>,
}

impl ErrorHandlerDescriptor {
    pub fn of<H: ErrorHandler + Injectable>() -> Self {
        fn lookup<H: ErrorHandler + Injectable>(
            pool: &ObjectPool,
        ) -> PoolResult<Arc<dyn ErrorHandler>> {
            let handler: Arc<dyn ErrorHandler> = pool.lookup::<H>()?;
            Ok(handler)
        }

        Self {
            key: TypeKey::of::<H>(),
            lookup: lookup::<H>,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn lookup(&self, pool: &ObjectPool) -> PoolResult<Arc<dyn ErrorHandler>> {
        (self.lookup)(pool)
    }
}

impl std::fmt::Debug for ErrorHandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ErrorHandlerDescriptor").field(&self.key).finish()
    }
}

/// Compile-time registration, see [`error_handler!`](crate::error_handler!).
pub struct ErrorHandlerRegistration {
    pub descriptor: fn() -> ErrorHandlerDescriptor,
    pub module_path: &'static str,
}

inventory::collect!(ErrorHandlerRegistration);
