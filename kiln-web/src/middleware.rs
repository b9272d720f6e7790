//! Request hooks installed around every route.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use kiln_core::{
    ambient, ContextRegistry, ManagerState, ObjectPool, RequestContextManager, RequestFailure,
};

use crate::error::WebError;
use crate::error_handler::ErrorHandlerRegistry;

/// Shared state of the request context middleware.
#[derive(Clone)]
pub(crate) struct RequestScope {
    pub(crate) pool: Arc<ObjectPool>,
    pub(crate) contexts: Arc<ContextRegistry>,
    pub(crate) errors: Arc<ErrorHandlerRegistry>,
}

/// Enters a fresh set of request contexts before the handler and exits them
/// afterwards with the request's failure, if any.
///
/// The whole request runs inside [`ambient::scope`], so
/// `kiln_core::find_context` resolves against this request's manager only.
pub(crate) async fn request_contexts(
    State(scope): State<RequestScope>,
    request: Request,
    next: Next,
) -> Response {
    ambient::scope(run_in_contexts(scope, request, next)).await
}

async fn run_in_contexts(scope: RequestScope, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    let manager = match scope.contexts.new_manager(&scope.pool) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(path = %path, "Failed to build request contexts: {}", e);
            return scope.errors.handle_error(&e.into(), &path).await;
        }
    };

    if let Err(e) = manager.enter() {
        return scope.errors.handle_error(&e.into(), &path).await;
    }
    let cancel = ExitOnCancel {
        manager: Some(Arc::clone(&manager)),
        path: path.clone(),
    };

    let (response, failure) = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => {
            let failure = response.extensions().get::<RequestFailure>().cloned();
            (response, failure)
        }
        Err(panic) => {
            let failure = RequestFailure::from_panic(panic.as_ref());
            tracing::error!(path = %path, error = %failure.message(), "View panicked");

            let error: anyhow::Error = WebError::Internal(failure.message().to_string()).into();
            let response = scope.errors.handle_error(&error, &path).await;
            (response, Some(failure))
        }
    };

    cancel.disarm();
    match manager.exit(failure.as_ref()) {
        Ok(true) => tracing::debug!(path = %path, "Request failure suppressed by a request context"),
        Ok(false) => {}
        Err(e) => tracing::warn!(path = %path, "Request context teardown failed: {:#}", e),
    }

    response
}

/// Exits the request's contexts when the request future is dropped before
/// the handler finished, e.g. on client disconnect or a timeout layer.
struct ExitOnCancel {
    manager: Option<Arc<RequestContextManager>>,
    path: String,
}

impl ExitOnCancel {
    fn disarm(mut self) {
        self.manager = None;
    }
}

impl Drop for ExitOnCancel {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        if manager.state() != ManagerState::Active {
            return;
        }

        tracing::debug!(path = %self.path, "Request cancelled before completion");
        let failure = RequestFailure::new("cancelled", "request dropped before completion");
        if let Err(e) = manager.exit(Some(&failure)) {
            tracing::warn!(path = %self.path, "Request context teardown failed: {:#}", e);
        }
    }
}

/// Logs method, URI, status and elapsed time of every request.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "Request completed"
    );

    response
}
