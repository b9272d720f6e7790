use axum::http::{Method, StatusCode};
use kiln_core::{ApplicationError, ContextError, PoolError};
use thiserror::Error;

/// Failures while assembling or serving an application.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error("Route {method} {path} is registered by both {first} and {second}")]
    DuplicateRoute {
        method: Method,
        path: String,
        first: String,
        second: String,
    },

    #[error("View {view} declares unsupported HTTP method {method}")]
    InvalidMethod { view: String, method: Method },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Errors a view can return to pick the HTTP status of the error response.
///
/// Anything else a view returns is answered with `500 Internal Server Error`
/// unless an error handler claims it.
#[derive(Debug, Error)]
pub enum WebError {
    /// Request body is not the expected JSON - 400
    #[error("JSON parse error: {message}")]
    JsonParse { message: String },

    /// Path parameter missing or not castable - 400
    #[error("Invalid path parameter: {message}")]
    PathParse { message: String },

    /// Query parameter missing or not castable - 400
    #[error("Invalid query parameter: {message}")]
    QueryParse { message: String },

    /// The body could not be read, e.g. it exceeds the body limit - 400/413
    #[error("Failed to read request body: {message}")]
    Body { status: StatusCode, message: String },

    /// Explicit status chosen by the view
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// 500
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl WebError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        WebError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    /// Short name of the variant, used as the kind of the request failure
    /// handed to request contexts.
    pub fn kind(&self) -> &'static str {
        match self {
            WebError::JsonParse { .. } => "json_parse",
            WebError::PathParse { .. } => "path_parse",
            WebError::QueryParse { .. } => "query_parse",
            WebError::Body { .. } => "body",
            WebError::Status { .. } => "status",
            WebError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::JsonParse { .. }
            | WebError::PathParse { .. }
            | WebError::QueryParse { .. } => StatusCode::BAD_REQUEST,
            WebError::Body { status, .. } | WebError::Status { status, .. } => *status,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
