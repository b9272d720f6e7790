//! Turning a view's result into an HTTP response.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::constants::JSON_CONTENT_TYPE;

/// Renders the value returned by a view.
pub trait Renderer: Send + Sync {
    fn render(&self, result: Value) -> Response;
}

/// Serializes the result as JSON with status 200.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, result: Value) -> Response {
        let body = result.to_string();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        );
        response
    }
}

/// Writes string results as-is and anything else as its JSON text, with a
/// fixed content type.
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    content_type: &'static str,
}

impl TextRenderer {
    pub const fn new(content_type: &'static str) -> Self {
        Self { content_type }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new("text/plain; charset=utf-8")
    }
}

impl Renderer for TextRenderer {
    fn render(&self, result: Value) -> Response {
        let body = match result {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ([(header::CONTENT_TYPE, self.content_type)], body).into_response()
    }
}
