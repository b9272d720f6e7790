//! Views: pooled request handlers mounted on a URL rule.
//!
//! ```ignore
//! #[derive(Injectable)]
//! pub struct Hello {
//!     greeter: Arc<Greeter>,
//! }
//!
//! #[async_trait]
//! impl View for Hello {
//!     fn url_rule(&self) -> &str {
//!         "/hello/:name"
//!     }
//!
//!     async fn handle(&self, request: ViewRequest) -> anyhow::Result<Value> {
//!         let name: String = request.param_as("name")?;
//!         Ok(json!({ "message": self.greeter.greet(&name) }))
//!     }
//! }
//!
//! kiln_web::view!(Hello);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use kiln_core::{Component, Injectable, ObjectPool, PoolResult, RequestFailure, TypeKey};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::WebError;
use crate::error_handler::ErrorHandlerRegistry;
use crate::renderer::{JsonRenderer, Renderer};
use crate::route::endpoint_name;

/// A request handler built by the object pool.
#[async_trait]
pub trait View: Component {
    /// Rule relative to the application's URL prefix, in axum syntax
    /// (`/users/:id`). A missing leading slash is added.
    fn url_rule(&self) -> &str;

    /// Accepted methods. An empty list mounts the view for GET and POST.
    fn methods(&self) -> Vec<Method> {
        vec![Method::GET]
    }

    fn endpoint(&self) -> String {
        endpoint_name(std::any::type_name::<Self>())
    }

    fn renderer(&self) -> &dyn Renderer {
        &JsonRenderer
    }

    async fn handle(&self, request: ViewRequest) -> anyhow::Result<Value>;
}

/// Values a path or query string parameter can be cast to.
pub trait CastValue: Sized {
    fn cast(value: &str) -> Option<Self>;
}

impl CastValue for String {
    fn cast(value: &str) -> Option<Self> {
        Some(value.to_string())
    }
}

/// `"true"` (any case) and `"1"` are true; everything else is false.
impl CastValue for bool {
    fn cast(value: &str) -> Option<Self> {
        Some(value.eq_ignore_ascii_case("true") || value == "1")
    }
}

macro_rules! cast_from_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CastValue for $ty {
                fn cast(value: &str) -> Option<Self> {
                    value.parse().ok()
                }
            }
        )*
    };
}

cast_from_str!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

/// The request as seen by a view.
#[derive(Debug, Clone)]
pub struct ViewRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
}

impl ViewRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(&uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query,
            body: Bytes::new(),
        }
    }

    /// Splits an axum request. Path parameters come from the matched route.
    ///
    /// The body is buffered through axum's `Bytes` extractor, so the
    /// router's [`DefaultBodyLimit`](axum::extract::DefaultBodyLimit) applies
    /// (2 MiB unless `web.max-body-size` is set); larger bodies fail with 413.
    pub async fn from_request(request: Request) -> Result<Self, WebError> {
        let (mut parts, body) = request.into_parts();

        let path_params = match Path::<HashMap<String, String>>::from_request_parts(&mut parts, &()).await {
            Ok(Path(params)) => params,
            Err(_) => HashMap::new(),
        };

        let mut request = Self::new(parts.method.clone(), parts.uri.clone());
        request.headers = parts.headers.clone();
        request.path_params = path_params;
        request.body = Bytes::from_request(Request::from_parts(parts, body), &())
            .await
            .map_err(|rejection| WebError::Body {
                status: rejection.status(),
                message: rejection.body_text(),
            })?;
        Ok(request)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Required path parameter, cast to `T`.
    pub fn param_as<T: CastValue>(&self, name: &str) -> Result<T, WebError> {
        let raw = self.param(name).ok_or_else(|| WebError::PathParse {
            message: format!("missing path parameter '{}'", name),
        })?;
        T::cast(raw).ok_or_else(|| WebError::PathParse {
            message: format!(
                "cannot convert '{}' of parameter '{}' to {}",
                raw,
                name,
                std::any::type_name::<T>()
            ),
        })
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Optional query parameter, cast to `T`.
    pub fn query_as<T: CastValue>(&self, name: &str) -> Result<Option<T>, WebError> {
        match self.query(name) {
            None => Ok(None),
            Some(raw) => T::cast(raw).map(Some).ok_or_else(|| WebError::QueryParse {
                message: format!(
                    "cannot convert '{}' of parameter '{}' to {}",
                    raw,
                    name,
                    std::any::type_name::<T>()
                ),
            }),
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, WebError> {
        serde_json::from_slice(&self.body).map_err(|e| WebError::JsonParse {
            message: e.to_string(),
        })
    }
}

/// How to obtain one view type from the pool.
#[derive(Clone, Copy)]
pub struct ViewDescriptor {
    key: TypeKey,
    lookup: fn(&ObjectPool) -> PoolResult<Arc<dyn View>>,
    verify: fn(&ObjectPool) -> PoolResult<()>,
}

impl ViewDescriptor {
    pub fn of<V: View + Injectable>() -> Self {
        fn lookup<V: View + Injectable>(pool: &ObjectPool) -> PoolResult<Arc<dyn View>> {
            let view: Arc<dyn View> = pool.lookup::<V>()?;
            Ok(view)
        }

        Self {
            key: TypeKey::of::<V>(),
            lookup: lookup::<V>,
            verify: ObjectPool::verify::<V>,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The view's pool singleton.
    pub fn lookup(&self, pool: &ObjectPool) -> PoolResult<Arc<dyn View>> {
        (self.lookup)(pool)
    }

    pub fn verify(&self, pool: &ObjectPool) -> PoolResult<()> {
        (self.verify)(pool)
    }
}

impl std::fmt::Debug for ViewDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ViewDescriptor").field(&self.key).finish()
    }
}

/// Compile-time view registration, see [`view!`](crate::view!).
pub struct ViewRegistration {
    pub descriptor: fn() -> ViewDescriptor,
    pub module_path: &'static str,
}

inventory::collect!(ViewRegistration);

/// Runs a view and renders its result. Failures are answered by the error
/// handlers and recorded on the response for the request contexts.
pub(crate) async fn dispatch(
    view: Arc<dyn View>,
    errors: Arc<ErrorHandlerRegistry>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();

    let result = match ViewRequest::from_request(request).await {
        Ok(request) => view.handle(request).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(value) => view.renderer().render(value),
        Err(error) => {
            tracing::debug!(
                endpoint = %view.endpoint(),
                path = %path,
                "View failed: {:#}",
                error
            );
            let mut response = errors.handle_error(&error, &path).await;
            response.extensions_mut().insert(request_failure(error));
            response
        }
    }
}

/// Failure handed to the request contexts. Errors raised by the framework
/// itself carry their [`WebError::kind`].
fn request_failure(error: anyhow::Error) -> RequestFailure {
    let kind = error.downcast_ref::<WebError>().map(WebError::kind);
    let failure = RequestFailure::from_error(error);
    match kind {
        Some(kind) => failure.with_kind(kind),
        None => failure,
    }
}
