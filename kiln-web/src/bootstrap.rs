//! Assembling an axum application from views, request contexts and error
//! handlers.
//!
//! ```ignore
//! let app = Bootstrap::new()
//!     .environment(environment)
//!     .url_prefix("/api")
//!     .scan()
//!     .build()?;
//!
//! app.serve(TcpListener::bind("127.0.0.1:8080").await?).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::Method,
    middleware,
    routing::{on, MethodFilter},
    Router,
};
use kiln_core::{
    Component, ContextDescriptor, ContextRegistration, ContextRegistry, Environment, Injectable,
    LoggingConfig, ObjectPool, RequestContext,
};
use tokio::net::TcpListener;

use crate::constants::{WEB_MAX_BODY_SIZE, WEB_URL_PREFIX};
use crate::error::BootstrapError;
use crate::error_handler::{
    ErrorHandler, ErrorHandlerDescriptor, ErrorHandlerRegistration, ErrorHandlerRegistry,
};
use crate::middleware::{request_contexts, request_logging, RequestScope};
use crate::route::{is_private_module, join_url, method_filter, prepend_slash, RouteInfo};
use crate::server::ServerProperties;
use crate::view::{dispatch, View, ViewDescriptor, ViewRegistration};

/// Builder that discovers and wires everything an application serves.
pub struct Bootstrap {
    pool: Arc<ObjectPool>,
    environment: Option<Arc<Environment>>,
    url_prefix: Option<String>,
    views: Vec<ViewDescriptor>,
    contexts: Vec<ContextDescriptor>,
    error_handlers: Vec<ErrorHandlerDescriptor>,
    request_logging: Option<bool>,
    init_logging: bool,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(ObjectPool::new()),
            environment: None,
            url_prefix: None,
            views: Vec::new(),
            contexts: Vec::new(),
            error_handlers: Vec::new(),
            request_logging: None,
            init_logging: false,
        }
    }

    /// Prefix for every view's URL rule. An empty prefix means none.
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    /// Configuration made injectable as `Arc<Environment>`.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Puts a pre-built object into the pool.
    pub fn put<T: Component>(self, instance: T) -> Self {
        self.pool.put(instance);
        self
    }

    pub fn put_arc<T: Component>(self, instance: Arc<T>) -> Self {
        self.pool.put_arc(instance);
        self
    }

    pub fn view<V: View + Injectable>(mut self) -> Self {
        self.views.push(ViewDescriptor::of::<V>());
        self
    }

    pub fn context<C: RequestContext + Injectable>(mut self) -> Self {
        self.contexts.push(ContextDescriptor::of::<C>());
        self
    }

    pub fn error_handler<H: ErrorHandler + Injectable>(mut self) -> Self {
        self.error_handlers.push(ErrorHandlerDescriptor::of::<H>());
        self
    }

    /// Overrides `server.enable-request-logging`.
    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = Some(enabled);
        self
    }

    /// Installs the global tracing subscriber from the `logging.*` keys of
    /// the environment during [`build`](Self::build).
    pub fn init_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    /// Adds everything registered with `view!`, `request_context!` and
    /// `error_handler!`, skipping private modules.
    pub fn scan(mut self) -> Self {
        let mut skipped = 0usize;

        for registration in inventory::iter::<ViewRegistration> {
            let descriptor = (registration.descriptor)();
            if is_private(registration.module_path, descriptor.key().simple_name()) {
                skipped += 1;
                continue;
            }
            self.views.push(descriptor);
        }

        for registration in inventory::iter::<ContextRegistration> {
            let descriptor = (registration.descriptor)();
            if is_private(registration.module_path, descriptor.key().simple_name()) {
                skipped += 1;
                continue;
            }
            self.contexts.push(descriptor);
        }

        for registration in inventory::iter::<ErrorHandlerRegistration> {
            let descriptor = (registration.descriptor)();
            if is_private(registration.module_path, descriptor.key().simple_name()) {
                skipped += 1;
                continue;
            }
            self.error_handlers.push(descriptor);
        }

        tracing::info!(
            views = self.views.len(),
            contexts = self.contexts.len(),
            error_handlers = self.error_handlers.len(),
            skipped,
            "Scanned registrations"
        );
        self
    }

    /// Materializes every view and error handler and mounts the routes.
    ///
    /// Nothing is served yet; the returned [`Application`] owns the pool and
    /// closes it when dropped.
    pub fn build(self) -> Result<Application, BootstrapError> {
        let pool = self.pool;
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(Environment::new()));
        pool.put_arc(Arc::clone(&environment));

        if self.init_logging {
            LoggingConfig::from_environment(&environment).init()?;
        }

        let prefix = self
            .url_prefix
            .or_else(|| environment.get_string(WEB_URL_PREFIX))
            .filter(|p| !p.is_empty())
            .map(|p| prepend_slash(&p));

        let contexts = Arc::new(ContextRegistry::new(self.contexts));
        contexts.verify(&pool)?;

        let mut errors = ErrorHandlerRegistry::new();
        let mut seen_handlers = HashSet::new();
        for descriptor in self.error_handlers {
            if seen_handlers.insert(descriptor.key()) {
                errors.register(descriptor.lookup(&pool)?);
            }
        }
        let errors = Arc::new(errors);

        let mut router = Router::new();
        let mut routes = Vec::new();
        let mut mounted: HashMap<(Method, String), String> = HashMap::new();
        let mut seen_views = HashSet::new();

        for descriptor in self.views {
            if !seen_views.insert(descriptor.key()) {
                continue;
            }
            descriptor.verify(&pool)?;
            let view = descriptor.lookup(&pool)?;

            let endpoint = view.endpoint();
            let path = join_url(prefix.as_deref(), view.url_rule());
            let mut methods = view.methods();
            if methods.is_empty() {
                methods = vec![Method::GET, Method::POST];
            }

            let mut filter: Option<MethodFilter> = None;
            for method in methods {
                let accepted =
                    method_filter(&method).ok_or_else(|| BootstrapError::InvalidMethod {
                        view: descriptor.key().name().to_string(),
                        method: method.clone(),
                    })?;

                let route = (method.clone(), path.clone());
                if let Some(first) = mounted.insert(route, endpoint.clone()) {
                    return Err(BootstrapError::DuplicateRoute {
                        method,
                        path,
                        first,
                        second: endpoint,
                    });
                }

                filter = Some(match filter {
                    Some(f) => f.or(accepted),
                    None => accepted,
                });
                routes.push(RouteInfo {
                    method,
                    path: path.clone(),
                    endpoint: endpoint.clone(),
                });
            }

            let Some(filter) = filter else {
                continue;
            };

            let handler = {
                let view = Arc::clone(&view);
                let errors = Arc::clone(&errors);
                move |request: Request| {
                    let view = Arc::clone(&view);
                    let errors = Arc::clone(&errors);
                    async move { dispatch(view, errors, request).await }
                }
            };

            router = router.route(&path, on(filter, handler));
            tracing::info!("Mount view {} => [{}]", endpoint, path);
        }

        let scope = RequestScope {
            pool: Arc::clone(&pool),
            contexts: Arc::clone(&contexts),
            errors,
        };
        router = router.layer(middleware::from_fn_with_state(scope, request_contexts));

        if let Some(limit) = environment
            .get_i64(WEB_MAX_BODY_SIZE)
            .and_then(|n| usize::try_from(n).ok())
        {
            tracing::debug!("Request body limit set to {} bytes", limit);
            router = router.layer(DefaultBodyLimit::max(limit));
        }

        let server = ServerProperties::from_environment(&environment);
        if self.request_logging.unwrap_or(server.enable_request_logging) {
            router = router.layer(middleware::from_fn(request_logging));
        }

        tracing::info!(
            routes = routes.len(),
            contexts = contexts.len(),
            pooled = pool.len(),
            "Application bootstrapped"
        );

        Ok(Application {
            router,
            routes,
            pool,
            environment,
            server,
        })
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

fn is_private(module_path: &str, type_name: &str) -> bool {
    is_private_module(module_path) || type_name.starts_with('_')
}

/// A bootstrapped application: routes mounted, singletons built.
pub struct Application {
    router: Router,
    routes: Vec<RouteInfo>,
    pool: Arc<ObjectPool>,
    environment: Arc<Environment>,
    server: ServerProperties,
}

impl Application {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    pub fn pool(&self) -> &Arc<ObjectPool> {
        &self.pool
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn server_properties(&self) -> &ServerProperties {
        &self.server
    }

    /// Serves until the listener fails, then closes the pool.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BootstrapError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves until `signal` resolves and in-flight requests finish, then
    /// closes the pool.
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        signal: F,
    ) -> Result<(), BootstrapError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Server listening on http://{}", addr);
        }

        let result = axum::serve(listener, self.router.clone().into_make_service())
            .with_graceful_shutdown(signal)
            .await;

        self.close();
        result.map_err(BootstrapError::from)
    }

    /// Binds `server.host:server.port` and serves until Ctrl-C.
    pub async fn run(self) -> Result<(), BootstrapError> {
        let addr = self.server.address();
        let listener = TcpListener::bind(addr.as_str()).await?;
        self.serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Tears down the pool. Also happens on drop.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.routes)
            .field("pool", &self.pool)
            .finish()
    }
}
