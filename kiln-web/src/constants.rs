//! Configuration keys and defaults read by the web layer.

// ==================== Web ====================

/// Prefix prepended to every view's URL rule.
pub const WEB_URL_PREFIX: &str = "web.url-prefix";

/// Largest request body a view buffers, in bytes. Unset means axum's
/// default of 2 MiB.
pub const WEB_MAX_BODY_SIZE: &str = "web.max-body-size";

/// Content type written by `JsonRenderer`.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// ==================== Server ====================

pub const SERVER_HOST: &str = "server.host";

pub const SERVER_PORT: &str = "server.port";

/// Whether each request is logged after it completes.
pub const SERVER_ENABLE_REQUEST_LOGGING: &str = "server.enable-request-logging";

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8080;
