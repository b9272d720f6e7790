//! # Kiln Web
//!
//! Mounts pooled views on an axum router and runs every request inside a
//! fresh set of request contexts.
//!
//! - **Views** - singletons from the object pool, one per URL rule
//! - **Request contexts** - entered before the view, exited after it with the
//!   request's failure
//! - **Error handlers** - turn view errors into responses
//! - **Discovery** - `view!`, `request_context!` and `error_handler!`
//!   registrations picked up by [`Bootstrap::scan`]

pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod error_handler;
pub mod middleware;
pub mod renderer;
pub mod route;
pub mod server;
pub mod view;

pub use bootstrap::{Application, Bootstrap};
pub use error::{BootstrapError, WebError};
pub use error_handler::{
    ErrorHandler, ErrorHandlerDescriptor, ErrorHandlerRegistration, ErrorHandlerRegistry,
    ErrorResponse,
};
pub use middleware::request_logging;
pub use renderer::{JsonRenderer, Renderer, TextRenderer};
pub use route::RouteInfo;
pub use server::ServerProperties;
pub use view::{CastValue, View, ViewDescriptor, ViewRegistration, ViewRequest};

pub use async_trait::async_trait;
pub use axum;
pub use kiln_core::{inventory, request_context};

/// Registers a view type for [`Bootstrap::scan`].
///
/// ```ignore
/// kiln_web::view!(Hello);
/// ```
#[macro_export]
macro_rules! view {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::view::ViewRegistration {
                descriptor: $crate::view::ViewDescriptor::of::<$ty>,
                module_path: ::core::module_path!(),
            }
        }
    };
}

/// Registers an error handler type for [`Bootstrap::scan`].
#[macro_export]
macro_rules! error_handler {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::error_handler::ErrorHandlerRegistration {
                descriptor: $crate::error_handler::ErrorHandlerDescriptor::of::<$ty>,
                module_path: ::core::module_path!(),
            }
        }
    };
}

pub mod prelude {
    pub use crate::bootstrap::{Application, Bootstrap};
    pub use crate::error::WebError;
    pub use crate::error_handler::{ErrorHandler, ErrorResponse};
    pub use crate::view::{View, ViewRequest};

    pub use async_trait::async_trait;
    pub use axum::http::{Method, StatusCode};
    pub use axum::response::{IntoResponse, Response};
    pub use kiln_core::prelude::*;
    pub use serde_json::{json, Value};
}
