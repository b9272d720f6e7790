//! URL rule and route bookkeeping.

use axum::http::Method;
use axum::routing::MethodFilter;

/// A mounted route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteInfo {
    pub method: Method,
    /// Full path, URL prefix included.
    pub path: String,
    pub endpoint: String,
}

/// `"hello"` becomes `"/hello"`; `"/hello"` is unchanged.
pub fn prepend_slash(url: &str) -> String {
    if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{}", url)
    }
}

/// Joins a URL prefix and a rule. Empty prefixes are ignored and a trailing
/// slash on the prefix is not doubled.
pub fn join_url(prefix: Option<&str>, rule: &str) -> String {
    let rule = prepend_slash(rule);
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}{}", prepend_slash(prefix).trim_end_matches('/'), rule),
        None => rule,
    }
}

/// Whether any segment of a module path starts with `_`.
pub fn is_private_module(module_path: &str) -> bool {
    module_path
        .split("::")
        .any(|segment| segment.starts_with('_'))
}

/// Endpoint name derived from a type path: `app::views::Hello` becomes
/// `app_views_Hello`.
pub fn endpoint_name(type_name: &str) -> String {
    type_name.replace("::", "_")
}

/// The axum filter for one method, `None` for methods axum cannot route.
pub fn method_filter(method: &Method) -> Option<MethodFilter> {
    MethodFilter::try_from(method.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_slash() {
        assert_eq!(prepend_slash("hello"), "/hello");
        assert_eq!(prepend_slash("/hello"), "/hello");
        assert_eq!(prepend_slash(""), "/");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(Some("/api"), "hello"), "/api/hello");
        assert_eq!(join_url(Some("api/"), "/hello"), "/api/hello");
        assert_eq!(join_url(Some(""), "hello"), "/hello");
        assert_eq!(join_url(None, "users/:id"), "/users/:id");
    }

    #[test]
    fn test_private_modules() {
        assert!(is_private_module("app::_internal::views"));
        assert!(is_private_module("_app"));
        assert!(!is_private_module("app::views::user_list"));
    }

    #[test]
    fn test_endpoint_name() {
        assert_eq!(endpoint_name("app::views::Hello"), "app_views_Hello");
    }

    #[test]
    fn test_method_filter() {
        assert!(method_filter(&Method::GET).is_some());
        let purge = Method::from_bytes(b"PURGE").unwrap();
        assert!(method_filter(&purge).is_none());
    }
}
