use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use kiln_core::find_context;
use kiln_core_macros::Injectable;
use kiln_web::prelude::*;
use tower::ServiceExt;

#[derive(Default)]
struct Entered(AtomicUsize);

impl Component for Entered {}

#[derive(Injectable)]
struct Tracked {
    #[inject(provided)]
    entered: Arc<Entered>,
}

impl RequestContext for Tracked {
    fn enter(&self) -> anyhow::Result<()> {
        self.entered.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

kiln_web::request_context!(Tracked);

#[derive(Injectable)]
struct Ping;

#[async_trait]
impl View for Ping {
    fn url_rule(&self) -> &str {
        "/ping"
    }

    async fn handle(&self, _request: ViewRequest) -> anyhow::Result<Value> {
        Ok(json!({ "tracked": find_context::<Tracked>().is_some() }))
    }
}

kiln_web::view!(Ping);

#[derive(Debug, thiserror::Error)]
#[error("gone")]
struct Gone;

#[derive(Injectable)]
struct Vanished;

#[async_trait]
impl View for Vanished {
    fn url_rule(&self) -> &str {
        "/vanished"
    }

    async fn handle(&self, _request: ViewRequest) -> anyhow::Result<Value> {
        Err(Gone.into())
    }
}

kiln_web::view!(Vanished);

#[derive(Injectable)]
struct GoneHandler;

#[async_trait]
impl ErrorHandler for GoneHandler {
    fn can_handle(&self, error: &anyhow::Error) -> bool {
        error.is::<Gone>()
    }

    async fn handle(&self, error: &anyhow::Error, request_path: &str) -> Option<Response> {
        Some(ErrorResponse::new(StatusCode::GONE, "Gone", error.to_string(), request_path).into_response())
    }
}

kiln_web::error_handler!(GoneHandler);

#[derive(Injectable)]
struct _Draft;

#[async_trait]
impl View for _Draft {
    fn url_rule(&self) -> &str {
        "/draft"
    }

    async fn handle(&self, _request: ViewRequest) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

kiln_web::view!(_Draft);

mod _internal {
    use super::*;

    #[derive(Injectable)]
    pub struct Inspector;

    #[async_trait]
    impl View for Inspector {
        fn url_rule(&self) -> &str {
            "/ping"
        }

        async fn handle(&self, _request: ViewRequest) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    kiln_web::view!(Inspector);
}

fn application(entered: &Arc<Entered>) -> Application {
    Bootstrap::new()
        .request_logging(false)
        .put_arc(Arc::clone(entered))
        .scan()
        .build()
        .unwrap()
}

async fn get(app: &Application, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[test]
fn test_scan_skips_private_registrations() {
    let app = application(&Arc::new(Entered::default()));

    let mut paths: Vec<&str> = app.routes().iter().map(|r| r.path.as_str()).collect();
    paths.sort_unstable();
    // `_internal::Inspector` would collide with `/ping` if it were mounted.
    assert_eq!(paths, ["/ping", "/vanished"]);
}

#[tokio::test]
async fn test_scanned_context_and_view() {
    let entered = Arc::new(Entered::default());
    let app = application(&entered);

    let (status, body) = get(&app, "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tracked"], true);
    assert_eq!(entered.0.load(Ordering::SeqCst), 1);

    let (status, _) = get(&app, "/draft").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scanned_error_handler() {
    let app = application(&Arc::new(Entered::default()));

    let (status, body) = get(&app, "/vanished").await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["message"], "gone");
}
