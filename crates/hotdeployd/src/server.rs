//! HTTP transport: decodes GitLab push hooks and hands them to the
//! dispatcher.
//!
//! Every request gets `200 OK`, including wrong paths, wrong methods and
//! bodies that fail to read or decode. GitLab does not retry, and none of
//! these are the sender's problem.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use hotdeploy_core::{Dispatcher, Shutdown, WebhookEvent};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Largest webhook body read. Larger bodies are acknowledged and dropped.
pub const MAX_WEBHOOK_BODY: usize = 8 * 1024 * 1024;

pub fn router(dispatcher: Arc<Dispatcher>, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(webhook_handler).fallback(ignore_request))
        .fallback(ignore_request)
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY))
        .layer(middleware::from_fn(log_request))
        .with_state(dispatcher)
}

/// `IP | METHOD | PATH?QUERY`
fn request_line(remote: &str, method: &Method, uri: &Uri) -> String {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{remote} | {method} | {target}")
}

/// Logs every request, matched or not.
async fn log_request(req: Request, next: Next) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    info!("{}", request_line(&remote, req.method(), req.uri()));
    next.run(req).await
}

async fn ignore_request(method: Method, uri: Uri) -> StatusCode {
    debug!(%method, %uri, "ignoring request outside the webhook route");
    StatusCode::OK
}

async fn webhook_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "ignoring unreadable webhook body");
            return StatusCode::OK;
        }
    };
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, bytes = body.len(), "ignoring malformed webhook body");
            return StatusCode::OK;
        }
    };
    let outcome = dispatcher.dispatch(event).await;
    debug!(?outcome, "webhook handled");
    StatusCode::OK
}

/// Serve until `shutdown` fires, then give in-flight requests at most
/// `drain_timeout` to finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Shutdown,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let signal = shutdown.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { signal.wait().await })
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        res = &mut server => res,
        _ = shutdown.wait() => {
            info!(timeout_secs = drain_timeout.as_secs(), "draining http requests");
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(res) => res,
                Err(_) => {
                    warn!("http drain timed out, dropping remaining connections");
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use hotdeploy_core::fakes::FakeToolchain;
    use hotdeploy_core::{
        BundledAssets, DeployPipeline, RepositoryConfig, RepositoryRegistry,
    };
    use tower::ServiceExt;

    const PUSH: &str = r#"{
        "object_kind": "push",
        "before": "95790bf891e76fee5e1747ab589903a6a1f80f22",
        "after": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
        "ref": "refs/heads/master",
        "user_name": "John Smith",
        "repository": {
            "name": "app",
            "url": "git@example.com:mike/app.git"
        },
        "total_commits_count": 1
    }"#;

    fn dispatcher(toolchain: Arc<FakeToolchain>, root: &std::path::Path) -> Arc<Dispatcher> {
        let registry = RepositoryRegistry::new([("app".to_string(), RepositoryConfig::default())]);
        let assets = Arc::new(BundledAssets::from_bytes(b"archive".to_vec()).unwrap());
        let pipeline = DeployPipeline::new(toolchain, assets, root);
        Arc::new(Dispatcher::new(registry, pipeline, Shutdown::new()))
    }

    fn post_body(path: &str, body: &'static str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_body_is_acknowledged_and_ignored() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());

        let response = router(dispatcher.clone(), "/")
            .oneshot(post_body("/", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(dispatcher.worker_count().await, 0);
        assert!(toolchain.calls().is_empty());
    }

    #[tokio::test]
    async fn test_push_is_dispatched() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());

        let response = router(dispatcher.clone(), "/hooks/gitlab")
            .oneshot(post_body("/hooks/gitlab", PUSH))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(dispatcher.has_worker("app").await);
        toolchain.wait_for_launches(1).await;
        assert_eq!(
            toolchain.synced_urls(),
            vec!["git@example.com:mike/app.git"]
        );
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_repository_still_answers_ok() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());
        let body = r#"{"repository": {"name": "unknown", "url": "u"}}"#;

        let response = router(dispatcher.clone(), "/")
            .oneshot(post_body("/", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(dispatcher.worker_count().await, 0);
        assert!(!root.path().join("unknown").exists());
    }

    #[tokio::test]
    async fn test_oversized_body_is_acknowledged_and_ignored() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());

        // A valid push padded past the limit with trailing whitespace.
        let mut body = PUSH.as_bytes().to_vec();
        body.resize(MAX_WEBHOOK_BODY + 1, b' ');
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = router(dispatcher.clone(), "/").oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(dispatcher.worker_count().await, 0);
        assert!(toolchain.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_method_and_path_answer_ok() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());
        let app = router(dispatcher.clone(), "/hooks/gitlab");

        let get = HttpRequest::builder()
            .method(Method::GET)
            .uri("/hooks/gitlab")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_body("/elsewhere?token=x", PUSH))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(dispatcher.worker_count().await, 0);
        assert!(toolchain.calls().is_empty());
    }

    #[test]
    fn test_request_line_keeps_query_string() {
        let uri: Uri = "/hooks/gitlab?token=abc&x=1".parse().unwrap();
        assert_eq!(
            request_line("10.0.0.1", &Method::POST, &uri),
            "10.0.0.1 | POST | /hooks/gitlab?token=abc&x=1"
        );

        let uri: Uri = "/".parse().unwrap();
        assert_eq!(request_line("-", &Method::GET, &uri), "- | GET | /");
    }

    #[tokio::test]
    async fn test_listener_serves_and_stops_on_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let dispatcher = dispatcher(toolchain.clone(), root.path());
        let shutdown = dispatcher.shutdown_signal().clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(
            listener,
            router(dispatcher.clone(), "/"),
            shutdown.clone(),
            Duration::from_secs(2),
        ));

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body(PUSH)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        toolchain.wait_for_launches(1).await;

        dispatcher.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        assert!(toolchain.supervisors()[0].was_killed());
    }
}
