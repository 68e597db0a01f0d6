//! HTTP binding.
//!
//! | Route                        | Body                   | Answer                  |
//! |------------------------------|------------------------|-------------------------|
//! | `POST /v0/search`            | `SearchRequest`        | `SearchResponse`        |
//! | `POST /v0/spaces/index`      | `IndexSpaceRequest`    | `204`                   |
//! | `GET  /v0/spaces/{space_id}` |                        | `SpaceStats`            |
//! | `POST /v0/provider/search`   | `SearchIndexRequest`   | `SearchIndexResponse`   |
//! | `POST /v0/provider/index`    | `IndexSpaceRequest`    | `204`                   |
//! | `POST /v0/events`            | `ChangeEvent`          | `202`, `503` when full  |
//! | `GET  /health`               |                        | status                  |
//!
//! User-scoped routes read the caller from the [`USER_HEADER`] header.
//! The stats, provider and event routes serve other instances and require
//! the configured internal token in the [`INTERNAL_HEADER`] header; with no
//! token configured they refuse every request.
//! Errors are answered as `{"code": ..., "message": ...}` with a status
//! derived from the error code.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Serialize;
use sift_core::{
    ChangeEvent, Error, IndexSpaceRequest, Result, SearchIndexRequest, SearchIndexResponse,
    SearchRequest, SearchResponse, SpaceId, UserId,
};
use sift_index::{SpaceIndexManager, SpaceStats};
use sift_ingest::ChangeFeed;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::provider::IndexProvider;
use crate::remote::{INDEX_PATH, INTERNAL_HEADER, SEARCH_PATH};
use crate::search::SearchProvider;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-sift-user";

// ============================================================================
// Errors
// ============================================================================

/// Error answer of the HTTP layer.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

/// Wire form of an error.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidArgument(_) | Error::InvalidCursor(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) | Error::Io(_) | Error::Config(_) | Error::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("Request failed: {err}");
        }
        // Display carries a variant prefix; the code already says it.
        let message = match &err {
            Error::InvalidArgument(m)
            | Error::InvalidCursor(m)
            | Error::NotFound(m)
            | Error::PermissionDenied(m)
            | Error::Unavailable(m)
            | Error::Internal(m) => m.clone(),
            other => other.to_string(),
        };
        Self::new(status, err.code(), message)
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// State and routes
// ============================================================================

/// What the handlers serve from.
#[derive(Clone)]
pub struct ServiceState {
    /// Aggregate search.
    pub search: Arc<SearchProvider>,
    /// Single-space provider exposed on the provider routes.
    pub provider: Arc<dyn IndexProvider>,
    /// Local indices, when this instance holds any.
    pub manager: Option<Arc<SpaceIndexManager>>,
    /// Event intake, when this instance ingests pushed changes.
    pub feed: Option<ChangeFeed>,
    /// Shared token of the internal routes; `None` disables them.
    pub internal_token: Option<String>,
}

/// Build the router.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v0/search", post(search))
        .route("/v0/spaces/index", post(index_space))
        .route("/v0/spaces/{space_id}", get(space_stats))
        .route(SEARCH_PATH, post(provider_search))
        .route(INDEX_PATH, post(provider_index))
        .route("/v0/events", post(publish_event))
        .with_state(Arc::new(state))
}

fn caller(headers: &HeaderMap) -> Result<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::from)
        .ok_or_else(|| Error::permission_denied(format!("missing {USER_HEADER} header")))
}

fn require_internal(state: &ServiceState, headers: &HeaderMap) -> Result<()> {
    let expected = state
        .internal_token
        .as_deref()
        .ok_or_else(|| Error::permission_denied("internal routes are disabled"))?;
    let presented = headers
        .get(INTERNAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::permission_denied(format!("missing {INTERNAL_HEADER} header")))?;
    // blake3::Hash equality is constant-time.
    if blake3::hash(presented.as_bytes()) != blake3::hash(expected.as_bytes()) {
        return Err(Error::permission_denied("invalid internal token"));
    }
    Ok(())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    spaces: usize,
}

async fn health(State(state): State<Arc<ServiceState>>) -> Json<Health> {
    let spaces = match &state.manager {
        Some(manager) => manager.spaces().await.len(),
        None => 0,
    };
    Json(Health {
        status: "ok",
        spaces,
    })
}

async fn search(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let caller = caller(&headers)?;
    Ok(Json(state.search.search(&caller, request).await?))
}

async fn index_space(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(mut request): Json<IndexSpaceRequest>,
) -> ApiResult<StatusCode> {
    let caller = caller(&headers)?;
    if !request.user_id.is_empty() && request.user_id != caller {
        return Err(Error::permission_denied(format!(
            "user_id '{}' does not match caller '{caller}'",
            request.user_id
        ))
        .into());
    }
    request.user_id = caller.clone();
    state.search.index_space(&caller, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn space_stats(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Path(space_id): Path<String>,
) -> ApiResult<Json<SpaceStats>> {
    require_internal(&state, &headers)?;
    let space_id = SpaceId::from(space_id);
    let manager = state
        .manager
        .as_ref()
        .ok_or_else(|| Error::not_found("this instance holds no indices"))?;
    let stats = manager
        .stats(&space_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("space '{space_id}' has no index")))?;
    Ok(Json(stats))
}

async fn provider_search(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(request): Json<SearchIndexRequest>,
) -> ApiResult<Json<SearchIndexResponse>> {
    require_internal(&state, &headers)?;
    Ok(Json(state.provider.search(request).await?))
}

async fn provider_index(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(request): Json<IndexSpaceRequest>,
) -> ApiResult<StatusCode> {
    require_internal(&state, &headers)?;
    state.provider.index_space(request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_event(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(event): Json<ChangeEvent>,
) -> ApiResult<StatusCode> {
    require_internal(&state, &headers)?;
    let feed = state
        .feed
        .as_ref()
        .ok_or_else(|| Error::unavailable("event intake is disabled"))?;
    feed.try_publish(event)?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Serving
// ============================================================================

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: ServiceState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Sift listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Sift stopped");
    Ok(())
}

/// A server running in the background.
///
/// Dropping it triggers a graceful shutdown.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    /// Bind `addr` (port 0 picks a free one) and start serving.
    pub async fn start(addr: SocketAddr, state: ServiceState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let stopped = serve(listener, state, async move {
                let _ = shutdown_rx.await;
            })
            .await;
            if let Err(e) = stopped {
                warn!("Server on {addr} failed: {e}");
            }
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Ask the server to stop.
    pub fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use sift_acl::StaticAccessResolver;
    use sift_core::{Document, SearchSettings};
    use sift_index::MemoryIndexFactory;
    use sift_ingest::{ChangeIngestor, MemoryStorage};
    use tower::ServiceExt;

    use crate::provider::LocalIndexProvider;
    use crate::router::ProviderRouter;

    const TOKEN: &str = "cluster-secret";

    async fn state() -> (ServiceState, tokio::sync::mpsc::Receiver<ChangeEvent>) {
        let manager = Arc::new(SpaceIndexManager::new(Arc::new(MemoryIndexFactory::new())));
        manager
            .upsert(
                &Document::builder("s1", "r1")
                    .path("q3-invoice.txt")
                    .content("quarterly invoice")
                    .sequence(1)
                    .build(),
            )
            .await
            .unwrap();
        let storage = MemoryStorage::new();
        let ingestor = Arc::new(ChangeIngestor::new(manager.clone(), Arc::new(storage)));
        let provider: Arc<dyn IndexProvider> =
            Arc::new(LocalIndexProvider::new(ingestor, SearchSettings::default()));

        let access = StaticAccessResolver::default();
        access.grant("alice", "s1");
        let search = SearchProvider::new(
            Arc::new(access),
            ProviderRouter::new(provider.clone()),
            SearchSettings::default(),
        );
        let (feed, rx) = ChangeFeed::channel(1);
        (
            ServiceState {
                search: Arc::new(search),
                provider,
                manager: Some(manager),
                feed: Some(feed),
                internal_token: Some(TOKEN.to_string()),
            },
            rx,
        )
    }

    fn post_json(uri: &str, user: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn post_internal(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(INTERNAL_HEADER, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_internal(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(INTERNAL_HEADER, TOKEN)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_search_route() {
        let (state, _rx) = state().await;
        let response = router(state)
            .oneshot(post_json(
                "/v0/search",
                Some("alice"),
                serde_json::json!({"page_size": 10, "query": "invoice"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_matches"], 1);
        assert_eq!(body["matches"][0]["resource"]["resource_id"], "r1");
    }

    #[tokio::test]
    async fn test_missing_user_is_forbidden() {
        let (state, _rx) = state().await;
        let response = router(state)
            .oneshot(post_json(
                "/v0/search",
                None,
                serde_json::json!({"page_size": 10, "query": "invoice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["code"], "permission_denied");
    }

    #[tokio::test]
    async fn test_bad_page_size_is_bad_request() {
        let (state, _rx) = state().await;
        let response = router(state)
            .oneshot(post_json(
                "/v0/search",
                Some("alice"),
                serde_json::json!({"page_size": 0, "query": "invoice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_provider_search_unknown_space() {
        let (state, _rx) = state().await;
        let response = router(state)
            .oneshot(post_internal(
                SEARCH_PATH,
                Some(TOKEN),
                serde_json::json!({"page_size": 10, "query": "x", "ref": {"space_id": "nope"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "not_found");
    }

    #[tokio::test]
    async fn test_events_apply_backpressure() {
        let (state, mut rx) = state().await;
        let app = router(state);
        let event = serde_json::to_value(ChangeEvent::deleted("s1", "r1", 2)).unwrap();

        let first = app
            .clone()
            .oneshot(post_internal("/v0/events", Some(TOKEN), event.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .clone()
            .oneshot(post_internal("/v0/events", Some(TOKEN), event))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(rx.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_space_stats_and_health() {
        let (state, _rx) = state().await;
        let app = router(state);

        let stats = app
            .clone()
            .oneshot(get_internal("/v0/spaces/s1"))
            .await
            .unwrap();
        assert_eq!(stats.status(), StatusCode::OK);
        let body = json_body(stats).await;
        assert_eq!(body["state"], "ready");
        assert_eq!(body["document_count"], 1);

        let missing = app
            .clone()
            .oneshot(get_internal("/v0/spaces/none"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let health = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(health).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_internal_routes_require_token() {
        let (state, _rx) = state().await;
        let app = router(state);
        let search = serde_json::json!({"page_size": 10, "query": "invoice", "ref": {"space_id": "s1"}});
        let index = serde_json::json!({"space_id": "s1", "user_id": "mallory"});
        let event = serde_json::to_value(ChangeEvent::deleted("s1", "r1", 2)).unwrap();

        for token in [None, Some("wrong")] {
            for (uri, body) in [
                (SEARCH_PATH, search.clone()),
                (INDEX_PATH, index.clone()),
                ("/v0/events", event.clone()),
            ] {
                let response = app
                    .clone()
                    .oneshot(post_internal(uri, token, body))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri} with {token:?}");
                assert_eq!(json_body(response).await["code"], "permission_denied");
            }
        }

        let stats = app
            .clone()
            .oneshot(Request::get("/v0/spaces/s1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(stats.status(), StatusCode::FORBIDDEN);

        let granted = app
            .oneshot(post_internal(SEARCH_PATH, Some(TOKEN), search))
            .await
            .unwrap();
        assert_eq!(granted.status(), StatusCode::OK);
        assert_eq!(json_body(granted).await["total_matches"], 1);
    }

    #[tokio::test]
    async fn test_internal_routes_disabled_without_token() {
        let (mut state, _rx) = state().await;
        state.internal_token = None;
        let response = router(state)
            .oneshot(post_internal(
                SEARCH_PATH,
                Some(TOKEN),
                serde_json::json!({"page_size": 10, "query": "invoice", "ref": {"space_id": "s1"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_index_space_rejects_other_user() {
        let (state, _rx) = state().await;
        let response = router(state)
            .oneshot(post_json(
                "/v0/spaces/index",
                Some("alice"),
                serde_json::json!({"space_id": "s1", "user_id": "bob"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["code"], "permission_denied");
        assert!(body["message"].as_str().unwrap().contains("bob"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::invalid_cursor("x"), StatusCode::BAD_REQUEST),
            (Error::permission_denied("x"), StatusCode::FORBIDDEN),
            (Error::unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (Error::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
