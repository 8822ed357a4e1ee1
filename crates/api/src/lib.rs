//! Read-only HTTP API over a count store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod handlers;

pub use error::Error;

use std::future::IntoFuture;
use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use logcount_counts::CountStore;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use handlers::{
    get_record_handler, list_counts_handler, metrics_handler, top_endpoints_handler,
    top_ips_handler,
};

/// State shared by every handler.
#[derive(Clone, Debug)]
pub struct ApiState<S>
where
    S: CountStore,
{
    /// Store queried by the count endpoints.
    pub store: S,

    /// Registry served at `/metrics`; the route answers 404 when absent.
    pub registry: Option<Registry>,
}

/// Builds the API router.
pub fn router<S>(state: ApiState<S>) -> Router
where
    S: CountStore,
{
    Router::new()
        .route("/api/counts", get(list_counts_handler::<S>))
        .route("/api/counts/record", get(get_record_handler::<S>))
        .route("/api/counts/top/ips", get(top_ips_handler::<S>))
        .route("/api/counts/top/endpoints", get(top_endpoints_handler::<S>))
        .route("/metrics", get(metrics_handler::<S>))
        .with_state(state)
}

/// Serves a router on a TCP address until shut down.
#[derive(Debug)]
pub struct ApiServer {
    listen_addr: SocketAddr,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl ApiServer {
    /// Creates a new instance of `ApiServer`.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Binds the listener and starts serving `router`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server was already started or binding fails.
    pub async fn start(&self, router: Router) -> Result<JoinHandle<()>, Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown_token = self.shutdown_token.clone();

        let handle = self.task_tracker.spawn(async move {
            tokio::select! {
                e = axum::serve(listener, router.into_make_service()).into_future() => {
                    info!("api server exited {:?}", e);
                }
                () = shutdown_token.cancelled() => {}
            };
        });

        self.task_tracker.close();

        info!(addr = %local_addr, "api server listening");

        Ok(handle)
    }

    /// Stops serving and waits for the server task to exit.
    pub async fn shutdown(&self) {
        info!("api server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("api server shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use logcount_analysis::{AggregationDimension, ReduceOutput};
    use logcount_counts_memory::MemoryCountStore;
    use tower::ServiceExt;

    fn output(
        server_id: &str,
        dimension: AggregationDimension,
        value: &str,
        count: u64,
    ) -> ReduceOutput {
        let now = Utc::now();
        ReduceOutput {
            server_id: server_id.to_string(),
            dimension,
            value: value.to_string(),
            count,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded_router(registry: Option<Registry>) -> Router {
        let store = MemoryCountStore::new();
        store
            .upsert_counts(&[
                output("s1", AggregationDimension::Ip, "10.0.0.1", 7),
                output("s1", AggregationDimension::Ip, "10.0.0.2", 3),
                output("s2", AggregationDimension::Ip, "10.0.0.9", 5),
                output("s1", AggregationDimension::Endpoint, "/home", 9),
                output("s2", AggregationDimension::Endpoint, "/api/v1/items", 4),
            ])
            .await
            .unwrap();

        router(ApiState { store, registry })
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_list_filters_by_server_and_type() {
        let router = seeded_router(None).await;

        let (status, body) = get_json(router, "/api/counts?server_id=s1&type=ip").await;

        assert_eq!(status, StatusCode::OK);
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["server_id"] == "s1" && r["type"] == "ip"));
    }

    #[tokio::test]
    async fn test_list_filters_by_time_range() {
        let router = seeded_router(None).await;

        let (status, body) =
            get_json(router.clone(), "/api/counts?to=2000-01-01T00:00:00Z").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = get_json(router, "/api/counts?from=2000-01-01T00:00:00Z").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_parameters() {
        let router = seeded_router(None).await;

        let (status, body) = get_json(router.clone(), "/api/counts?type=referrer").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = get_json(router.clone(), "/api/counts?from=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(
            router,
            "/api/counts?from=2025-01-02T00:00:00Z&to=2025-01-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_lookup() {
        let router = seeded_router(None).await;

        let (status, body) = get_json(
            router.clone(),
            "/api/counts/record?server_id=s2&type=endpoint&value=%2Fapi%2Fv1%2Fitems",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 4);
        assert_eq!(body["value"], "/api/v1/items");

        let (status, _) = get_json(
            router.clone(),
            "/api/counts/record?server_id=s2&type=endpoint&value=%2Fmissing",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get_json(router, "/api/counts/record?server_id=s2&type=ip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_top_orders_by_count() {
        let router = seeded_router(None).await;

        let (status, body) = get_json(router.clone(), "/api/counts/top/ips?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let counts: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![7, 5]);

        let (status, body) = get_json(router.clone(), "/api/counts/top/endpoints").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["value"], "/home");

        let (status, _) = get_json(router, "/api/counts/top/ips?limit=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (status, _) = get_json(seeded_router(None).await, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let registry = Registry::new();
        let counter = prometheus::IntCounter::new("probe_total", "probe").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let response = seeded_router(Some(registry))
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("probe_total 1"));
    }

    #[tokio::test]
    async fn test_server_starts_once() {
        let server = ApiServer::new("127.0.0.1:0".parse().unwrap());
        let router = seeded_router(None).await;

        server.start(router.clone()).await.unwrap();
        assert!(matches!(
            server.start(router).await,
            Err(Error::AlreadyStarted)
        ));

        server.shutdown().await;
    }
}
