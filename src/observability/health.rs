//! HTTP status server
//!
//! Small read-only API for operators and container orchestration: liveness
//! with connection totals, the metrics snapshot and the per-endpoint status.

use crate::observability::metrics::metrics;
use crate::status::{StatusService, StatusSummary};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP status server
pub struct HealthServer {
    port: u16,
    status: Arc<StatusService>,
}

impl HealthServer {
    pub fn new(port: u16, status: Arc<StatusService>) -> Self {
        Self { port, status }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All routes, without binding a socket
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let status_server = self.clone();
        let endpoint_server = self.clone();

        // GET /health - liveness plus connection totals
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let (code, body) = server.health().await;
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&body), code))
                }
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /status - every endpoint
        let status_route = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = status_server.clone();
                async move {
                    let reply = match server.status.all().await {
                        Ok(statuses) => warp::reply::with_status(
                            warp::reply::json(&statuses),
                            StatusCode::OK,
                        ),
                        Err(e) => error_reply(e.log_message(), StatusCode::INTERNAL_SERVER_ERROR),
                    };
                    Ok::<_, Infallible>(reply)
                }
            });

        // GET /status/{external_endpoint_id}
        let endpoint_route = warp::path!("status" / String)
            .and(warp::get())
            .and_then(move |external_endpoint_id: String| {
                let server = endpoint_server.clone();
                async move {
                    let reply = match server.status.endpoint_status(&external_endpoint_id).await {
                        Ok(status) => {
                            warp::reply::with_status(warp::reply::json(&status), StatusCode::OK)
                        }
                        Err(crate::error::MiddlewareError::EndpointNotFound { id }) => {
                            error_reply(format!("Endpoint not found: {id}"), StatusCode::NOT_FOUND)
                        }
                        Err(e) => error_reply(e.log_message(), StatusCode::INTERNAL_SERVER_ERROR),
                    };
                    Ok::<_, Infallible>(reply)
                }
            });

        // GET / - API documentation
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints: HashMap<&str, &str> = HashMap::from([
                ("/health", "Liveness and connection totals"),
                ("/metrics", "MQTT statistics and job metrics"),
                ("/status", "State of every endpoint"),
                ("/status/{externalEndpointId}", "State of one endpoint"),
            ]);
            warp::reply::json(&endpoints)
        });

        health_route
            .or(metrics_route)
            .or(endpoint_route)
            .or(status_route)
            .or(root_route)
    }

    /// Serve until the process ends
    pub async fn start(self: Arc<Self>) {
        let routes = self.routes();
        tracing::info!("Starting status server on port {}", self.port);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    async fn health(&self) -> (StatusCode, HealthStatus) {
        let snapshot = metrics().get_metrics();
        let (summary, message) = match self.status.all().await {
            Ok(statuses) => (StatusSummary::from_statuses(&statuses), None),
            Err(e) => (StatusSummary::default(), Some(e.log_message())),
        };
        let healthy = snapshot.healthy && message.is_none();

        let status = HealthStatus {
            status: if healthy { "healthy" } else { "degraded" },
            timestamp: current_timestamp(),
            uptime_seconds: snapshot.uptime_seconds,
            summary,
            message,
        };
        let code = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, status)
    }
}

fn error_reply(error: String, code: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error,
            timestamp: current_timestamp(),
        }),
        code,
    )
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: u64,
    uptime_seconds: u64,
    summary: StatusSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acknowledgement::AcknowledgementStore;
    use crate::cache::{resend_channel, TransientMessageCache};
    use crate::endpoint::InMemoryEndpointRepository;
    use crate::testing::mocks::{endpoint, MockClientProvider, MockTransportClient};

    fn server() -> Arc<HealthServer> {
        let (sender, _receiver) = resend_channel(1);
        let status = StatusService::new(
            Arc::new(InMemoryEndpointRepository::with_endpoints(vec![endpoint(
                "ext-1", "ar-1",
            )])),
            Arc::new(AcknowledgementStore::default()),
            Arc::new(TransientMessageCache::new(60, sender)),
            Arc::new(
                MockClientProvider::new()
                    .with_client(Arc::new(MockTransportClient::new("ext-1"))),
            ),
        );
        Arc::new(HealthServer::new(8080, Arc::new(status)))
    }

    #[tokio::test]
    async fn test_health_reports_connection_totals() {
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&server().routes())
            .await;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["summary"]["endpoints"], 1);
        assert_eq!(body["summary"]["connected"], 1);
    }

    #[tokio::test]
    async fn test_endpoint_status_route() {
        let routes = server().routes();

        let found = warp::test::request()
            .path("/status/ext-1")
            .reply(&routes)
            .await;
        assert_eq!(found.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(found.body()).unwrap();
        assert_eq!(body["agrirouter_endpoint_id"], "ar-1");
        assert_eq!(body["message_cache_entries"], 0);

        let missing = warp::test::request()
            .path("/status/unknown")
            .reply(&routes)
            .await;
        assert_eq!(missing.status(), 404);

        let all = warp::test::request().path("/status").reply(&routes).await;
        let body: serde_json::Value = serde_json::from_slice(all.body()).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let response = warp::test::request()
            .path("/metrics")
            .reply(&server().routes())
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["mqtt"].is_object());
    }
}
