//! Public HTTP gateway.
//!
//! JSON endpoints for registration and the session lifecycle, plus the
//! `/ws/timer` countdown socket. Session-scoped routes authenticate with
//! `Authorization: Bearer <session>`.

pub mod auth;
pub mod handlers;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::LabLifecycle;
use crate::notify::SubscriptionTracker;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub lifecycle: Arc<LabLifecycle>,
    /// Live `/ws/timer` subscriptions.
    pub timers: SubscriptionTracker,
}

impl GatewayState {
    pub fn new(lifecycle: Arc<LabLifecycle>) -> Self {
        Self {
            lifecycle,
            timers: SubscriptionTracker::new(),
        }
    }
}

pub struct LabGateway;

impl LabGateway {
    pub fn router(state: GatewayState) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/register", post(handlers::register))
            .route("/status", get(handlers::status))
            .route("/dashboard", get(handlers::dashboard))
            .route("/extend", post(handlers::extend))
            .route("/submit_flag", post(handlers::submit_flag))
            .route("/check_flag", post(handlers::check_flag))
            .route("/logout", post(handlers::logout))
            .route("/ws/timer", get(ws::timer))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve<F>(
        state: GatewayState,
        listener: TcpListener,
        shutdown: F,
    ) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn start<F>(state: GatewayState, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Lab gateway listening on {}", listener.local_addr()?);
        Self::serve(state, listener, shutdown).await
    }

    /// Bind `addr` and serve in the background for the life of the
    /// runtime. Returns the bound address, so port 0 works.
    pub async fn spawn(state: GatewayState, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = Self::serve(state, listener, std::future::pending()).await {
                tracing::error!(error = %e, "Lab gateway stopped");
            }
        });
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use chrono::TimeDelta;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::lifecycle::EXPIRED_NOTICE;
    use crate::testing::{ManualClock, StubOrchestrator, TEST_FLAG, stub_lifecycle};

    struct TestGateway {
        router: Router,
        clock: Arc<ManualClock>,
        orchestrator: Arc<StubOrchestrator>,
    }

    fn gateway(orchestrator: StubOrchestrator) -> TestGateway {
        let orchestrator = Arc::new(orchestrator);
        let clock = Arc::new(ManualClock::default());
        let lifecycle = stub_lifecycle(orchestrator.clone(), clock.clone());
        TestGateway {
            router: LabGateway::router(GatewayState::new(lifecycle)),
            clock,
            orchestrator,
        }
    }

    impl TestGateway {
        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            self.router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap()
        }

        async fn register(&self, identity: &str) -> String {
            let resp = self
                .send("POST", "/register", None, Some(json!({ "identity": identity })))
                .await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
            let body = json_body(resp).await;
            assert_eq!(body["status"], "provisioning");
            body["session"].as_str().unwrap().to_string()
        }

        async fn wait_ready(&self, token: &str) -> Value {
            for _ in 0..200 {
                let body = json_body(self.send("GET", "/status", Some(token), None).await).await;
                if body["status"] != "pending" {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("provisioning never finished");
        }
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn assert_redirected(resp: &Response) {
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn health_is_public() {
        let gw = gateway(StubOrchestrator::with_port(32000));
        let resp = gw.send("GET", "/health", None, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_dashboard() {
        let gw = gateway(StubOrchestrator::with_port(32000));
        let token = gw.register("alice").await;

        assert_eq!(gw.wait_ready(&token).await, json!({ "status": "ready" }));

        let resp = gw.send("GET", "/dashboard", Some(&token), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["username"], "root");
        assert_eq!(body["password"], "root");
        assert_eq!(body["address"], "1.2.3.4:32000");
        assert_eq!(body["time_left"], "1:00:00");
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_invalid_identities() {
        let gw = gateway(StubOrchestrator::with_port(32000).held());
        gw.register("alice").await;

        let dup = gw
            .send("POST", "/register", None, Some(json!({ "identity": "ALICE" })))
            .await;
        assert_eq!(dup.status(), StatusCode::CONFLICT);
        assert!(json_body(dup).await["error"].as_str().unwrap().contains("alice"));

        let invalid = gw
            .send("POST", "/register", None, Some(json!({ "identity": "   " })))
            .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        gw.orchestrator.release(1);
    }

    #[tokio::test]
    async fn failed_provisioning_reports_error() {
        let gw = gateway(StubOrchestrator::failing_launch("timeout"));
        let token = gw.register("alice").await;

        assert_eq!(
            gw.wait_ready(&token).await,
            json!({ "status": "error", "error": "timeout" })
        );
        assert_redirected(&gw.send("GET", "/status", Some(&token), None).await);
        gw.register("alice").await;
    }

    #[tokio::test]
    async fn wrong_state_requests_redirect() {
        let gw = gateway(StubOrchestrator::with_port(32000).held());

        assert_redirected(&gw.send("GET", "/dashboard", None, None).await);
        assert_redirected(&gw.send("POST", "/extend", Some("not-a-token"), None).await);

        let token = gw.register("alice").await;
        assert_redirected(&gw.send("POST", "/extend", Some(&token), None).await);
        assert_redirected(&gw.send("GET", "/dashboard", Some(&token), None).await);

        gw.orchestrator.release(1);
    }

    #[tokio::test]
    async fn extend_and_flags() {
        let gw = gateway(StubOrchestrator::with_port(32000));
        let token = gw.register("alice").await;
        gw.wait_ready(&token).await;

        let body = json_body(gw.send("POST", "/extend", Some(&token), None).await).await;
        assert_eq!(body["time_left"], "1:30:00");

        let wrong = gw
            .send("POST", "/submit_flag", Some(&token), Some(json!({ "flag": "wrong" })))
            .await;
        assert_eq!(json_body(wrong).await, json!({ "correct": false }));

        let right = gw
            .send("POST", "/submit_flag", Some(&token), Some(json!({ "flag": TEST_FLAG })))
            .await;
        assert_eq!(json_body(right).await, json!({ "correct": true }));

        let public = gw
            .send("POST", "/check_flag", None, Some(json!({ "flag": TEST_FLAG })))
            .await;
        assert_eq!(json_body(public).await, json!({ "correct": true }));
    }

    #[tokio::test]
    async fn expired_dashboard_returns_notice() {
        let gw = gateway(StubOrchestrator::with_port(32000));
        let token = gw.register("alice").await;
        gw.wait_ready(&token).await;

        gw.clock.advance(TimeDelta::hours(1));
        let resp = gw.send("GET", "/dashboard", Some(&token), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            json!({ "expired": true, "notice": EXPIRED_NOTICE })
        );
        assert_eq!(gw.orchestrator.destroyed(), 1);
        assert_redirected(&gw.send("GET", "/dashboard", Some(&token), None).await);
    }

    #[tokio::test]
    async fn logout_drops_session() {
        let gw = gateway(StubOrchestrator::with_port(32000));
        let token = gw.register("alice").await;
        gw.wait_ready(&token).await;

        assert_redirected(&gw.send("POST", "/logout", Some(&token), None).await);
        assert_redirected(&gw.send("GET", "/status", Some(&token), None).await);
        gw.register("alice").await;
    }
}
