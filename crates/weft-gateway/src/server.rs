use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use weft_core::config::GatewayConfig;
use weft_engine::RunSupervisor;
use weft_tools::ToolRegistry;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    supervisor: Arc<RunSupervisor>,
    tools: Arc<ToolRegistry>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        supervisor: Arc<RunSupervisor>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            supervisor,
            tools,
        }
    }

    pub fn router(&self) -> Router {
        router(Arc::new(AppState {
            config: self.config.clone(),
            supervisor: self.supervisor.clone(),
            tools: self.tools.clone(),
        }))
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/tools", get(routes::list_tools))
        .route("/api/orchestrator/submit", post(routes::submit))
        .route("/api/orchestrator/status/{run_id}", get(routes::status))
        .route("/api/orchestrator/cancel/{run_id}", post(routes::cancel))
        .route("/api/orchestrator/runs", get(routes::list_runs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use weft_core::config::EngineConfig;
    use weft_engine::{GraphScheduler, InMemoryRunStore, StepRegistry};
    use weft_test_utils::{DelayStep, MockTool, ScriptedStep};

    fn server(token: Option<&str>) -> GatewayServer {
        let mut steps = StepRegistry::new();
        steps.register(ScriptedStep::ok("good", "done"));
        steps.register(DelayStep::hanging("hang"));
        let scheduler = GraphScheduler::new(Arc::new(steps), EngineConfig::default());
        let supervisor = RunSupervisor::new(scheduler, Arc::new(InMemoryRunStore::new()));

        let mut tools = ToolRegistry::new();
        tools.register(MockTool::new("mock_tool", "ok"));

        GatewayServer::new(
            GatewayConfig {
                bind: "127.0.0.1:0".to_string(),
                token: token.map(str::to_string),
            },
            Arc::new(supervisor),
            Arc::new(tools),
        )
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn wait_status(app: &Router, run_id: &str, want: &str) -> serde_json::Value {
        for _ in 0..200 {
            let (_, body) = send(app, get_req(&format!("/api/orchestrator/status/{}", run_id))).await;
            if body["status"] == want {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never reached {}", run_id, want);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = server(Some("secret")).router();
        let (status, body) = send(&app, get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let app = server(Some("secret")).router();
        let (status, _) = send(&app, get_req("/api/tools")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::get("/api/tools")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"], serde_json::json!(["mock_tool"]));
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let app = server(None).router();
        let graph = serde_json::json!({
            "graph": {
                "runId": "run-1",
                "name": "demo",
                "agents": [
                    {"id": "a", "type": "good", "next": ["b"]},
                    {"id": "b", "type": "good"}
                ]
            }
        });

        let (status, body) = send(&app, post_json("/api/orchestrator/submit", graph.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["runId"], "run-1");

        let snap = wait_status(&app, "run-1", "completed").await;
        assert_eq!(snap["stepResults"]["a"]["payload"], "done");
        assert!(snap["stepResults"]["b"]["executedAt"].is_string());

        let (status, _) = send(&app, post_json("/api/orchestrator/submit", graph)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, get_req("/api/orchestrator/runs")).await;
        assert_eq!(body["runs"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let app = server(None).router();
        let (status, _) = send(&app, get_req("/api/orchestrator/status/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::post("/api/orchestrator/cancel/nope").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_running_run() {
        let app = server(None).router();
        let graph = serde_json::json!({
            "graph": {"runId": "slow", "agents": [{"id": "a", "type": "hang"}]}
        });
        let (status, _) = send(&app, post_json("/api/orchestrator/submit", graph)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let req = Request::post("/api/orchestrator/cancel/slow").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"runId": "slow", "cancelled": true}));

        let snap = wait_status(&app, "slow", "cancelled").await;
        assert_eq!(snap["stepResults"]["a"]["error"], "cancelled");
    }
}
