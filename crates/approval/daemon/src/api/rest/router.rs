//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Approvals
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::create_approval),
        )
        .route("/approvals/:id", get(handlers::get_approval))
        .route("/approvals/:id/decision", post(handlers::record_decision))
        .route("/approvals/:id/cancel", post(handlers::cancel_approval))
        .route("/approvals/:id/escalate", post(handlers::escalate_approval))
        // Audit
        .route("/approvals/:id/history", get(handlers::approval_history))
        .route("/approvals/:id/replay", get(handlers::replay_approval))
        .route("/approvals/:id/verify", get(handlers::verify_approval))
        // Replies relayed by the mail/chat gateway
        .route("/intake/reply", post(handlers::receive_reply));

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_engine::{ApprovalOrchestrator, EngineConfig, TracingNotifier};
    use approval_store::InMemoryApprovalStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let orchestrator = ApprovalOrchestrator::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(TracingNotifier),
            EngineConfig::default(),
        );
        create_router(AppState::new(orchestrator), &ServerConfig::default())
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, chain: Value) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/approvals",
            Some(json!({ "chain": chain, "sla": 3600, "context": { "hire": "jdoe" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["armed_timers"], 0);
    }

    #[tokio::test]
    async fn test_create_and_decide() {
        let app = app();
        let id = create(&app, json!(["lead@corp.com", "vp@corp.com"])).await;

        let (status, body) = send(&app, "GET", &format!("/api/v1/approvals/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "pending");
        assert_eq!(body["current_approver"], "lead@corp.com");
        assert_eq!(body["context"]["hire"], "jdoe");
        let remaining = body["remaining_sla_secs"].as_u64().unwrap();
        assert!((3599..=3600).contains(&remaining));

        let decision = format!("/api/v1/approvals/{}/decision", id);
        let (status, body) = send(
            &app,
            "POST",
            &decision,
            Some(json!({ "approver": "vp@corp.com", "outcome": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "UNAUTHORIZED_APPROVER");

        let (status, body) = send(
            &app,
            "POST",
            &decision,
            Some(json!({ "approver": "lead@corp.com", "outcome": "approved", "comments": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "applied");
        assert_eq!(body["state"], "approved");

        let (status, body) = send(
            &app,
            "POST",
            &decision,
            Some(json!({ "approver": "lead@corp.com", "outcome": "rejected" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "already_resolved");
        assert_eq!(body["approval"]["decision"]["outcome"], "approved");

        let (_, history) =
            send(&app, "GET", &format!("/api/v1/approvals/{}/history", id), None).await;
        let causes: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["cause"].as_str().unwrap())
            .collect();
        assert_eq!(causes, vec!["created", "decision"]);

        let (status, body) =
            send(&app, "GET", &format!("/api/v1/approvals/{}/verify", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intact"], true);
        assert_eq!(body["entries"], 2);
    }

    #[tokio::test]
    async fn test_cancel_and_escalate() {
        let app = app();
        let id = create(&app, json!(["a", "b"])).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/approvals/{}/escalate", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "escalated");
        assert_eq!(body["approval"]["current_level"], 1);

        let cancel = format!("/api/v1/approvals/{}/cancel", id);
        let (status, body) = send(&app, "POST", &cancel, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "applied");
        assert_eq!(body["state"], "canceled");

        let (status, body) = send(
            &app,
            "POST",
            &cancel,
            Some(json!({ "reason": "duplicate" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "already_resolved");

        let (_, listed) = send(&app, "GET", "/api/v1/approvals?state=canceled", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, listed) = send(&app, "GET", "/api/v1/approvals?state=pending", None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_before_creation_is_empty() {
        let app = app();
        let id = create(&app, json!(["a"])).await;

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/v1/approvals/{}/replay?at=2000-01-01T00:00:00Z", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("point").is_none());
    }

    #[tokio::test]
    async fn test_reply_intake() {
        let app = app();
        let id = create(&app, json!(["manager@contoso.com"])).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/intake/reply",
            Some(json!({
                "subject": format!("RE: Approval required [{}]", id),
                "body": "No - budget is frozen",
                "sender": "Manager <manager@contoso.com>",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "rejected");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/intake/reply",
            Some(json!({ "subject": "hello", "body": "yes", "sender": "a@b.c" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app();

        let (status, _) = send(&app, "GET", "/api/v1/approvals/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = format!("/api/v1/approvals/APR-{}", "0".repeat(32));
        let (status, body) = send(&app, "GET", &unknown, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/approvals",
            Some(json!({ "chain": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, _) = send(&app, "GET", "/api/v1/approvals?state=limbo", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
