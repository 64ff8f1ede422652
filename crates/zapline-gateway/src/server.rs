//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use zapline_core::config::GatewayConfig;
use zapline_scheduler::{ExecutionEngine, ZapDb};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Zap definitions, runs and credentials.
    pub db: Arc<ZapDb>,
    /// Runs webhook and execute requests inline.
    pub engine: Arc<ExecutionEngine>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(db: Arc<ZapDb>, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            db,
            engine,
            start_time: std::time::Instant::now(),
        }
    }

    /// In-memory store with a simulated executor.
    #[cfg(test)]
    pub(crate) fn in_memory() -> zapline_core::Result<Self> {
        let db = Arc::new(ZapDb::open(":memory:")?);
        let engine = Arc::new(ExecutionEngine::new(
            db.clone(),
            db.clone(),
            Arc::new(zapline_scheduler::SimulatedExecutor),
            std::time::Duration::from_secs(5),
        ));
        Ok(Self::new(db, engine))
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));
    // Example: ZAPLINE_CORS_ORIGINS=https://app.example.com,https://admin.example.com
    let cors = match std::env::var("ZAPLINE_CORS_ORIGINS") {
        Ok(origins_str) => {
            let origins: Vec<_> = origins_str
                .split(',')
                .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins)
        }
        Err(_) => cors.allow_origin(Any),
    };

    Router::new()
        .route("/health", get(super::routes::health_check))
        // Trigger boundaries
        .route("/webhook/{webhook_id}", post(super::routes::webhook_inbound))
        .route("/execute/{zap_id}", post(super::routes::execute_zap))
        // Zap management
        .route(
            "/api/v1/zaps",
            get(super::routes::list_zaps).post(super::routes::create_zap),
        )
        .route(
            "/api/v1/zaps/{id}",
            get(super::routes::get_zap)
                .put(super::routes::update_zap)
                .delete(super::routes::delete_zap),
        )
        .route("/api/v1/zaps/{id}/runs", get(super::routes::list_zap_runs))
        .route(
            "/api/v1/runs/{id}/actions",
            get(super::routes::list_action_runs),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Serve the gateway until the listener fails.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;
    use zapline_core::ZaplineError;
    use zapline_core::types::{NewAction, NewTrigger, NewZap, RunStatus, TriggerEvent, TriggerKind};
    use zapline_scheduler::{HttpHandoff, RunHandoff};

    #[tokio::test]
    async fn test_routes_are_wired() {
        let app = build_router(AppState::in_memory().unwrap());

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let missing = app
            .clone()
            .oneshot(
                Request::post("/webhook/unknown")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let no_user = app
            .oneshot(Request::get("/api/v1/zaps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(no_user.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_http_handoff_round_trip() {
        let state = AppState::in_memory().unwrap();
        let zap = state
            .db
            .create_zap(&NewZap {
                name: "BTC alert".into(),
                owner_id: "u1".into(),
                trigger: NewTrigger {
                    trigger_type: "price".into(),
                    metadata: json!({"symbol": "BTC", "targetPrice": 100000}),
                },
                actions: ["email", "slack"]
                    .iter()
                    .map(|t| NewAction {
                        action_type: (*t).into(),
                        metadata: json!({"to": "a@example.com", "channel": "ops"}),
                        sorting_order: None,
                    })
                    .collect(),
            })
            .unwrap();
        let db = state.db.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, build_router(state)).await });

        let handoff =
            HttpHandoff::new(&format!("http://{addr}"), std::time::Duration::from_secs(5)).unwrap();
        let event = |zap_id: &str| TriggerEvent {
            zap_id: zap_id.into(),
            kind: TriggerKind::Price,
            payload: json!({"price": 100500.0, "symbol": "BTC"}),
            observed_at: chrono::Utc::now(),
        };

        let result = handoff.hand_off(event(&zap.id)).await.unwrap();
        assert_eq!(result.zap_id, zap.id);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.action_results.len(), 2);

        let runs = db.list_runs(&zap.id, 10, 0).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, result.run_id);
        assert_eq!(runs[0].metadata["price"], 100500.0);

        let missing = handoff.hand_off(event("nope")).await;
        assert!(matches!(missing, Err(ZaplineError::NotFound(_))));

        server.abort();
    }
}
