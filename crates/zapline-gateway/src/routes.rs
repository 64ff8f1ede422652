//! API route handlers for the gateway.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use zapline_channels::webhook::InboundWebhook;
use zapline_core::error::ZaplineError;
use zapline_core::traits::ZapRegistry;
use zapline_core::types::{NewZap, ZapRunResult, ZapUpdate};

use super::server::AppState;

/// Error response: `{success: false, message, error}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error: String,
}

impl ApiError {
    /// Map a pipeline error: not found → 404, bad input → 400, anything else → 500.
    pub fn from_error(message: &str, err: ZaplineError) -> Self {
        let status = match &err {
            ZaplineError::NotFound(_) => StatusCode::NOT_FOUND,
            ZaplineError::InvalidRequest(_) | ZaplineError::InvalidTrigger(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("❌ {message}: {err}");
        }
        Self {
            status,
            message: message.to_string(),
            error: err.to_string(),
        }
    }

    fn not_found(message: &str, what: String) -> Self {
        Self::from_error(message, ZaplineError::NotFound(what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "message": self.message,
                "error": self.error,
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run summary with the `success`/`message` envelope.
fn run_summary(result: &ZapRunResult, done: &str) -> Value {
    let mut body = serde_json::to_value(result).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        let message = if result.all_succeeded() {
            format!("{done} successfully")
        } else {
            format!("{done} with some errors")
        };
        map.insert("success".into(), json!(true));
        map.insert("message".into(), json!(message));
    }
    body
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "zapline-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

// ─── Trigger boundaries ───────────────────────────────────────

/// `POST /webhook/{webhookId}`: run the Zap bound to this webhook inline.
pub async fn webhook_inbound(
    State(state): State<Arc<AppState>>,
    Path(webhook_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    const FAILED: &str = "Failed to process webhook";

    let zap = state
        .db
        .find_zap_by_webhook(&webhook_id)
        .map_err(|e| ApiError::from_error(FAILED, e))?
        .ok_or_else(|| {
            ApiError::not_found("Webhook not found or inactive", format!("webhook '{webhook_id}'"))
        })?;

    let headers = headers
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let inbound = InboundWebhook::new(webhook_id, headers, body.to_vec());
    tracing::info!("🪝 Webhook {} → zap '{}'", inbound.webhook_id, zap.name);

    let result = state
        .engine
        .execute(&zap, inbound.trigger_payload())
        .await
        .map_err(|e| ApiError::from_error(FAILED, e))?;
    Ok(Json(run_summary(&result, "Webhook processed")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default, alias = "triggerData")]
    pub trigger_payload: Option<Value>,
}

/// `POST /execute/{zapId}`: run a Zap with a caller-supplied trigger payload.
pub async fn execute_zap(
    State(state): State<Arc<AppState>>,
    Path(zap_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    const FAILED: &str = "Failed to execute zap";

    let request: ExecuteRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ExecuteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::from_error(
                "Invalid request body",
                ZaplineError::InvalidRequest(e.to_string()),
            )
        })?
    };
    let payload = request.trigger_payload.unwrap_or_else(|| json!({}));

    let result = state
        .engine
        .execute_by_id(&zap_id, payload)
        .await
        .map_err(|e| match e {
            ZaplineError::NotFound(_) => ApiError::from_error("Zap not found", e),
            e => ApiError::from_error(FAILED, e),
        })?;
    Ok(Json(run_summary(&result, "Zap executed")))
}

// ─── Zap management ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListZapsQuery {
    pub user_id: Option<String>,
}

/// `GET /api/v1/zaps?userId=`: active Zaps of a user.
pub async fn list_zaps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListZapsQuery>,
) -> ApiResult<Json<Value>> {
    let user_id = query.user_id.filter(|u| !u.is_empty()).ok_or_else(|| {
        ApiError::from_error(
            "userId is required",
            ZaplineError::InvalidRequest("missing userId query parameter".into()),
        )
    })?;
    let zaps = state
        .db
        .list_zaps_by_owner(&user_id)
        .map_err(|e| ApiError::from_error("Failed to list zaps", e))?;
    Ok(Json(json!({ "success": true, "zaps": zaps })))
}

pub async fn get_zap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let zap = state
        .db
        .get_zap(&id)
        .map_err(|e| ApiError::from_error("Failed to load zap", e))?
        .filter(|z| z.is_active())
        .ok_or_else(|| ApiError::from_error("Zap not found", ZaplineError::zap_not_found(&id)))?;
    Ok(Json(json!({ "success": true, "zap": zap })))
}

pub async fn create_zap(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewZap>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let zap = state
        .db
        .create_zap(&body)
        .map_err(|e| ApiError::from_error("Failed to create zap", e))?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "zap": zap }))))
}

pub async fn update_zap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ZapUpdate>,
) -> ApiResult<Json<Value>> {
    let zap = state
        .db
        .update_zap(&id, &body)
        .map_err(|e| ApiError::from_error("Failed to update zap", e))?;
    Ok(Json(json!({ "success": true, "zap": zap })))
}

/// Soft delete: the Zap stops triggering, its history stays.
pub async fn delete_zap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .db
        .soft_delete_zap(&id)
        .map_err(|e| ApiError::from_error("Failed to delete zap", e))?;
    Ok(Json(json!({ "success": true, "message": "Zap deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    10
}

pub async fn list_zap_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let limit = page.limit.clamp(1, 100);
    let runs = state
        .db
        .list_runs(&id, limit, page.offset)
        .map_err(|e| ApiError::from_error("Failed to list runs", e))?;
    Ok(Json(json!({
        "success": true,
        "runs": runs,
        "limit": limit,
        "offset": page.offset,
    })))
}

pub async fn list_action_runs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state
        .db
        .get_zap_run(&run_id)
        .map_err(|e| ApiError::from_error("Failed to load run", e))?
        .ok_or_else(|| ApiError::not_found("Run not found", format!("zap run '{run_id}'")))?;
    let action_runs = state
        .db
        .list_action_runs(&run.id)
        .map_err(|e| ApiError::from_error("Failed to list action runs", e))?;
    Ok(Json(json!({ "success": true, "run": run, "actionRuns": action_runs })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use zapline_core::types::{NewAction, NewTrigger};

    fn test_state() -> State<Arc<AppState>> {
        State(Arc::new(AppState::in_memory().unwrap()))
    }

    fn webhook_zap(state: &AppState, webhook_id: &str, actions: &[&str]) -> zapline_core::types::Zap {
        state
            .db
            .create_zap(&NewZap {
                name: "Webhook zap".into(),
                owner_id: "u1".into(),
                trigger: NewTrigger {
                    trigger_type: "webhook".into(),
                    metadata: json!({ "webhookId": webhook_id }),
                },
                actions: actions
                    .iter()
                    .map(|t| NewAction {
                        action_type: (*t).into(),
                        metadata: json!({ "to": "a@example.com", "body": "hi" }),
                        sorting_order: None,
                    })
                    .collect(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check(test_state()).await.0;
        assert_eq!(json["status"], "ok");
        assert!(json["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn test_webhook_runs_zap() {
        let state = test_state();
        let zap = webhook_zap(&state, "hook-1", &["email", "slack"]);

        let mut headers = HeaderMap::new();
        headers.insert("x-source", HeaderValue::from_static("stripe"));
        let json = webhook_inbound(
            state.clone(),
            Path("hook-1".into()),
            headers,
            Bytes::from_static(br#"{"amount": 10}"#),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["message"], "Webhook processed successfully");
        assert_eq!(json["actionResults"].as_array().unwrap().len(), 2);

        let runs = state.db.list_runs(&zap.id, 10, 0).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].metadata["webhook"]["payload"]["amount"], 10);
        assert_eq!(runs[0].metadata["webhook"]["headers"]["x-source"], "stripe");
    }

    #[tokio::test]
    async fn test_webhook_unknown_is_404_without_run() {
        let state = test_state();
        let zap = webhook_zap(&state, "hook-1", &["email"]);

        let err = webhook_inbound(state.clone(), Path("other".into()), HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Webhook not found or inactive");
        assert!(state.db.list_runs(&zap.id, 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_partial_failure_reported() {
        let state = test_state();
        webhook_zap(&state, "hook-2", &["email", "fax"]);
        let json = webhook_inbound(state, Path("hook-2".into()), HeaderMap::new(), Bytes::new())
            .await
            .unwrap()
            .0;
        assert_eq!(json["status"], "partially_completed");
        assert_eq!(json["message"], "Webhook processed with some errors");
        assert_eq!(json["actionResults"][1]["success"], false);
    }

    #[tokio::test]
    async fn test_execute_accepts_trigger_data_alias() {
        let state = test_state();
        let zap = webhook_zap(&state, "hook-3", &["email"]);

        let body = Bytes::from_static(br#"{"triggerData": {"price": 2100}}"#);
        let json = execute_zap(state.clone(), Path(zap.id.clone()), body)
            .await
            .unwrap()
            .0;
        assert_eq!(json["zapId"], zap.id.as_str());
        assert_eq!(json["status"], "completed");

        let runs = state.db.list_runs(&zap.id, 10, 0).unwrap();
        assert_eq!(runs[0].metadata["price"], 2100);
    }

    #[tokio::test]
    async fn test_execute_errors() {
        let state = test_state();
        let err = execute_zap(state.clone(), Path("missing".into()), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let zap = webhook_zap(&state, "hook-4", &["email"]);
        let err = execute_zap(state, Path(zap.id), Bytes::from_static(b"not json"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_zap_crud() {
        let state = test_state();
        let body = serde_json::from_value::<NewZap>(json!({
            "name": "ETH alert",
            "ownerId": "u9",
            "trigger": {"type": "price", "metadata": {"symbol": "ETH", "targetPrice": 2000}},
            "actions": [{"type": "email", "metadata": {"to": "a@b.c"}}]
        }))
        .unwrap();
        let (status, created) = create_zap(state.clone(), Json(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let id = created.0["zap"]["id"].as_str().unwrap().to_string();

        let listed = list_zaps(state.clone(), Query(ListZapsQuery { user_id: Some("u9".into()) }))
            .await
            .unwrap()
            .0;
        assert_eq!(listed["zaps"].as_array().unwrap().len(), 1);

        let update = ZapUpdate {
            name: Some("ETH moon".into()),
            ..Default::default()
        };
        let updated = update_zap(state.clone(), Path(id.clone()), Json(update))
            .await
            .unwrap()
            .0;
        assert_eq!(updated["zap"]["name"], "ETH moon");
        assert_eq!(updated["zap"]["actions"].as_array().unwrap().len(), 1);

        delete_zap(state.clone(), Path(id.clone())).await.unwrap();
        let err = get_zap(state.clone(), Path(id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_zaps_requires_user() {
        let err = list_zaps(test_state(), Query(ListZapsQuery { user_id: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_runs_and_action_runs() {
        let state = test_state();
        let zap = webhook_zap(&state, "hook-5", &["email", "webhook"]);
        let summary = execute_zap(state.clone(), Path(zap.id.clone()), Bytes::new())
            .await
            .unwrap()
            .0;
        let run_id = summary["runId"].as_str().unwrap().to_string();

        let runs = list_zap_runs(
            state.clone(),
            Path(zap.id),
            Query(Pagination { limit: 10, offset: 0 }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(runs["runs"][0]["id"], run_id.as_str());

        let actions = list_action_runs(state.clone(), Path(run_id)).await.unwrap().0;
        assert_eq!(actions["actionRuns"].as_array().unwrap().len(), 2);

        let err = list_action_runs(state, Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_status_mapping() {
        let bad = ApiError::from_error("x", ZaplineError::InvalidTrigger("y".into()));
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        let boom = ApiError::from_error("x", ZaplineError::Database("locked".into()));
        assert_eq!(boom.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(boom.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
