use crate::audit::JsonlAuditSink;
use crate::client::DispatchClient;
use crate::providers::{ProviderKind, ProviderPreset};
use crate::translate::canonical::CanonicalRequest;
use crate::translate::errors::CanonicalError;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub client: DispatchClient,
    /// Present when the audit trail is kept in-process and can be browsed.
    pub audit: Option<JsonlAuditSink>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/responses", post(handle_responses))
        .route("/health", get(handle_health))
        .route("/v1/providers", get(handle_providers))
        .route("/v1/audit", get(handle_audit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{"error": {...}}` with the canonical status.
pub fn error_response(err: CanonicalError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(serde_json::json!({ "error": err }))).into_response()
}

async fn handle_responses(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: CanonicalRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting unparseable request");
            let provider = state.client.provider().map_or("unknown", ProviderKind::as_str);
            return error_response(CanonicalError::invalid_request(
                format!("Invalid request body: {e}"),
                provider,
            ));
        }
    };

    tracing::info!(model = %req.model, stream = req.stream, "request");

    if req.stream {
        handle_streaming(state, req).await
    } else {
        match state.client.create(req).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => {
                tracing::warn!(provider = %e.provider, status = e.status, error = %e, "request failed");
                error_response(e)
            }
        }
    }
}

async fn handle_streaming(state: Arc<AppState>, req: CanonicalRequest) -> Response {
    let events = match state.client.stream(req).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(provider = %e.provider, status = e.status, error = %e, "stream setup failed");
            return error_response(e);
        }
    };

    let sse = events.map(|result| -> std::result::Result<Event, Infallible> {
        Ok(match result {
            Ok(event) => sse_event(event.event_name(), &event),
            Err(e) => sse_event("error", &serde_json::json!({ "error": e })),
        })
    });

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

fn sse_event<T: serde::Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event("error").data("{}"))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_providers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.client.config();
    let providers: Vec<serde_json::Value> = ProviderPreset::all()
        .iter()
        .map(|preset| {
            serde_json::json!({
                "id": preset.kind.as_str(),
                "base_url": config.effective_base_url(preset.kind),
                "api_key_env": preset.default_api_key_env,
                "active": state.client.provider() == Some(preset.kind),
            })
        })
        .collect();

    Json(serde_json::json!({ "data": providers, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

async fn handle_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    match &state.audit {
        Some(audit) => Json(serde_json::json!({
            "data": audit.recent(query.limit),
            "object": "list",
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": { "type": "not_found_error", "message": "audit log disabled" } })),
        )
            .into_response(),
    }
}
