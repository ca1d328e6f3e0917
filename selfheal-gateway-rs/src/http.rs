// selfheal-gateway-rs/src/http.rs
//
// Thin HTTP layer over the orchestrator. The smart-call endpoint always
// answers 200 for orchestrated outcomes - the `status` field inside the
// body conveys success or error. Only store-level faults surface as 500.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::model::{normalize_target, SmartCallRequest};
use crate::orchestrator::ConvergenceOrchestrator;
use crate::store::RuleStore;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConvergenceOrchestrator>,
    pub store: Arc<dyn RuleStore>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Build the router with all gateway endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Start the uptime clock at router construction, not first /health hit.
    Lazy::force(&START_TIME);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/smart-call", post(smart_call_handler))
        .route("/api/rules/:target", delete(delete_rules_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// POST /api/smart-call - run the convergence loop for one request.
async fn smart_call_handler(
    State(state): State<AppState>,
    Json(request): Json<SmartCallRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate_request(&request) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: message,
                code: 400,
            }),
        )
            .into_response();
    }

    match state.orchestrator.handle_smart_call(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            // Store faults are the one failure class allowed to surface
            // as a transport-level error: silently losing a learned rule
            // is worse than failing loudly.
            error!(error = %e, "store failure during smart-call");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Store failure: {}", e),
                    code: 500,
                }),
            )
                .into_response()
        }
    }
}

fn validate_request(request: &SmartCallRequest) -> Result<(), String> {
    if normalize_target(&request.target).is_empty() {
        return Err("target must not be blank".to_string());
    }
    Ok(())
}

/// DELETE /api/rules/{target} - reset learned rules for a target.
async fn delete_rules_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_rules_for_target(&target).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": normalize_target(&target) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Store failure: {}", e),
                code: 500,
            }),
        )
            .into_response(),
    }
}

/// GET /health - store reachability plus uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.store.is_healthy().await;
    let response = HealthResponse {
        healthy,
        service_name: "selfheal-gateway".to_string(),
        uptime_seconds: START_TIME.elapsed().as_secs() as i64,
        status: if healthy { "SERVING" } else { "DEGRADED" }.to_string(),
    };
    Json(response)
}

/// GET / - service banner.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Self-Healing API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "POST /api/smart-call",
            "DELETE /api/rules/{target}"
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;

    #[test]
    fn blank_target_is_rejected() {
        let request = SmartCallRequest {
            target: "  / ".to_string(),
            payload: Payload::new(),
            options: None,
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn normal_target_passes_validation() {
        let request = SmartCallRequest {
            target: "v1/orders".to_string(),
            payload: Payload::new(),
            options: None,
        };
        assert!(validate_request(&request).is_ok());
    }

    #[tokio::test]
    async fn building_the_router_starts_the_uptime_clock() {
        let store: Arc<dyn RuleStore> = Arc::new(crate::store::MemoryRuleStore::new());
        let orchestrator = Arc::new(ConvergenceOrchestrator::new(
            store.clone(),
            Arc::new(crate::upstream::HttpUpstreamClient::new("http://localhost:8081")),
            Arc::new(crate::proposer::InferenceProposer::new(
                crate::inference::InferenceEngine::new(),
            )),
            1_000,
        ));
        let _router = router(AppState {
            orchestrator,
            store,
        });

        assert!(Lazy::get(&START_TIME).is_some());
    }
}
