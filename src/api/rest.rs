// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// `POST /webhook` receives raw signal text and answers 200 before any
// processing happens. Read-only views live under `/api/v1/`; everything
// except health requires a valid Bearer token via the `AuthBearer` extractor.
//
// CORS is permissive; the read API is meant for a local dashboard.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::position_ledger::Trade;

/// Default and ceiling for `/api/v1/decisions?limit=`.
const DEFAULT_DECISION_LIMIT: usize = 50;
const MAX_DECISION_LIMIT: usize = 1000;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/webhook", post(webhook))
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/trades", get(trades))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/signals/recent", get(recent_signals))
        .route("/api/v1/validation", get(validation))
        .route("/api/v1/validation/send", post(send_validation))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Webhook (public)
// =============================================================================

/// Accepts any body. Validation happens on the pipeline task, so malformed
/// signals still get a 200 and are only logged.
async fn webhook(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    debug!(bytes = body.len(), "webhook received");
    state.accept_signal(body);
    (StatusCode::OK, "OK")
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Positions & trades (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ledger.open_positions())
}

#[derive(Serialize)]
struct TradesResponse {
    trades: Vec<Trade>,
    cumulative_profit: f64,
}

async fn trades(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(TradesResponse {
        trades: state.ledger.trades(),
        cumulative_profit: state.ledger.cumulative_profit(),
    })
}

// =============================================================================
// Decisions (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct DecisionQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DECISION_LIMIT)
        .min(MAX_DECISION_LIMIT);
    Json(state.audit.recent(limit))
}

// =============================================================================
// Recent signals (authenticated)
// =============================================================================

async fn recent_signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.pipeline.recent().snapshot())
}

// =============================================================================
// Validation report (authenticated)
// =============================================================================

async fn validation(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.validation_report())
}

/// Queue the rendered report for the notification sink. Delivery is not
/// awaited; the response reports the queue depth after enqueueing.
async fn send_validation(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let report = state.validation_report();
    let _handle = state.queue.enqueue(report.render_html());
    let pending = state.queue.pending();
    info!(pending, "validation report queued");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true, "pending": pending })),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::app_state::test_support::{state, TEST_TOKEN};
    use crate::collaborators::fake::RecordingSink;

    const BUY_BODY: &str = "TBO Buy conditions met\nSymbol: BINANCE:ETHUSDT\nPrice: 2000\nRSI: 28";

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(state("FINAL VERDICT: SKIP", Arc::new(RecordingSink::default())).await);
        let resp = app.oneshot(get("/api/v1/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["signals_received"], 0);
    }

    #[tokio::test]
    async fn authenticated_routes_require_token() {
        let app = router(state("FINAL VERDICT: SKIP", Arc::new(RecordingSink::default())).await);

        let resp = app.clone().oneshot(get("/api/v1/positions", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(json_body(resp).await["error"].is_string());

        let resp = app
            .clone()
            .oneshot(get("/api/v1/positions", Some("wrong-token")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .oneshot(get("/api/v1/positions", Some(TEST_TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn validation_reports_insufficient_data() {
        let app = router(state("FINAL VERDICT: SKIP", Arc::new(RecordingSink::default())).await);
        let resp = app
            .oneshot(get("/api/v1/validation", Some(TEST_TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "insufficient_data");
        assert_eq!(body["required"], 20);
    }

    #[tokio::test]
    async fn webhook_acknowledges_then_processes() {
        let sink = Arc::new(RecordingSink::default());
        let state = state("FINAL VERDICT: BUY", sink.clone()).await;
        let app = router(state.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from(BUY_BODY))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.health().signals_received, 1);

        for _ in 0..100 {
            if state.audit.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.audit.len(), 1);
        assert!(state.ledger.is_open("ETHUSD"));

        let resp = app
            .clone()
            .oneshot(get("/api/v1/decisions?limit=5", Some(TEST_TOKEN)))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["symbol"], "ETHUSD");

        let resp = app
            .oneshot(get("/api/v1/signals/recent", Some(TEST_TOKEN)))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body[0]["asset_symbol"], "ETHUSD");
    }

    #[tokio::test]
    async fn malformed_webhook_is_still_acknowledged() {
        let state = state("FINAL VERDICT: BUY", Arc::new(RecordingSink::default())).await;
        let app = router(state.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from("hello world"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.audit.len(), 0);
        assert!(state.ledger.open_positions().is_empty());
    }

    #[tokio::test]
    async fn validation_send_enqueues_report() {
        let sink = Arc::new(RecordingSink::default());
        let app = router(state("FINAL VERDICT: SKIP", sink.clone()).await);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/validation/send")
            .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(resp).await["queued"], true);

        for _ in 0..100 {
            if !sink.messages().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Validation Report"));
    }
}
