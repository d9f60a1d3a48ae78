//! HTTP surface: Telegram webhook, operator submit endpoint and health check.
//!
//! The webhook always answers 200 so Telegram does not redeliver; the only
//! exception is a request failing the secret-token check, which is not a
//! Telegram delivery at all.
//!
//! The submit endpoint posts payments and is only mounted when an operator
//! token is configured; callers present it as a bearer token.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::bot::{handle_update, Capabilities};
use crate::errors::{PostingError, StoreError};
use crate::reconciliation::SubmitOutcome;
use crate::session::SessionStore;

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// How often expired sessions and idle chat locks are dropped
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub caps: Arc<Capabilities>,
    pub webhook_secret: Option<Arc<str>>,
    /// Bearer token for the operator endpoints; they are not served without one
    pub operator_token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/telegram/webhook", post(webhook_handler))
        .route("/health", get(health_handler));
    if state.operator_token.is_some() {
        router = router.route("/income-logs/{id}/submit", post(submit_income_log_handler));
    }
    router.with_state(state)
}

/// Serve until ctrl-c
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let housekeeping = spawn_housekeeping(state.caps.clone(), HOUSEKEEPING_INTERVAL);

    info!(addr = %listener.local_addr()?, "Starting webhook server");
    info!("  POST /telegram/webhook        - Telegram updates");
    if state.operator_token.is_some() {
        info!("  POST /income-logs/{{id}}/submit - Submit an income log");
    } else {
        warn!("OPERATOR_TOKEN not set, income log submit endpoint disabled");
    }
    info!("  GET  /health                  - Health check");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    housekeeping.abort();
    Ok(())
}

/// Periodically purge expired sessions and unused chat locks
pub fn spawn_housekeeping(caps: Arc<Capabilities>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sessions = caps.sessions.purge_expired().await;
            let locks = caps.locks.prune_idle();
            if sessions > 0 || locks > 0 {
                debug!(sessions, locks, "Housekeeping removed stale entries");
            }
        }
    })
}

/// POST /telegram/webhook
async fn webhook_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            warn!("Webhook request with invalid secret token rejected");
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "unauthorized"}))).into_response();
        }
    }

    let status = handle_update(&state.caps, &body).await;
    Json(json!({"message": status.as_str()})).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// POST /income-logs/{id}/submit
async fn submit_income_log_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let expected = state.operator_token.as_deref();
    if expected.is_none() || bearer_token(&headers) != expected {
        warn!(income_log = %id, "Submit request without valid operator token rejected");
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response();
    }

    match state.caps.engine.submit_income_log(&id).await {
        Ok(SubmitOutcome::Posted(payment)) => Json(json!({
            "status": "posted",
            "income_log": id,
            "payment_entry": payment.id,
            "amount": payment.entry.paid_amount.to_string(),
        }))
        .into_response(),
        Ok(outcome) => Json(json!({"status": outcome.as_str(), "income_log": id})).into_response(),
        Err(PostingError::Store(StoreError::NotFound(_))) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": format!("income log {id} not found")}))).into_response()
        }
        Err(e @ PostingError::Store(StoreError::OverAllocation { .. })) => {
            warn!(income_log = %id, error = %e, "Invoice settled by a concurrent submission");
            (StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e @ (PostingError::InvoiceNotFound(_) | PostingError::MissingBankAccount(_))) => {
            warn!(income_log = %id, error = %e, "Income log cannot be posted");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => {
            warn!(income_log = %id, error = %e, "Income log submission failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

/// GET /health
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
