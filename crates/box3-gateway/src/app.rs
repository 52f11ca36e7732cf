//! The Box3 gateway router.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use box3_core::facilitator::Facilitator;
use box3_paywall::{paywall::PayWall, processor::PaymentState};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{backend::Backend, config::UNLOCK_BOX_PATH};

#[derive(Debug, Clone)]
pub struct AppState {
    pub backend: Backend,
    pub box_id: String,
}

/// Build the gateway: the paywalled unlock route, backend proxies and health.
pub fn router<F>(state: AppState, paywall: PayWall<F>) -> Router
where
    F: Facilitator + Clone + 'static,
{
    let paid = Router::new()
        .route(UNLOCK_BOX_PATH, get(unlock_box))
        .layer(paywall);

    Router::new()
        .merge(paid)
        .route("/api/create-tag", post(create_tag))
        .route("/api/get-tag", get(get_tag))
        .route("/api/verify-package", post(verify_package))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn unlock_box(
    State(state): State<AppState>,
    Extension(payment): Extension<PaymentState>,
) -> Json<Value> {
    tracing::info!(
        box_id = %state.box_id,
        payer = payment.payer().unwrap_or_default(),
        "Box unlocked"
    );

    Json(json!({
        "success": true,
        "message": "Box unlocked successfully!",
        "boxId": state.box_id,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "transaction": payment.transaction(),
    }))
}

fn failure(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

async fn create_tag(State(state): State<AppState>, body: Bytes) -> Response {
    let body = match serde_json::from_slice::<Value>(&body) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "Invalid create-tag body");
            return failure("Failed to create tag");
        }
    };

    match state.backend.create_tag(&body).await {
        Ok(data) => Json(data).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Error calling backend");
            failure("Failed to create tag")
        }
    }
}

async fn get_tag(State(state): State<AppState>) -> Response {
    match state.backend.get_tag().await {
        Ok(data) => Json(data).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Error calling backend");
            failure("Failed to get tag")
        }
    }
}

/// Whether a JSON field holds a value other than null, empty, false or zero.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

async fn verify_package(State(state): State<AppState>, body: Bytes) -> Response {
    let body = match serde_json::from_slice::<Value>(&body) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "Invalid verify-package body");
            return failure("Failed to verify package");
        }
    };

    let field = |name: &str| body.get(name).filter(|value| is_present(value));
    let (Some(product_description), Some(image_url)) =
        (field("product_description"), field("image_url"))
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing required fields: product_description and image_url"
            })),
        )
            .into_response();
    };

    match state
        .backend
        .verify_package(product_description, image_url)
        .await
    {
        Ok(data) => Json(data).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Error calling backend");
            failure("Failed to verify package")
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "box3-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
