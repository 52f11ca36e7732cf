//! HTTP surface of the development facilitator.
//!
//! - `GET  /supported` - List supported payment kinds
//! - `POST /verify`    - Verify a payment proof against its challenge
//! - `POST /settle`    - Settle a payment proof against the ledger
//! - `POST /fund`      - Credit a development balance
//! - `GET  /health`    - Health check

use alloy_primitives::Address;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use box3_core::{
    facilitator::{
        Facilitator, PaymentRequest, SettleResponse, SupportedResponse, VerifyResponse,
    },
    types::Price,
};
use box3_kit::ledger::LedgerFacilitator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone, Deserialize)]
pub struct FundRequest {
    pub address: Address,
    pub amount: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundResponse {
    pub address: Address,
    /// Balance in minor units, as a decimal string.
    pub balance: String,
}

pub fn router(ledger: LedgerFacilitator) -> Router {
    Router::new()
        .route("/supported", get(supported))
        .route("/verify", post(verify))
        .route("/settle", post(settle))
        .route("/fund", post(fund))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

async fn supported(State(ledger): State<LedgerFacilitator>) -> Json<SupportedResponse> {
    match ledger.supported().await {
        Ok(supported) => Json(supported),
        Err(never) => match never {},
    }
}

async fn verify(
    State(ledger): State<LedgerFacilitator>,
    Json(request): Json<PaymentRequest>,
) -> Json<VerifyResponse> {
    let result = match ledger.verify(request).await {
        Ok(result) => result,
        Err(never) => match never {},
    };
    Json(result.into())
}

async fn settle(
    State(ledger): State<LedgerFacilitator>,
    Json(request): Json<PaymentRequest>,
) -> Json<SettleResponse> {
    let result = match ledger.settle(request).await {
        Ok(result) => result,
        Err(never) => match never {},
    };
    Json(result.into())
}

async fn fund(
    State(ledger): State<LedgerFacilitator>,
    Json(request): Json<FundRequest>,
) -> Response {
    match ledger.fund(request.address, &request.amount).await {
        Ok(balance) => Json(FundResponse {
            address: request.address,
            balance: balance.to_string(),
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Rejected funding request");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_amount",
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}
