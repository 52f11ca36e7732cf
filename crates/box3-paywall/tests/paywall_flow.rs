use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy_signer_local::PrivateKeySigner;
use axum::{
    Extension, Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
    routing::get,
};
use box3_core::{
    challenge::{ChallengeBody, PaymentChallenge},
    decision::ErrorReason,
    facilitator::{
        Facilitator, PaymentRequest, SettleResult, SupportedResponse, VerifyResult,
    },
    proof::{PAYMENT_TRANSACTION_HEADER, PaymentProof},
    types::{Price, TimestampSeconds},
};
use box3_kit::{
    ledger::LedgerFacilitator,
    signer::{ProofOptions, Wallet},
};
use box3_paywall::{
    paywall::{PayWall, PayWallConfig, ProtectedRoute},
    processor::PaymentState,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const PAY_TO: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";
const USDC: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

fn challenge(resource: &str, amount: &str) -> PaymentChallenge {
    PaymentChallenge::builder()
        .network("base-sepolia")
        .amount(amount)
        .asset(USDC)
        .pay_to(PAY_TO)
        .resource(resource)
        .description(format!("Please pay {amount} USDC to unlock this box."))
        .build()
}

fn routes() -> Vec<ProtectedRoute> {
    vec![
        ProtectedRoute::from_challenge(challenge("/api/unlock-box", "$0.01")),
        ProtectedRoute::from_challenge(challenge("/api/premium", "$0.05")),
    ]
}

async fn unlocked(Extension(state): Extension<PaymentState>) -> Json<Value> {
    Json(json!({
        "route": state.route,
        "payer": state.payer(),
        "transaction": state.transaction(),
    }))
}

async fn missing() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("no such box"))
        .unwrap()
}

fn app<F: Facilitator + Clone + 'static>(paywall: PayWall<F>) -> Router {
    Router::new()
        .route("/api/unlock-box", get(unlocked))
        .route("/api/premium", get(unlocked))
        .route("/api/missing", get(missing))
        .route("/health", get(|| async { "ok" }))
        .layer(paywall)
}

fn ledger_paywall(ledger: &LedgerFacilitator) -> PayWall<LedgerFacilitator> {
    PayWall::builder()
        .facilitator(ledger.clone())
        .routes(routes())
        .build()
}

async fn funded_signer(ledger: &LedgerFacilitator) -> PrivateKeySigner {
    let signer = PrivateKeySigner::random();
    ledger
        .fund(signer.address(), &Price::from("1"))
        .await
        .expect("funding should succeed");
    signer
}

async fn proof_for(signer: &PrivateKeySigner, challenge: &PaymentChallenge) -> PaymentProof {
    signer
        .sign(challenge, &ProofOptions::default())
        .await
        .expect("signing should succeed")
}

fn get_with_proof(path: &str, proof: Option<&PaymentProof>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(proof) = proof {
        builder = builder.header(header::AUTHORIZATION, proof.to_authorization().unwrap());
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn rejection(response: Response) -> ChallengeBody {
    serde_json::from_value(json_body(response).await).unwrap()
}

#[tokio::test]
async fn protected_path_without_proof_gets_challenge() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let response = app(ledger_paywall(&ledger))
        .oneshot(get_with_proof("/api/unlock-box", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let www = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .expect("challenge header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(www.contains("amount=\"$0.01\""));
    assert!(www.contains("network=\"base-sepolia\""));

    let parsed = PaymentChallenge::from_www_authenticate(&www).unwrap();
    assert!(parsed.is_complete());
    assert!(!parsed.pay_to.is_empty());

    let body = rejection(response).await;
    assert_eq!(body.error, ErrorReason::PaymentRequired);
    assert_eq!(body.message, "Please pay $0.01 USDC to unlock this box.");
    assert_eq!(body.challenge, Some(parsed));
}

#[tokio::test]
async fn unprotected_path_passes_through() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let response = app(ledger_paywall(&ledger))
        .oneshot(get_with_proof("/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn valid_proof_unlocks_once() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let router = app(ledger_paywall(&ledger));
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let response = router
        .clone()
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let transaction = response
        .headers()
        .get(PAYMENT_TRANSACTION_HEADER)
        .expect("transaction header")
        .to_str()
        .unwrap()
        .to_string();

    let body = json_body(response).await;
    assert_eq!(body["route"], "/api/unlock-box");
    assert_eq!(body["transaction"], transaction.as_str());
    assert_eq!(body["payer"], signer.address().to_string());
    assert_eq!(ledger.balance_of(signer.address()).await, 990_000);

    let replayed = router
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(replayed.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(replayed.headers().get(PAYMENT_TRANSACTION_HEADER).is_none());
    assert_eq!(rejection(replayed).await.error, ErrorReason::InvalidProof);
    assert_eq!(ledger.balance_of(signer.address()).await, 990_000);
}

#[tokio::test]
async fn concurrent_presentations_settle_once() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let router = app(ledger_paywall(&ledger));
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let (first, second) = tokio::join!(
        router
            .clone()
            .oneshot(get_with_proof("/api/unlock-box", Some(&proof))),
        router.oneshot(get_with_proof("/api/unlock-box", Some(&proof))),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let mut statuses = [first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::PAYMENT_REQUIRED]);

    let settled = [&first, &second]
        .iter()
        .filter(|response| response.headers().contains_key(PAYMENT_TRANSACTION_HEADER))
        .count();
    assert_eq!(settled, 1);

    let refused = if first.status() == StatusCode::OK { second } else { first };
    assert_eq!(rejection(refused).await.error, ErrorReason::InvalidProof);
    assert_eq!(ledger.balance_of(signer.address()).await, 990_000);
}

#[tokio::test]
async fn proof_for_other_terms_is_invalid() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let response = app(ledger_paywall(&ledger))
        .oneshot(get_with_proof("/api/premium", Some(&proof)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(rejection(response).await.error, ErrorReason::InvalidProof);
    assert_eq!(ledger.balance_of(signer.address()).await, 1_000_000);
}

#[tokio::test]
async fn garbage_proof_is_invalid() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let request = Request::builder()
        .uri("/api/unlock-box")
        .header(header::AUTHORIZATION, "x402 bm90IGEgcHJvb2Y=")
        .body(Body::empty())
        .unwrap();

    let response = app(ledger_paywall(&ledger)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(rejection(response).await.error, ErrorReason::InvalidProof);
}

#[tokio::test]
async fn expired_proof_is_reported_as_expired() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let mut proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;
    proof.payload.authorization.valid_before =
        TimestampSeconds(TimestampSeconds::now().0 - 120);

    let response = app(ledger_paywall(&ledger))
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(rejection(response).await.error, ErrorReason::Expired);
}

#[tokio::test]
async fn unfunded_payer_is_insufficient() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = PrivateKeySigner::random();
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let response = app(ledger_paywall(&ledger))
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());
    assert_eq!(rejection(response).await.error, ErrorReason::InsufficientFunds);
}

/// Fails every call while `down` is set.
#[derive(Clone)]
struct Flaky {
    inner: LedgerFacilitator,
    down: Arc<AtomicBool>,
}

impl Flaky {
    fn check(&self) -> Result<(), std::io::Error> {
        if self.down.load(Ordering::SeqCst) {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "facilitator unreachable",
            ))
        } else {
            Ok(())
        }
    }
}

impl Facilitator for Flaky {
    type Error = std::io::Error;

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        self.check()?;
        Ok(self.inner.supported().await.unwrap_or_default())
    }

    async fn verify(&self, request: PaymentRequest) -> Result<VerifyResult, Self::Error> {
        self.check()?;
        match self.inner.verify(request).await {
            Ok(result) => Ok(result),
            Err(never) => match never {},
        }
    }

    async fn settle(&self, request: PaymentRequest) -> Result<SettleResult, Self::Error> {
        self.check()?;
        match self.inner.settle(request).await {
            Ok(result) => Ok(result),
            Err(never) => match never {},
        }
    }
}

#[tokio::test]
async fn facilitator_outage_is_a_server_error_and_releases_the_proof() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let down = Arc::new(AtomicBool::new(true));
    let paywall = PayWall::builder()
        .facilitator(Flaky {
            inner: ledger.clone(),
            down: down.clone(),
        })
        .routes(routes())
        .build();
    let router = app(paywall);
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let response = router
        .clone()
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = rejection(response).await;
    assert_eq!(body.error, ErrorReason::NetworkError);
    assert_eq!(body.challenge, None);

    down.store(false, Ordering::SeqCst);
    let response = router
        .oneshot(get_with_proof("/api/unlock-box", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(PAYMENT_TRANSACTION_HEADER).is_some());
}

#[tokio::test]
async fn settle_after_access_skips_configured_statuses() {
    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let missing_route = ProtectedRoute::from_challenge(challenge("/api/missing", "$0.01"));
    let paywall = PayWall::builder()
        .facilitator(ledger.clone())
        .routes([missing_route.clone()])
        .config(
            PayWallConfig::builder()
                .settle_after_access()
                .skip_settle_on_status([StatusCode::NOT_FOUND])
                .build(),
        )
        .build();
    let router = app(paywall.clone());
    let proof = proof_for(&signer, &missing_route.challenge).await;

    let response = router
        .clone()
        .oneshot(get_with_proof("/api/missing", Some(&proof)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(PAYMENT_TRANSACTION_HEADER).is_none());
    assert_eq!(ledger.balance_of(signer.address()).await, 1_000_000);
    assert_eq!(paywall.consumed.status(&proof.id()), None);
}

#[tokio::test]
async fn step_api_exposes_each_stage() {
    use box3_paywall::paywall::Gate;

    let ledger = LedgerFacilitator::new("base-sepolia", 6);
    let signer = funded_signer(&ledger).await;
    let paywall = ledger_paywall(&ledger);
    let proof = proof_for(&signer, &challenge("/api/unlock-box", "$0.01")).await;

    let request = http::Request::builder()
        .uri("/api/unlock-box")
        .header("x-payment", proof.to_header().unwrap().0)
        .body(())
        .unwrap();

    let Ok(Gate::Paid(processor)) = paywall.process_request(request) else {
        panic!("proof should be accepted for processing");
    };
    let processor = processor.verify().await.unwrap();
    assert!(processor.payment_state.verified.is_some());

    let processor = processor
        .run_handler(|request| async move {
            let state = request.extensions().get::<PaymentState>().cloned();
            assert!(state.is_some_and(|s| s.settled.is_none()));
            http::Response::new("delivered")
        })
        .await
        .unwrap()
        .settle_on_success()
        .await
        .unwrap();

    let response = processor.response();
    assert!(response.headers().contains_key(PAYMENT_TRANSACTION_HEADER));
    let unsupported = paywall
        .check_supported()
        .await
        .unwrap_or_else(|never| match never {});
    assert!(unsupported.is_empty());
}
