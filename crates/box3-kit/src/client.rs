//! A payment-aware HTTP client.
//!
//! [`PaymentClient`] sends a request, and when the server answers `402` with an
//! x402 challenge it signs a proof with its [`Wallet`] and retries exactly once.
//! A second `402` is terminal.
//!
//! ```text
//! Idle -> Requested -> Succeeded                       (no payment needed)
//!                   -> ChallengeReceived -> ProofConstructed -> Retried -> Succeeded | Failed
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bon::Builder;
use box3_core::{
    challenge::{ChallengeBody, PaymentChallenge},
    decision::{ErrorReason, PaymentReceipt},
    proof::PAYMENT_TRANSACTION_HEADER,
    types::{Price, PriceError},
};
use http::{StatusCode, header};

use crate::signer::{ProofOptions, Wallet};

/// Where a logical call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Requested,
    ChallengeReceived,
    ProofConstructed,
    Retried,
    Succeeded,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed)
    }

    /// Whether a request is on the wire in this state.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, CallState::Requested | CallState::Retried)
    }

    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, Requested) => true,
            (Requested, ChallengeReceived) | (Requested, Succeeded) => true,
            (ChallengeReceived, ProofConstructed) => true,
            (ProofConstructed, Retried) => true,
            (Retried, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Upper bound on what the client agrees to pay for a single challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendingLimit {
    Unlimited,
    Max { price: Price, decimals: u8 },
}

impl Default for SpendingLimit {
    fn default() -> Self {
        SpendingLimit::Max {
            price: Price::new("0.1"),
            decimals: 6,
        }
    }
}

impl SpendingLimit {
    /// Whether `amount` is within the limit.
    pub fn allows(&self, amount: &Price) -> Result<bool, PriceError> {
        match self {
            SpendingLimit::Unlimited => Ok(true),
            SpendingLimit::Max { price, decimals } => {
                Ok(amount.to_minor_units(*decimals)? <= price.to_minor_units(*decimals)?)
            }
        }
    }
}

#[derive(Builder, Debug, Clone)]
pub struct ClientConfig {
    /// Bound on how long the wallet may take to sign.
    #[builder(default = Duration::from_secs(30))]
    pub sign_timeout: Duration,
    /// Bound on each HTTP round trip.
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
    #[builder(default)]
    pub spending_limit: SpendingLimit,
    #[builder(default)]
    pub proof: ProofOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::builder().build()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Payment proof rejected: {0}")]
    InvalidProof(String),
    #[error("Payment proof expired: {0}")]
    Expired(String),
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Wallet unavailable: {0}")]
    WalletUnavailable(String),
    #[error("Wallet did not sign within {0:?}")]
    WalletTimeout(Duration),
    #[error("Malformed payment challenge: {0}")]
    MalformedChallenge(String),
    #[error("Challenge amount {amount} exceeds spending limit {limit}")]
    AmountExceedsLimit { amount: Price, limit: Price },
    #[error("Request body cannot be replayed for the paid retry")]
    UnreplayableRequest,
    #[error("A payment is already being processed")]
    AlreadyProcessing,
    #[error("Failed to encode payment proof: {0}")]
    ProofEncoding(#[from] box3_core::errors::Error),
}

impl PaymentError {
    /// Map a server rejection reason onto an error.
    pub fn from_rejection(reason: ErrorReason, message: String) -> Self {
        match reason {
            ErrorReason::InsufficientFunds => PaymentError::InsufficientFunds(message),
            ErrorReason::Expired => PaymentError::Expired(message),
            ErrorReason::SettlementFailed => PaymentError::SettlementFailed(message),
            ErrorReason::NetworkError => PaymentError::NetworkError(message),
            ErrorReason::WalletUnavailable => PaymentError::WalletUnavailable(message),
            ErrorReason::PaymentRequired
            | ErrorReason::InvalidProof
            | ErrorReason::WalletTimeout => PaymentError::InvalidProof(message),
        }
    }

    /// The protocol reason code, for errors that have one.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            PaymentError::InsufficientFunds(_) => Some(ErrorReason::InsufficientFunds),
            PaymentError::InvalidProof(_) => Some(ErrorReason::InvalidProof),
            PaymentError::Expired(_) => Some(ErrorReason::Expired),
            PaymentError::SettlementFailed(_) => Some(ErrorReason::SettlementFailed),
            PaymentError::NetworkError(_) => Some(ErrorReason::NetworkError),
            PaymentError::WalletUnavailable(_) => Some(ErrorReason::WalletUnavailable),
            PaymentError::WalletTimeout(_) => Some(ErrorReason::WalletTimeout),
            _ => None,
        }
    }
}

/// The final response of a call and what it cost.
#[derive(Debug)]
pub struct PaidResponse {
    pub response: reqwest::Response,
    /// Present when a payment settled.
    pub receipt: Option<PaymentReceipt>,
    /// Requests put on the wire, 1 or 2.
    pub requests: u8,
    pub final_state: CallState,
}

struct Tracker<F> {
    state: CallState,
    requests: u8,
    observe: F,
}

impl<F: FnMut(CallState)> Tracker<F> {
    fn advance(&mut self, next: CallState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        self.state = next;
        if next.is_in_flight() {
            self.requests += 1;
        }
        (self.observe)(next);
    }
}

/// An HTTP client that pays x402 challenges with a wallet.
#[derive(Debug, Clone)]
pub struct PaymentClient<W> {
    pub client: reqwest::Client,
    pub wallet: W,
    pub config: ClientConfig,
}

impl<W: Wallet> PaymentClient<W> {
    pub fn new(wallet: W) -> Self {
        PaymentClient {
            client: reqwest::Client::new(),
            wallet,
            config: ClientConfig::default(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Send `request`, paying once if challenged.
    pub async fn execute(&self, request: reqwest::Request) -> Result<PaidResponse, PaymentError> {
        self.execute_observed(request, |_| {}).await
    }

    /// Like [`execute`](Self::execute), reporting every state transition to `observe`.
    pub async fn execute_observed<F>(
        &self,
        request: reqwest::Request,
        observe: F,
    ) -> Result<PaidResponse, PaymentError>
    where
        F: FnMut(CallState) + Send,
    {
        let mut tracker = Tracker {
            state: CallState::Idle,
            requests: 0,
            observe,
        };

        let result = self.run(request, &mut tracker).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, requests = tracker.requests, "Paid request failed");
            tracker.advance(CallState::Failed);
        }
        result
    }

    async fn run<F: FnMut(CallState)>(
        &self,
        request: reqwest::Request,
        tracker: &mut Tracker<F>,
    ) -> Result<PaidResponse, PaymentError> {
        let retry = request.try_clone();

        tracker.advance(CallState::Requested);
        let response = self.send(request).await?;

        if response.status() != StatusCode::PAYMENT_REQUIRED {
            tracker.advance(CallState::Succeeded);
            return Ok(PaidResponse {
                response,
                receipt: None,
                requests: tracker.requests,
                final_state: tracker.state,
            });
        }

        tracker.advance(CallState::ChallengeReceived);
        let challenge = self.read_challenge(response).await?;
        let mut retry = retry.ok_or(PaymentError::UnreplayableRequest)?;

        if !self
            .config
            .spending_limit
            .allows(&challenge.amount)
            .map_err(|err| PaymentError::MalformedChallenge(err.to_string()))?
        {
            let limit = match &self.config.spending_limit {
                SpendingLimit::Max { price, .. } => price.clone(),
                SpendingLimit::Unlimited => Price::new(""),
            };
            return Err(PaymentError::AmountExceedsLimit {
                amount: challenge.amount.clone(),
                limit,
            });
        }

        let proof = tokio::time::timeout(
            self.config.sign_timeout,
            self.wallet.sign(&challenge, &self.config.proof),
        )
        .await
        .map_err(|_| PaymentError::WalletTimeout(self.config.sign_timeout))?
        .map_err(|err| PaymentError::WalletUnavailable(err.to_string()))?;

        tracker.advance(CallState::ProofConstructed);
        let authorization = header::HeaderValue::from_str(&proof.to_authorization()?)
            .map_err(|err| PaymentError::InvalidProof(err.to_string()))?;
        retry.headers_mut().insert(header::AUTHORIZATION, authorization);

        tracing::debug!(
            resource = %challenge.resource,
            amount = %challenge.amount,
            network = %challenge.network,
            "Retrying with payment proof"
        );

        tracker.advance(CallState::Retried);
        let mut response = self.send(retry).await?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(self.read_rejection(response).await);
        }
        if response.status().is_client_error() || response.status().is_server_error() {
            response = self.read_paid_failure(response).await?;
        }

        let receipt = response
            .headers()
            .get(PAYMENT_TRANSACTION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|transaction| PaymentReceipt {
                payer: proof.authorization().from.clone(),
                transaction: transaction.to_string(),
                network: challenge.network.clone(),
            });

        if let Some(receipt) = &receipt {
            tracing::info!(
                payer = %receipt.payer,
                transaction = %receipt.transaction,
                "Payment settled"
            );
        }

        tracker.advance(CallState::Succeeded);
        Ok(PaidResponse {
            response,
            receipt,
            requests: tracker.requests,
            final_state: tracker.state,
        })
    }

    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, PaymentError> {
        tokio::time::timeout(self.config.request_timeout, self.client.execute(request))
            .await
            .map_err(|_| {
                PaymentError::NetworkError(format!(
                    "no response within {:?}",
                    self.config.request_timeout
                ))
            })?
            .map_err(|err| PaymentError::NetworkError(err.to_string()))
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Vec<u8>, PaymentError> {
        let bytes = tokio::time::timeout(self.config.request_timeout, response.bytes())
            .await
            .map_err(|_| PaymentError::NetworkError("timed out reading body".to_string()))?
            .map_err(|err| PaymentError::NetworkError(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// The challenge from `WWW-Authenticate`, falling back to the JSON body.
    async fn read_challenge(
        &self,
        response: reqwest::Response,
    ) -> Result<PaymentChallenge, PaymentError> {
        let from_header = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| PaymentChallenge::from_www_authenticate(value).ok())
            .filter(PaymentChallenge::is_complete);
        if let Some(challenge) = from_header {
            return Ok(challenge);
        }

        let body = self.read_body(response).await?;
        let parsed: ChallengeBody = serde_json::from_slice(&body)
            .map_err(|err| PaymentError::MalformedChallenge(err.to_string()))?;
        parsed
            .challenge
            .filter(PaymentChallenge::is_complete)
            .ok_or_else(|| PaymentError::MalformedChallenge("402 without a challenge".to_string()))
    }

    /// Classify an unsuccessful paid retry.
    ///
    /// A structured x402 body or any `5xx` is a payment failure. Other client
    /// errors belong to the application and are handed back unchanged.
    async fn read_paid_failure(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PaymentError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = self.read_body(response).await?;

        if let Ok(rejection) = serde_json::from_slice::<ChallengeBody>(&body) {
            return Err(PaymentError::from_rejection(rejection.error, rejection.message));
        }
        if status.is_server_error() {
            return Err(PaymentError::NetworkError(format!(
                "paid request failed with {status}"
            )));
        }

        let mut rebuilt = http::Response::new(body);
        *rebuilt.status_mut() = status;
        *rebuilt.headers_mut() = headers;
        Ok(reqwest::Response::from(rebuilt))
    }

    async fn read_rejection(&self, response: reqwest::Response) -> PaymentError {
        let body = match self.read_body(response).await {
            Ok(body) => body,
            Err(err) => return err,
        };
        match serde_json::from_slice::<ChallengeBody>(&body) {
            Ok(rejection) => PaymentError::from_rejection(rejection.error, rejection.message),
            Err(_) => PaymentError::InvalidProof("server rejected the payment proof".to_string()),
        }
    }
}

/// A per-call-site processing flag.
///
/// Only one call may be in progress per trigger; the flag clears when the call
/// finishes or its future is dropped.
#[derive(Debug, Clone, Default)]
pub struct PaymentTrigger {
    processing: Arc<AtomicBool>,
}

struct ProcessingGuard {
    processing: Arc<AtomicBool>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.processing.store(false, Ordering::Release);
    }
}

impl PaymentTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Option<ProcessingGuard> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                processing: self.processing.clone(),
            })
    }

    /// Run one paid call through `client`, refusing while another is in progress.
    pub async fn trigger<W: Wallet>(
        &self,
        client: &PaymentClient<W>,
        request: reqwest::Request,
    ) -> Result<PaidResponse, PaymentError> {
        let _guard = self.acquire().ok_or(PaymentError::AlreadyProcessing)?;
        client.execute(request).await
    }
}
