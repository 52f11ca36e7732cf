use std::fmt::Display;

use bon::Builder;
use box3_core::{
    challenge::{ChallengeBody, PaymentChallenge},
    decision::{AccessDecision, ErrorReason},
    facilitator::Facilitator,
    proof::{PaymentProof, Validity, X_PAYMENT_HEADER},
    types::TimestampSeconds,
};
use http::{Request, Response, StatusCode, header};

use crate::{
    consumed::{ProofStatus, ReplayStore},
    errors::ErrorResponse,
    processor::{PaymentState, RequestProcessor},
};

/// A http paywall that uses a facilitator to verify and settle payments.
#[derive(Builder, Debug, Clone)]
pub struct PayWall<F: Facilitator> {
    /// The facilitator to use for payment verification and settlement.
    pub facilitator: F,
    /// Paywall behavior configuration.
    #[builder(default)]
    pub config: PayWallConfig,
    /// Protected routes and their payment terms.
    #[builder(with = |routes: impl IntoIterator<Item = ProtectedRoute>| routes.into_iter().collect())]
    pub routes: Vec<ProtectedRoute>,
    #[builder(skip)]
    pub consumed: ReplayStore,
}

/// A path and the challenge guarding it.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoute {
    #[builder(into)]
    pub path: String,
    pub challenge: PaymentChallenge,
}

impl ProtectedRoute {
    /// Guard the challenge's own `resource` path.
    pub fn from_challenge(challenge: PaymentChallenge) -> Self {
        ProtectedRoute {
            path: challenge.resource.clone(),
            challenge,
        }
    }

    /// Human readable message for a 402 on this route.
    pub fn message(&self) -> String {
        if self.challenge.description.is_empty() {
            format!(
                "Payment of {} is required to access {}",
                self.challenge.amount, self.path
            )
        } else {
            self.challenge.description.clone()
        }
    }
}

/// Paywall configuration options.
///
/// The default behavior is to:
/// - Settle payments before proceeding to the handler
/// - Not skip settlement on any response status codes
#[derive(Builder, Debug, Clone, Default)]
pub struct PayWallConfig {
    /// Run the handler first and settle afterwards
    #[builder(default, with = || true)]
    pub settle_after_access: bool,

    /// HTTP status codes that will skip settlement when returned from the handler
    #[builder(default, with = |i: impl IntoIterator<Item = StatusCode>| i.into_iter().collect())]
    pub skip_settle_on_status: Vec<StatusCode>,
}

/// Whether a request needs payment.
pub enum Gate<'pw, F: Facilitator, Req> {
    /// The path is not protected; the request passes through untouched.
    Open(Request<Req>),
    /// A proof was presented and reserved.
    Paid(RequestProcessor<'pw, F, Req>),
}

impl<F: Facilitator> PayWall<F> {
    /// The protected route matching `path` exactly, if any.
    pub fn route_for(&self, path: &str) -> Option<&ProtectedRoute> {
        self.routes.iter().find(|route| route.path == path)
    }

    /// Decode, bind and reserve the presented proof.
    ///
    /// Unprotected paths pass through; protected paths without a proof get a 402 challenge.
    pub fn process_request<Req>(
        &self,
        request: Request<Req>,
    ) -> Result<Gate<'_, F, Req>, ErrorResponse> {
        let Some(route) = self.route_for(request.uri().path()) else {
            return Ok(Gate::Open(request));
        };

        let header = request
            .headers()
            .get(header::AUTHORIZATION)
            .or_else(|| request.headers().get(X_PAYMENT_HEADER))
            .ok_or_else(|| self.payment_required(route))?;

        let header = header.to_str().map_err(|err| {
            self.invalid_payment(route, format!("Failed to decode Authorization header: {err}"))
        })?;

        let proof = PaymentProof::from_header(header).map_err(|err| {
            self.invalid_payment(route, format!("Failed to parse payment proof: {err}"))
        })?;

        proof
            .check_terms(&route.challenge)
            .map_err(|mismatch| self.invalid_payment(route, mismatch))?;

        match proof.validity(TimestampSeconds::now()) {
            Validity::Valid => {}
            Validity::Expired => {
                return Err(self.denied(route, AccessDecision::Expired, "Payment proof expired"));
            }
            Validity::NotYetValid => {
                return Err(self.invalid_payment(route, "Payment proof is not yet valid"));
            }
        }

        let id = proof.id();
        let valid_before = proof.authorization().valid_before;
        let reservation = self.consumed.reserve(id.clone(), valid_before).map_err(|status| {
            #[cfg(feature = "tracing")]
            tracing::warn!(proof = %id, ?status, "Rejected reused payment proof");
            match status {
                ProofStatus::Consumed => self.invalid_payment(route, "Payment proof already used"),
                ProofStatus::InFlight => {
                    self.invalid_payment(route, "Payment proof is already being processed")
                }
            }
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            route = %route.path,
            payer = %proof.authorization().from,
            amount = %proof.authorization().amount,
            "Payment proof accepted for verification"
        );

        Ok(Gate::Paid(RequestProcessor {
            paywall: self,
            request,
            route,
            proof,
            reservation: Some(reservation),
            payment_state: PaymentState {
                route: route.path.clone(),
                verified: None,
                settled: None,
            },
        }))
    }

    /// Run the full flow: verify, settle, then call `handler` with [`PaymentState`] attached.
    pub async fn handle_payment<Fun, Fut, Req, Res>(
        &self,
        request: Request<Req>,
        handler: Fun,
    ) -> Result<Response<Res>, ErrorResponse>
    where
        Fun: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Response<Res>>,
    {
        let processor = match self.process_request(request)? {
            Gate::Open(request) => return Ok(handler(request).await),
            Gate::Paid(processor) => processor,
        };

        let processor = processor.verify().await?;

        if !self.config.settle_after_access {
            return Ok(processor.settle().await?.run_handler(handler).await?.response());
        }

        let processor = processor.run_handler(handler).await?;
        let status = processor.response.status();
        if self.config.skip_settle_on_status.contains(&status) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Skipping settlement due to response status: {status}");

            return Ok(processor.response());
        }
        Ok(processor.settle().await?.response())
    }

    /// Warn about routes whose scheme and network the facilitator does not support.
    ///
    /// Returns the unsupported routes.
    pub async fn check_supported(&self) -> Result<Vec<&ProtectedRoute>, F::Error> {
        let supported = self.facilitator.supported().await?;
        let unsupported: Vec<_> = self
            .routes
            .iter()
            .filter(|route| !supported.supports(&route.challenge.scheme, &route.challenge.network))
            .collect();

        #[cfg(feature = "tracing")]
        for route in &unsupported {
            tracing::warn!(
                route = %route.path,
                scheme = %route.challenge.scheme,
                network = %route.challenge.network,
                "Facilitator does not support this route's payment kind"
            );
        }

        Ok(unsupported)
    }

    fn challenge_response(
        &self,
        route: &ProtectedRoute,
        status: StatusCode,
        error: ErrorReason,
        message: String,
    ) -> ErrorResponse {
        ErrorResponse {
            status,
            body: ChallengeBody {
                error,
                message,
                challenge: Some(route.challenge.clone()),
            },
        }
    }

    /// Payment needed to access resource
    pub fn payment_required(&self, route: &ProtectedRoute) -> ErrorResponse {
        self.challenge_response(
            route,
            StatusCode::PAYMENT_REQUIRED,
            ErrorReason::PaymentRequired,
            route.message(),
        )
    }

    /// Malformed, mismatched or reused proof
    pub fn invalid_payment(&self, route: &ProtectedRoute, reason: impl Display) -> ErrorResponse {
        #[cfg(feature = "tracing")]
        tracing::debug!(route = %route.path, "Invalid payment: {reason}");

        self.challenge_response(
            route,
            StatusCode::PAYMENT_REQUIRED,
            ErrorReason::InvalidProof,
            reason.to_string(),
        )
    }

    /// A proof the facilitator or the validity check refused
    pub fn denied(
        &self,
        route: &ProtectedRoute,
        decision: AccessDecision,
        reason: impl Display,
    ) -> ErrorResponse {
        let error = decision.reason().unwrap_or(ErrorReason::InvalidProof);
        self.challenge_response(route, StatusCode::PAYMENT_REQUIRED, error, reason.to_string())
    }

    /// Payment verification or settlement failed
    pub fn payment_failed(
        &self,
        route: &ProtectedRoute,
        error: ErrorReason,
        reason: impl Display,
    ) -> ErrorResponse {
        #[cfg(feature = "tracing")]
        tracing::info!(route = %route.path, %error, "Payment failed: {reason}");

        self.challenge_response(route, StatusCode::PAYMENT_REQUIRED, error, reason.to_string())
    }

    /// Internal server error during payment processing
    pub fn server_error(&self, reason: impl Display) -> ErrorResponse {
        #[cfg(feature = "tracing")]
        tracing::error!("Payment processing error: {reason}");

        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ChallengeBody {
                error: ErrorReason::NetworkError,
                message: reason.to_string(),
                challenge: None,
            },
        }
    }
}
