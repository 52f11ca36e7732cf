use box3_core::{
    decision::{AccessDecision, ErrorReason, PaymentReceipt},
    facilitator::{
        Facilitator, PaymentRequest, SettleResult, SettleSuccess, VerifyResult, VerifyValid,
    },
    proof::{PAYMENT_TRANSACTION_HEADER, PaymentProof},
};
use http::{HeaderValue, Request, Response};

use crate::{
    consumed::Reservation,
    errors::ErrorResponse,
    paywall::{PayWall, ProtectedRoute},
};

/// The state of a payment processed by the paywall when accessing the resource handler.
#[derive(Debug, Clone)]
pub struct PaymentState {
    /// Path of the protected route.
    pub route: String,
    /// Verification result, if verification was performed.
    pub verified: Option<VerifyValid>,
    /// Settlement result, if settlement was performed.
    pub settled: Option<SettleSuccess>,
}

impl PaymentState {
    pub fn payer(&self) -> Option<&str> {
        self.settled
            .as_ref()
            .map(|s| s.payer.as_str())
            .or_else(|| self.verified.as_ref().map(|v| v.payer.as_str()))
    }

    pub fn transaction(&self) -> Option<&str> {
        self.settled.as_ref().map(|s| s.transaction.as_str())
    }

    /// The granted decision, once settled.
    pub fn decision(&self) -> Option<AccessDecision> {
        self.settled
            .clone()
            .map(|settled| AccessDecision::Granted(PaymentReceipt::from(settled)))
    }
}

/// Classify a facilitator's verify rejection.
pub fn verify_decision(invalid_reason: &str) -> AccessDecision {
    match ErrorReason::from_verify_reason(invalid_reason) {
        ErrorReason::InsufficientFunds => AccessDecision::InsufficientFunds,
        ErrorReason::Expired => AccessDecision::Expired,
        _ => AccessDecision::InvalidProof,
    }
}

/// Payment processing state before running the resource handler.
pub struct RequestProcessor<'pw, F: Facilitator, Req> {
    pub paywall: &'pw PayWall<F>,
    pub request: Request<Req>,
    pub route: &'pw ProtectedRoute,
    pub proof: PaymentProof,
    pub reservation: Option<Reservation>,
    pub payment_state: PaymentState,
}

impl<'pw, F: Facilitator, Req> RequestProcessor<'pw, F, Req> {
    fn payment_request(&self) -> PaymentRequest {
        PaymentRequest {
            payment_proof: self.proof.clone(),
            payment_challenge: self.route.challenge.clone(),
        }
    }

    /// Verify the payment with the facilitator.
    ///
    /// `self.payment_state.verified` will be populated on success.
    pub async fn verify(mut self) -> Result<Self, ErrorResponse> {
        let response = self
            .paywall
            .facilitator
            .verify(self.payment_request())
            .await
            .map_err(|err| {
                self.paywall
                    .server_error(format!("Failed to verify payment: {err}"))
            })?;

        let valid = match response {
            VerifyResult::Valid(v) => v,
            VerifyResult::Invalid(iv) => {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    route = %self.route.path,
                    reason = %iv.invalid_reason,
                    "Payment verification failed"
                );

                let decision = verify_decision(&iv.invalid_reason);
                return Err(self.paywall.denied(self.route, decision, iv.invalid_reason));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Payment verified: payer='{}'", valid.payer);

        self.payment_state.verified = Some(valid);

        Ok(self)
    }

    /// Settle the payment with the facilitator.
    ///
    /// `self.payment_state.settled` will be populated on success and the proof
    /// marked consumed.
    pub async fn settle(mut self) -> Result<Self, ErrorResponse> {
        let settled = settle(
            self.paywall,
            self.route,
            self.payment_request(),
            &mut self.reservation,
        )
        .await?;
        self.payment_state.settled = Some(settled);
        Ok(self)
    }

    /// Run the resource handler with the payment state attached to the request extensions.
    ///
    /// After running the handler, returns a [`ResponseProcessor`] for further processing.
    pub async fn run_handler<Fun, Fut, Res>(
        mut self,
        handler: Fun,
    ) -> Result<ResponseProcessor<'pw, F, Res>, ErrorResponse>
    where
        Fun: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Response<Res>>,
    {
        self.request
            .extensions_mut()
            .insert(self.payment_state.clone());

        let response = handler(self.request).await;
        Ok(ResponseProcessor {
            paywall: self.paywall,
            response,
            route: self.route,
            proof: self.proof,
            reservation: self.reservation,
            payment_state: self.payment_state,
        })
    }
}

/// Payment processing state after running the resource handler.
pub struct ResponseProcessor<'pw, F: Facilitator, Res> {
    pub paywall: &'pw PayWall<F>,
    pub response: Response<Res>,
    pub route: &'pw ProtectedRoute,
    pub proof: PaymentProof,
    pub reservation: Option<Reservation>,
    pub payment_state: PaymentState,
}

impl<'pw, F: Facilitator, Res> ResponseProcessor<'pw, F, Res> {
    /// Settle the payment with the facilitator after running the resource handler.
    ///
    /// After settlement, `self.payment_state.settled` will be populated on success.
    pub async fn settle(mut self) -> Result<Self, ErrorResponse> {
        if self.payment_state.settled.is_some() {
            return Ok(self);
        }

        let request = PaymentRequest {
            payment_proof: self.proof.clone(),
            payment_challenge: self.route.challenge.clone(),
        };
        let settled = settle(self.paywall, self.route, request, &mut self.reservation).await?;
        self.payment_state.settled = Some(settled);
        Ok(self)
    }

    /// Conditionally settle the payment based on the provided prediction function.
    pub async fn settle_on(
        self,
        predicate: impl Fn(&Response<Res>) -> bool,
    ) -> Result<Self, ErrorResponse> {
        if predicate(&self.response) {
            self.settle().await
        } else {
            Ok(self)
        }
    }

    /// Settle the payment if the response status is a success (2xx).
    pub async fn settle_on_success(self) -> Result<Self, ErrorResponse> {
        self.settle_on(|resp| resp.status().is_success()).await
    }

    /// Generate the final response, including the `x-payment-transaction` header if settled.
    ///
    /// An unsettled proof is released here and may be presented again.
    pub fn response(self) -> Response<Res> {
        let mut response = self.response;

        if let Some(settled) = &self.payment_state.settled {
            match HeaderValue::from_str(&settled.transaction) {
                Ok(value) => {
                    response
                        .headers_mut()
                        .insert(PAYMENT_TRANSACTION_HEADER, value);
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "Failed to encode {PAYMENT_TRANSACTION_HEADER} header: {_err}; skipping"
                    );
                }
            }
        }

        response
    }
}

async fn settle<F: Facilitator>(
    paywall: &PayWall<F>,
    route: &ProtectedRoute,
    request: PaymentRequest,
    reservation: &mut Option<Reservation>,
) -> Result<SettleSuccess, ErrorResponse> {
    let settlement = paywall
        .facilitator
        .settle(request)
        .await
        .map_err(|err| paywall.server_error(format!("Failed to settle payment: {err}")))?;

    let settled = match settlement {
        SettleResult::Success(s) => s,
        SettleResult::Failed(f) => {
            let error = ErrorReason::from_settle_reason(&f.error_reason);
            return Err(paywall.payment_failed(route, error, f.error_reason));
        }
    };

    if let Some(reservation) = reservation.take() {
        reservation.commit();
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        route = %route.path,
        payer = %settled.payer,
        transaction = %settled.transaction,
        network = %settled.network,
        "Payment settled"
    );

    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_reasons_map_to_decisions() {
        assert_eq!(verify_decision("insufficient_funds"), AccessDecision::InsufficientFunds);
        assert_eq!(verify_decision("authorization_expired"), AccessDecision::Expired);
        assert_eq!(verify_decision("invalid_signature"), AccessDecision::InvalidProof);
    }

    #[test]
    fn test_payment_state_accessors() {
        let mut state = PaymentState {
            route: "/api/unlock-box".to_string(),
            verified: Some(VerifyValid {
                payer: "0xpayer".to_string(),
            }),
            settled: None,
        };
        assert_eq!(state.payer(), Some("0xpayer"));
        assert_eq!(state.transaction(), None);
        assert_eq!(state.decision(), None);

        state.settled = Some(SettleSuccess {
            payer: "0xpayer".to_string(),
            transaction: "0xtx".to_string(),
            network: "base-sepolia".to_string(),
        });
        assert_eq!(state.transaction(), Some("0xtx"));
        assert!(state.decision().is_some_and(|d| d.is_granted()));
    }
}
