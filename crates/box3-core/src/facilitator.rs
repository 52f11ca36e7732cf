use serde::{Deserialize, Serialize};

use crate::{
    challenge::PaymentChallenge, decision::PaymentReceipt, proof::PaymentProof, types::X402V1,
};

/// A proof together with the challenge it must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_proof: PaymentProof,
    pub payment_challenge: PaymentChallenge,
}

#[derive(Debug, Clone)]
pub enum VerifyResult {
    Valid(VerifyValid),
    Invalid(VerifyInvalid),
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid(_))
    }

    pub fn valid(payer: impl Into<String>) -> Self {
        VerifyResult::Valid(VerifyValid {
            payer: payer.into(),
        })
    }

    pub fn invalid(invalid_reason: impl Into<String>, payer: Option<String>) -> Self {
        VerifyResult::Invalid(VerifyInvalid {
            invalid_reason: invalid_reason.into(),
            payer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VerifyValid {
    pub payer: String,
}

#[derive(Debug, Clone)]
pub struct VerifyInvalid {
    pub invalid_reason: String,
    pub payer: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SettleResult {
    Success(SettleSuccess),
    Failed(SettleFailed),
}

impl SettleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SettleResult::Success(_))
    }

    pub fn failed(error_reason: impl Into<String>, payer: Option<String>) -> Self {
        SettleResult::Failed(SettleFailed {
            error_reason: error_reason.into(),
            payer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SettleSuccess {
    pub payer: String,
    pub transaction: String,
    pub network: String,
}

#[derive(Debug, Clone)]
pub struct SettleFailed {
    pub error_reason: String,
    pub payer: Option<String>,
}

impl From<SettleSuccess> for PaymentReceipt {
    fn from(success: SettleSuccess) -> Self {
        PaymentReceipt {
            payer: success.payer,
            transaction: success.transaction,
            network: success.network,
        }
    }
}

/// Wire form of a verify result: `{"isValid": .., "invalidReason": .., "payer": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

/// Wire form of a settle result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

impl From<VerifyResponse> for VerifyResult {
    fn from(response: VerifyResponse) -> Self {
        if response.is_valid {
            VerifyResult::valid(response.payer.unwrap_or_default())
        } else {
            VerifyResult::invalid(response.invalid_reason.unwrap_or_default(), response.payer)
        }
    }
}

impl From<VerifyResult> for VerifyResponse {
    fn from(result: VerifyResult) -> Self {
        match result {
            VerifyResult::Valid(valid) => VerifyResponse {
                is_valid: true,
                invalid_reason: None,
                payer: Some(valid.payer),
            },
            VerifyResult::Invalid(invalid) => VerifyResponse {
                is_valid: false,
                invalid_reason: Some(invalid.invalid_reason),
                payer: invalid.payer,
            },
        }
    }
}

impl From<SettleResponse> for SettleResult {
    fn from(response: SettleResponse) -> Self {
        if response.success {
            SettleResult::Success(SettleSuccess {
                payer: response.payer.unwrap_or_default(),
                transaction: response.transaction.unwrap_or_default(),
                network: response.network.unwrap_or_default(),
            })
        } else {
            SettleResult::failed(response.error_reason.unwrap_or_default(), response.payer)
        }
    }
}

impl From<SettleResult> for SettleResponse {
    fn from(result: SettleResult) -> Self {
        match result {
            SettleResult::Success(success) => SettleResponse {
                success: true,
                error_reason: None,
                payer: Some(success.payer),
                transaction: Some(success.transaction),
                network: Some(success.network),
            },
            SettleResult::Failed(failed) => SettleResponse {
                success: false,
                error_reason: Some(failed.error_reason),
                payer: failed.payer,
                transaction: None,
                network: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: X402V1,
    pub scheme: String,
    pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

impl SupportedResponse {
    pub fn supports(&self, scheme: &str, network: &str) -> bool {
        self.kinds
            .iter()
            .any(|kind| kind.scheme == scheme && kind.network == network)
    }
}

/// Verifies and settles payment proofs on behalf of a resource server.
pub trait Facilitator: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;

    fn verify(
        &self,
        request: PaymentRequest,
    ) -> impl Future<Output = Result<VerifyResult, Self::Error>> + Send;

    fn settle(
        &self,
        request: PaymentRequest,
    ) -> impl Future<Output = Result<SettleResult, Self::Error>> + Send;
}
