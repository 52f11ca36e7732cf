//! Payment proofs presented on retry.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    challenge::{AUTH_SCHEME, PaymentChallenge},
    errors::Result,
    types::{Base64EncodedHeader, Nonce, Price, TimestampSeconds, X402V1},
};

/// Alternate request header carrying a bare base64 proof.
pub const X_PAYMENT_HEADER: &str = "x-payment";

/// Response header carrying the settlement transaction of a granted access.
pub const PAYMENT_TRANSACTION_HEADER: &str = "x-payment-transaction";

/// The signed authorization bound to one challenge's terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofAuthorization {
    /// Payer address.
    pub from: String,
    pub pay_to: String,
    pub asset: String,
    pub amount: Price,
    pub resource: String,
    pub valid_after: TimestampSeconds,
    pub valid_before: TimestampSeconds,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    /// Hex-encoded signature over the authorization.
    pub signature: String,
    pub authorization: ProofAuthorization,
}

/// Evidence of payment attached to a retried request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: X402V1,
    pub scheme: String,
    pub network: String,
    pub payload: ProofPayload,
}

/// Identity of a proof for single-use tracking: payer plus nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProofId {
    pub payer: String,
    pub nonce: Nonce,
}

impl Display for ProofId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.payer, self.nonce)
    }
}

/// The first challenge field a proof disagrees with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Proof {field} '{presented}' does not match challenge '{expected}'")]
pub struct TermsMismatch {
    pub field: &'static str,
    pub expected: String,
    pub presented: String,
}

/// Where `now` falls relative to a proof's validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    NotYetValid,
    Valid,
    Expired,
}

impl PaymentProof {
    pub fn authorization(&self) -> &ProofAuthorization {
        &self.payload.authorization
    }

    pub fn id(&self) -> ProofId {
        ProofId {
            payer: self.payload.authorization.from.to_ascii_lowercase(),
            nonce: self.payload.authorization.nonce,
        }
    }

    /// Check that the proof is bound to exactly this challenge's terms.
    pub fn check_terms(&self, challenge: &PaymentChallenge) -> std::result::Result<(), TermsMismatch> {
        let auth = &self.payload.authorization;
        let pairs = [
            ("scheme", challenge.scheme.as_str(), self.scheme.as_str()),
            ("network", challenge.network.as_str(), self.network.as_str()),
            ("amount", challenge.amount.as_str(), auth.amount.as_str()),
            ("asset", challenge.asset.as_str(), auth.asset.as_str()),
            ("payTo", challenge.pay_to.as_str(), auth.pay_to.as_str()),
            ("resource", challenge.resource.as_str(), auth.resource.as_str()),
        ];

        match pairs.into_iter().find(|(_, expected, presented)| expected != presented) {
            Some((field, expected, presented)) => Err(TermsMismatch {
                field,
                expected: expected.to_string(),
                presented: presented.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn validity(&self, now: TimestampSeconds) -> Validity {
        let auth = &self.payload.authorization;
        if now < auth.valid_after {
            Validity::NotYetValid
        } else if now > auth.valid_before {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }

    pub fn to_header(&self) -> Result<Base64EncodedHeader> {
        Base64EncodedHeader::encode(self)
    }

    /// The `Authorization` header value: `x402 <base64 proof>`.
    pub fn to_authorization(&self) -> Result<String> {
        Ok(format!("{AUTH_SCHEME} {}", self.to_header()?))
    }

    /// Parse an `Authorization` or `X-PAYMENT` header value, with or without the `x402` prefix.
    pub fn from_header(value: &str) -> Result<Self> {
        let value = value.trim();
        let encoded = match value.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(AUTH_SCHEME) => rest,
            _ => value,
        };
        Base64EncodedHeader(encoded.to_string()).decode()
    }
}
