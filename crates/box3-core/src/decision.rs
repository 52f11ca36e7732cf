//! Reason codes and access decisions.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Machine-readable reason code carried in the `error` field of a 402 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// No proof was presented.
    PaymentRequired,
    /// The proof is malformed, bound to different terms, forged, or already used.
    InvalidProof,
    /// The proof is well formed but the payer cannot cover the amount.
    InsufficientFunds,
    /// The proof's validity window has passed.
    Expired,
    /// The facilitator could not settle for another reason.
    SettlementFailed,
    /// No wallet could sign the challenge.
    WalletUnavailable,
    /// The wallet did not answer in time.
    WalletTimeout,
    /// A transport failure between the parties.
    NetworkError,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::PaymentRequired => "payment_required",
            ErrorReason::InvalidProof => "invalid_proof",
            ErrorReason::InsufficientFunds => "insufficient_funds",
            ErrorReason::Expired => "expired",
            ErrorReason::SettlementFailed => "settlement_failed",
            ErrorReason::WalletUnavailable => "wallet_unavailable",
            ErrorReason::WalletTimeout => "wallet_timeout",
            ErrorReason::NetworkError => "network_error",
        }
    }

    /// Map a facilitator's free-form `invalidReason` onto a reason code.
    ///
    /// ```
    /// use box3_core::decision::ErrorReason;
    ///
    /// assert_eq!(ErrorReason::from_verify_reason("insufficient_funds"), ErrorReason::InsufficientFunds);
    /// assert_eq!(ErrorReason::from_verify_reason("invalid_exact_evm_payload_signature"), ErrorReason::InvalidProof);
    /// ```
    pub fn from_verify_reason(reason: &str) -> Self {
        let reason = reason.to_ascii_lowercase();
        if reason.contains("insufficient_funds") {
            ErrorReason::InsufficientFunds
        } else if reason.contains("expired") || reason.contains("valid_before") {
            ErrorReason::Expired
        } else {
            ErrorReason::InvalidProof
        }
    }

    /// Map a facilitator's free-form `errorReason` onto a reason code.
    pub fn from_settle_reason(reason: &str) -> Self {
        let reason = reason.to_ascii_lowercase();
        if reason.contains("insufficient_funds") {
            ErrorReason::InsufficientFunds
        } else if reason.contains("expired") {
            ErrorReason::Expired
        } else {
            ErrorReason::SettlementFailed
        }
    }

    /// Whether a client may usefully retry with a fresh proof.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorReason::PaymentRequired | ErrorReason::Expired)
    }
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement reference attached to a granted access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payer: String,
    pub transaction: String,
    pub network: String,
}

/// The outcome of presenting a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(PaymentReceipt),
    InsufficientFunds,
    InvalidProof,
    Expired,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted(_))
    }

    pub fn as_granted(&self) -> Option<&PaymentReceipt> {
        match self {
            AccessDecision::Granted(receipt) => Some(receipt),
            _ => None,
        }
    }

    /// The reason code for a denied decision.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            AccessDecision::Granted(_) => None,
            AccessDecision::InsufficientFunds => Some(ErrorReason::InsufficientFunds),
            AccessDecision::InvalidProof => Some(ErrorReason::InvalidProof),
            AccessDecision::Expired => Some(ErrorReason::Expired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorReason::InsufficientFunds).unwrap(),
            "insufficient_funds"
        );
        let parsed: ErrorReason = serde_json::from_str("\"wallet_timeout\"").unwrap();
        assert_eq!(parsed, ErrorReason::WalletTimeout);
        assert_eq!(ErrorReason::NetworkError.to_string(), "network_error");
    }

    #[test]
    fn test_settle_reason_classification() {
        assert_eq!(
            ErrorReason::from_settle_reason("insufficient_funds"),
            ErrorReason::InsufficientFunds
        );
        assert_eq!(
            ErrorReason::from_settle_reason("nonce_already_used"),
            ErrorReason::SettlementFailed
        );
    }

    #[test]
    fn test_decision_reason() {
        assert_eq!(AccessDecision::Expired.reason(), Some(ErrorReason::Expired));
        let granted = AccessDecision::Granted(PaymentReceipt {
            payer: "0xpayer".to_string(),
            transaction: "0xtx".to_string(),
            network: "base-sepolia".to_string(),
        });
        assert!(granted.is_granted());
        assert_eq!(granted.reason(), None);
        assert_eq!(granted.as_granted().unwrap().transaction, "0xtx");
    }
}
