//! Wallet signing for payment proofs.
//!
//! A proof authorizes exactly one challenge: the wallet signs the EIP-712 hash
//! of a [`PaymentAuthorization`] that embeds every term of the challenge, so a
//! proof replayed against a route with different terms recovers a different
//! signer and fails verification.

use std::{str::FromStr, time::Duration};

use alloy_core::{
    sol,
    sol_types::{Eip712Domain, SolStruct},
};
use alloy_primitives::{Address, B256, FixedBytes, Signature, SignatureError};
use alloy_signer::{Error as AlloySignerError, Signer as AlloySigner};
use box3_core::{
    challenge::PaymentChallenge,
    proof::{PaymentProof, ProofAuthorization, ProofPayload},
    types::{Nonce, TimestampSeconds, X402V1},
};

sol!(
    /// The EIP-712 struct a wallet signs to authorize a Box3 payment.
    struct PaymentAuthorization {
        string scheme;
        string network;
        string amount;
        string asset;
        string payTo;
        string resource;
        address from;
        uint64 validAfter;
        uint64 validBefore;
        bytes32 nonce;
    }
);

/// EIP-712 domain for Box3 payment authorizations.
pub const BOX3_DOMAIN: Eip712Domain = Eip712Domain::new(
    Some(std::borrow::Cow::Borrowed("Box3 x402")),
    Some(std::borrow::Cow::Borrowed("1")),
    None,
    None,
    None,
);

/// Seconds a proof is backdated to tolerate clock skew.
const CLOCK_SKEW_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ProofSignatureError {
    #[error("Invalid payer address '{0}'")]
    InvalidPayer(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Signature recovers {recovered}, proof claims {claimed}")]
    SignerMismatch { claimed: Address, recovered: Address },
}

/// Compute the EIP-712 signing hash for an authorization under the given scheme and network.
pub fn signing_hash(
    scheme: &str,
    network: &str,
    authorization: &ProofAuthorization,
) -> Result<B256, ProofSignatureError> {
    let from = Address::from_str(&authorization.from)
        .map_err(|_| ProofSignatureError::InvalidPayer(authorization.from.clone()))?;

    let typed = PaymentAuthorization {
        scheme: scheme.to_string(),
        network: network.to_string(),
        amount: authorization.amount.to_string(),
        asset: authorization.asset.clone(),
        payTo: authorization.pay_to.clone(),
        resource: authorization.resource.clone(),
        from,
        validAfter: authorization.valid_after.0,
        validBefore: authorization.valid_before.0,
        nonce: FixedBytes(authorization.nonce.0),
    };

    Ok(typed.eip712_signing_hash(&BOX3_DOMAIN))
}

/// Recover the signer of a proof and check it matches the claimed payer.
///
/// Returns the payer address and the signing hash.
pub fn recover_payer(proof: &PaymentProof) -> Result<(Address, B256), ProofSignatureError> {
    let authorization = proof.authorization();
    let hash = signing_hash(&proof.scheme, &proof.network, authorization)?;
    let claimed = Address::from_str(&authorization.from)
        .map_err(|_| ProofSignatureError::InvalidPayer(authorization.from.clone()))?;

    let signature = Signature::from_str(&proof.payload.signature)?;
    let recovered = signature.recover_address_from_prehash(&hash)?;

    if recovered != claimed {
        return Err(ProofSignatureError::SignerMismatch { claimed, recovered });
    }
    Ok((recovered, hash))
}

/// Options applied when a wallet builds a proof.
#[derive(Debug, Clone, Copy)]
pub struct ProofOptions {
    /// How long the proof stays valid after signing.
    pub validity: Duration,
}

impl Default for ProofOptions {
    fn default() -> Self {
        ProofOptions {
            validity: Duration::from_secs(300),
        }
    }
}

/// A signing capability able to satisfy payment challenges.
///
/// Signing may wait on user interaction, so callers bound it with a timeout.
pub trait Wallet: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The address proofs are signed from.
    fn payer_address(&self) -> String;

    fn sign(
        &self,
        challenge: &PaymentChallenge,
        options: &ProofOptions,
    ) -> impl Future<Output = Result<PaymentProof, Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Signer error: {0}")]
    SignerError(#[from] AlloySignerError),
    #[error("Proof error: {0}")]
    ProofError(#[from] ProofSignatureError),
}

impl<S> Wallet for S
where
    S: AlloySigner + Send + Sync,
{
    type Error = WalletError;

    fn payer_address(&self) -> String {
        AlloySigner::address(self).to_string()
    }

    async fn sign(
        &self,
        challenge: &PaymentChallenge,
        options: &ProofOptions,
    ) -> Result<PaymentProof, Self::Error> {
        let now = TimestampSeconds::now();

        let authorization = ProofAuthorization {
            from: AlloySigner::address(self).to_string(),
            pay_to: challenge.pay_to.clone(),
            asset: challenge.asset.clone(),
            amount: challenge.amount.clone(),
            resource: challenge.resource.clone(),
            valid_after: TimestampSeconds(now.0.saturating_sub(CLOCK_SKEW_SECONDS)),
            valid_before: TimestampSeconds(now.0 + options.validity.as_secs()),
            nonce: Nonce(rand::random()),
        };

        let hash = signing_hash(&challenge.scheme, &challenge.network, &authorization)?;
        let signature = self.sign_hash(&hash).await?;

        tracing::debug!(
            payer = %authorization.from,
            resource = %authorization.resource,
            amount = %authorization.amount,
            "Signed payment authorization"
        );

        Ok(PaymentProof {
            x402_version: X402V1,
            scheme: challenge.scheme.clone(),
            network: challenge.network.clone(),
            payload: ProofPayload {
                signature: signature.to_string(),
                authorization,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_signer_local::PrivateKeySigner;
    use box3_core::types::Price;

    use super::*;

    fn challenge() -> PaymentChallenge {
        PaymentChallenge::builder()
            .network("base-sepolia")
            .amount("$0.01")
            .asset("0x036CbD53842c5426634e7929541eC2318f3dCF7e")
            .pay_to("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0")
            .resource("/api/unlock-box")
            .build()
    }

    #[tokio::test]
    async fn test_signing_binds_challenge_terms() {
        let signer = PrivateKeySigner::random();
        let proof = signer
            .sign(&challenge(), &ProofOptions::default())
            .await
            .expect("Signing should succeed");

        assert_eq!(proof.check_terms(&challenge()), Ok(()));
        assert_eq!(proof.authorization().amount, Price::from("$0.01"));

        let (payer, _) = recover_payer(&proof).expect("Recovery should succeed");
        assert_eq!(payer, signer.address());
        assert_eq!(signer.payer_address(), proof.authorization().from);
    }

    #[tokio::test]
    async fn test_tampered_amount_recovers_different_signer() {
        let signer = PrivateKeySigner::random();
        let mut proof = signer
            .sign(&challenge(), &ProofOptions::default())
            .await
            .unwrap();

        proof.payload.authorization.amount = Price::from("$0.001");

        assert!(matches!(
            recover_payer(&proof),
            Err(ProofSignatureError::SignerMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_nonces_are_fresh() {
        let signer = PrivateKeySigner::random();
        let a = signer.sign(&challenge(), &ProofOptions::default()).await.unwrap();
        let b = signer.sign(&challenge(), &ProofOptions::default()).await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_validity_window() {
        let signer = PrivateKeySigner::random();
        let options = ProofOptions {
            validity: Duration::from_secs(30),
        };
        let proof = signer.sign(&challenge(), &options).await.unwrap();
        let auth = proof.authorization();
        assert_eq!(auth.valid_before.0 - auth.valid_after.0, 30 + CLOCK_SKEW_SECONDS);
    }

    #[test]
    fn test_garbage_signature() {
        let auth = ProofAuthorization {
            from: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0".to_string(),
            pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0".to_string(),
            asset: "usdc".to_string(),
            amount: Price::from("1"),
            resource: "/".to_string(),
            valid_after: TimestampSeconds(0),
            valid_before: TimestampSeconds(1),
            nonce: Nonce([0; 32]),
        };
        let proof = PaymentProof {
            x402_version: X402V1,
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            payload: ProofPayload {
                signature: "0x1234".to_string(),
                authorization: auth,
            },
        };
        assert!(matches!(
            recover_payer(&proof),
            Err(ProofSignatureError::InvalidSignature(_))
        ));
    }
}
