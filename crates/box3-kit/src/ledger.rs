//! An in-process facilitator backed by a balance ledger.
//!
//! [`LedgerFacilitator`] performs the same checks a chain-backed facilitator
//! would (terms, validity window, signature, single use, balance) against an
//! in-memory ledger, and settles by moving minor units between addresses.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::Arc,
};

use alloy_primitives::{Address, B256, keccak256};
use box3_core::{
    challenge::EXACT_SCHEME,
    facilitator::{
        Facilitator, PaymentRequest, SettleResult, SettleSuccess, SupportedKind,
        SupportedResponse, VerifyResult,
    },
    proof::{ProofId, Validity},
    types::{Price, TimestampSeconds, X402V1},
};
use tokio::sync::Mutex;

use crate::signer::recover_payer;

pub mod reasons {
    pub const UNSUPPORTED_SCHEME: &str = "unsupported_scheme";
    pub const INVALID_PAYLOAD_TERMS: &str = "invalid_payload_terms";
    pub const AUTHORIZATION_EXPIRED: &str = "authorization_expired";
    pub const AUTHORIZATION_NOT_YET_VALID: &str = "authorization_not_yet_valid";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
    pub const INVALID_AMOUNT: &str = "invalid_amount";
    pub const INVALID_PAY_TO: &str = "invalid_pay_to";
    pub const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
    pub const NONCE_ALREADY_USED: &str = "nonce_already_used";
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<Address, u128>,
    /// Settled proofs and the end of their validity windows.
    used: HashMap<ProofId, TimestampSeconds>,
}

impl Ledger {
    /// Forget settled proofs that can no longer pass the validity check.
    fn forget_expired(&mut self, now: TimestampSeconds) {
        self.used.retain(|_, valid_before| *valid_before >= now);
    }
}

/// A facilitator settling against an in-memory ledger.
#[derive(Debug, Clone)]
pub struct LedgerFacilitator {
    ledger: Arc<Mutex<Ledger>>,
    decimals: u8,
    networks: Vec<String>,
}

/// A proof that passed every stateless check.
struct Checked {
    payer: Address,
    pay_to: Address,
    amount: u128,
    hash: B256,
    id: ProofId,
    valid_before: TimestampSeconds,
}

impl LedgerFacilitator {
    /// A ledger for `network` whose asset has `decimals` fractional digits.
    pub fn new(network: impl Into<String>, decimals: u8) -> Self {
        LedgerFacilitator {
            ledger: Arc::new(Mutex::new(Ledger::default())),
            decimals,
            networks: vec![network.into()],
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Credit `address` with `amount`, returning the new balance in minor units.
    pub async fn fund(
        &self,
        address: Address,
        amount: &Price,
    ) -> Result<u128, box3_core::types::PriceError> {
        let units = amount.to_minor_units(self.decimals)?;
        let mut ledger = self.ledger.lock().await;
        let balance = ledger.balances.entry(address).or_default();
        *balance = balance.saturating_add(units);
        tracing::info!(%address, %amount, balance = *balance, "Funded ledger account");
        Ok(*balance)
    }

    /// Balance of `address` in minor units.
    pub async fn balance_of(&self, address: Address) -> u128 {
        let ledger = self.ledger.lock().await;
        ledger.balances.get(&address).copied().unwrap_or_default()
    }

    fn check(&self, request: &PaymentRequest) -> Result<Checked, (&'static str, Option<String>)> {
        let proof = &request.payment_proof;
        let challenge = &request.payment_challenge;
        let claimed = Some(proof.authorization().from.clone());

        if proof.scheme != EXACT_SCHEME || !self.networks.contains(&proof.network) {
            return Err((reasons::UNSUPPORTED_SCHEME, claimed));
        }
        if proof.check_terms(challenge).is_err() {
            return Err((reasons::INVALID_PAYLOAD_TERMS, claimed));
        }
        match proof.validity(TimestampSeconds::now()) {
            Validity::Valid => {}
            Validity::Expired => return Err((reasons::AUTHORIZATION_EXPIRED, claimed)),
            Validity::NotYetValid => return Err((reasons::AUTHORIZATION_NOT_YET_VALID, claimed)),
        }

        let (payer, hash) =
            recover_payer(proof).map_err(|_| (reasons::INVALID_SIGNATURE, claimed.clone()))?;
        let amount = proof
            .authorization()
            .amount
            .to_minor_units(self.decimals)
            .map_err(|_| (reasons::INVALID_AMOUNT, claimed.clone()))?;
        let pay_to = Address::from_str(&proof.authorization().pay_to)
            .map_err(|_| (reasons::INVALID_PAY_TO, claimed.clone()))?;

        Ok(Checked {
            payer,
            pay_to,
            amount,
            hash,
            id: proof.id(),
            valid_before: proof.authorization().valid_before,
        })
    }

    fn check_ledger(ledger: &Ledger, checked: &Checked) -> Result<(), &'static str> {
        if ledger.used.contains_key(&checked.id) {
            return Err(reasons::NONCE_ALREADY_USED);
        }
        let balance = ledger.balances.get(&checked.payer).copied().unwrap_or_default();
        if balance < checked.amount {
            return Err(reasons::INSUFFICIENT_FUNDS);
        }
        Ok(())
    }
}

impl Facilitator for LedgerFacilitator {
    type Error = std::convert::Infallible;

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(SupportedResponse {
            kinds: self
                .networks
                .iter()
                .map(|network| SupportedKind {
                    x402_version: X402V1,
                    scheme: EXACT_SCHEME.to_string(),
                    network: network.clone(),
                })
                .collect(),
        })
    }

    async fn verify(&self, request: PaymentRequest) -> Result<VerifyResult, Self::Error> {
        let checked = match self.check(&request) {
            Ok(checked) => checked,
            Err((reason, payer)) => return Ok(VerifyResult::invalid(reason, payer)),
        };

        let ledger = self.ledger.lock().await;
        let payer = checked.payer.to_string();
        Ok(match Self::check_ledger(&ledger, &checked) {
            Ok(()) => VerifyResult::valid(payer),
            Err(reason) => VerifyResult::invalid(reason, Some(payer)),
        })
    }

    async fn settle(&self, request: PaymentRequest) -> Result<SettleResult, Self::Error> {
        let checked = match self.check(&request) {
            Ok(checked) => checked,
            Err((reason, payer)) => return Ok(SettleResult::failed(reason, payer)),
        };

        let mut ledger = self.ledger.lock().await;
        let payer = checked.payer.to_string();
        if let Err(reason) = Self::check_ledger(&ledger, &checked) {
            tracing::warn!(%payer, reason, "Settlement rejected");
            return Ok(SettleResult::failed(reason, Some(payer)));
        }

        // check_ledger guarantees the payer balance covers the amount
        if let Some(balance) = ledger.balances.get_mut(&checked.payer) {
            *balance -= checked.amount;
        }
        let credited = ledger.balances.entry(checked.pay_to).or_default();
        *credited = credited.saturating_add(checked.amount);
        ledger.forget_expired(TimestampSeconds::now());
        ledger.used.insert(checked.id, checked.valid_before);

        let transaction = keccak256(checked.hash).to_string();
        tracing::info!(
            %payer,
            pay_to = %checked.pay_to,
            amount = checked.amount,
            %transaction,
            "Settled payment"
        );

        Ok(SettleResult::Success(SettleSuccess {
            payer,
            transaction,
            network: request.payment_proof.network,
        }))
    }
}

#[cfg(test)]
mod tests {
    use alloy_signer_local::PrivateKeySigner;
    use box3_core::{challenge::PaymentChallenge, proof::PaymentProof};

    use super::*;
    use crate::signer::{ProofOptions, Wallet};

    const PAY_TO: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";

    fn challenge(amount: &str) -> PaymentChallenge {
        PaymentChallenge::builder()
            .network("base-sepolia")
            .amount(amount)
            .asset("0x036CbD53842c5426634e7929541eC2318f3dCF7e")
            .pay_to(PAY_TO)
            .resource("/api/unlock-box")
            .build()
    }

    async fn signed(signer: &PrivateKeySigner, challenge: &PaymentChallenge) -> PaymentProof {
        signer
            .sign(challenge, &ProofOptions::default())
            .await
            .expect("Signing should succeed")
    }

    fn request(proof: PaymentProof, challenge: PaymentChallenge) -> PaymentRequest {
        PaymentRequest {
            payment_proof: proof,
            payment_challenge: challenge,
        }
    }

    fn invalid_reason(result: VerifyResult) -> String {
        match result {
            VerifyResult::Invalid(invalid) => invalid.invalid_reason,
            VerifyResult::Valid(_) => panic!("expected an invalid verdict"),
        }
    }

    #[tokio::test]
    async fn test_settle_moves_funds_once() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6);
        let signer = PrivateKeySigner::random();
        facilitator.fund(signer.address(), &Price::from("1")).await.unwrap();

        let challenge = challenge("$0.01");
        let proof = signed(&signer, &challenge).await;

        let verified = facilitator
            .verify(request(proof.clone(), challenge.clone()))
            .await
            .unwrap();
        assert!(verified.is_valid());

        let settled = facilitator
            .settle(request(proof.clone(), challenge.clone()))
            .await
            .unwrap();
        let SettleResult::Success(success) = settled else {
            panic!("settlement should succeed");
        };
        assert!(success.transaction.starts_with("0x"));
        assert_eq!(success.network, "base-sepolia");

        assert_eq!(facilitator.balance_of(signer.address()).await, 990_000);
        let pay_to = Address::from_str(PAY_TO).unwrap();
        assert_eq!(facilitator.balance_of(pay_to).await, 10_000);

        let replayed = facilitator.settle(request(proof, challenge)).await.unwrap();
        assert!(matches!(
            replayed,
            SettleResult::Failed(ref failed) if failed.error_reason == reasons::NONCE_ALREADY_USED
        ));
        assert_eq!(facilitator.balance_of(signer.address()).await, 990_000);
    }

    #[tokio::test]
    async fn test_unfunded_payer_is_insufficient() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6);
        let signer = PrivateKeySigner::random();
        let challenge = challenge("0.01");
        let proof = signed(&signer, &challenge).await;

        let verdict = facilitator
            .verify(request(proof.clone(), challenge.clone()))
            .await
            .unwrap();
        assert_eq!(invalid_reason(verdict), reasons::INSUFFICIENT_FUNDS);

        let settled = facilitator.settle(request(proof, challenge)).await.unwrap();
        assert!(!settled.is_success());
    }

    #[tokio::test]
    async fn test_proof_for_other_terms_is_rejected() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6);
        let signer = PrivateKeySigner::random();
        facilitator.fund(signer.address(), &Price::from("1")).await.unwrap();

        let proof = signed(&signer, &challenge("0.01")).await;
        let verdict = facilitator
            .verify(request(proof, challenge("0.05")))
            .await
            .unwrap();
        assert_eq!(invalid_reason(verdict), reasons::INVALID_PAYLOAD_TERMS);
    }

    #[tokio::test]
    async fn test_expired_and_forged_proofs() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6);
        let signer = PrivateKeySigner::random();
        facilitator.fund(signer.address(), &Price::from("1")).await.unwrap();
        let challenge = challenge("0.01");

        let mut expired = signed(&signer, &challenge).await;
        expired.payload.authorization.valid_before = TimestampSeconds(1);
        expired.payload.authorization.valid_after = TimestampSeconds(0);
        let verdict = facilitator
            .verify(request(expired, challenge.clone()))
            .await
            .unwrap();
        assert_eq!(invalid_reason(verdict), reasons::AUTHORIZATION_EXPIRED);

        let mut forged = signed(&signer, &challenge).await;
        forged.payload.authorization.from = PrivateKeySigner::random().address().to_string();
        let verdict = facilitator.verify(request(forged, challenge)).await.unwrap();
        assert_eq!(invalid_reason(verdict), reasons::INVALID_SIGNATURE);
    }

    #[tokio::test]
    async fn test_expired_settlements_are_forgotten() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6);
        let signer = PrivateKeySigner::random();
        facilitator.fund(signer.address(), &Price::from("1")).await.unwrap();

        let challenge = challenge("0.01");
        let proof = signed(&signer, &challenge).await;
        let valid_before = proof.authorization().valid_before;
        let settled = facilitator
            .settle(request(proof.clone(), challenge))
            .await
            .unwrap();
        assert!(settled.is_success());

        let mut ledger = facilitator.ledger.lock().await;
        ledger.forget_expired(valid_before);
        assert!(ledger.used.contains_key(&proof.id()));

        ledger.forget_expired(TimestampSeconds(valid_before.0 + 1));
        assert!(ledger.used.is_empty());
    }

    #[tokio::test]
    async fn test_supported_lists_configured_networks() {
        let facilitator = LedgerFacilitator::new("base-sepolia", 6).with_network("base");
        let supported = facilitator.supported().await.unwrap();
        assert!(supported.supports("exact", "base-sepolia"));
        assert!(supported.supports("exact", "base"));
        assert!(!supported.supports("upto", "base"));
    }
}
