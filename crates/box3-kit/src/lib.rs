//! Wallets, facilitators and a payment-aware client for Box3 x402 unlocks.
//!
//! - [`signer`]: EIP-712 payment authorizations and the [`signer::Wallet`] trait.
//! - [`facilitator_client`]: a remote facilitator over HTTP.
//! - [`ledger`]: an in-process facilitator backed by an in-memory ledger.
//! - [`client`]: an HTTP client that answers 402 challenges with one paid retry.

pub use box3_core as core;

pub mod signer;

#[cfg(feature = "facilitator-client")]
pub mod facilitator_client;

#[cfg(feature = "ledger")]
pub mod ledger;

#[cfg(feature = "client")]
pub mod client;
