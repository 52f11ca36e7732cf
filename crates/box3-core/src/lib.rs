//! Box3 x402 core library.
//!
//! Protocol types for payment-gated box unlocks: the [`challenge`] a resource
//! server issues with HTTP 402, the [`proof`] a client attaches on retry, the
//! [`decision`] reached when a proof is presented, and the [`facilitator`]
//! interface that verifies and settles proofs.

pub mod challenge;
pub mod decision;
pub mod errors;
pub mod facilitator;
pub mod proof;
pub mod types;
