//! An x402 paywall for Box3 resources.
//!
//! [`paywall::PayWall`] answers requests to protected routes with a `402`
//! challenge, and accepts a retried request only after its proof is bound to
//! the route's terms, unused, verified and settled by a facilitator.
//! [`processor`] exposes the same flow step by step for custom handlers.

pub mod consumed;
pub mod errors;
pub mod paywall;
pub mod processor;

#[cfg(feature = "axum")]
pub mod axum;

pub use box3_core as core;
