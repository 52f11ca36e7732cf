//! Core types used across the Box3 x402 crates.

mod common;
mod nonce;
mod price;

pub use common::*;
pub use nonce::*;
pub use price::*;
