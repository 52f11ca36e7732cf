//! Command-line and environment configuration for the Box3 binaries.

use std::{net::SocketAddr, time::Duration};

use alloy_primitives::Address;
use box3_core::{challenge::PaymentChallenge, types::Price};
use clap::Parser;
use url::Url;

/// Recipient used when `RESOURCE_WALLET_ADDRESS` is unset.
pub const DEFAULT_PAY_TO: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";

/// USDC on Base Sepolia.
pub const DEFAULT_ASSET: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

pub const DEFAULT_NETWORK: &str = "base-sepolia";

/// The paywalled box unlock path.
pub const UNLOCK_BOX_PATH: &str = "/api/unlock-box";

/// Box3 delivery gateway: paywalled box unlocks and backend proxies.
#[derive(Parser, Debug, Clone)]
#[command(name = "box3-gateway")]
#[command(author, version, about, long_about = None)]
pub struct GatewayArgs {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Listening port.
    #[arg(long, short, default_value = "3000", env = "PORT")]
    pub port: u16,

    /// Base URL of the x402 facilitator.
    #[arg(long, default_value = "http://127.0.0.1:4022", env = "FACILITATOR_URL")]
    pub facilitator_url: Url,

    /// Seconds before a facilitator call is abandoned.
    #[arg(long, default_value = "30", env = "FACILITATOR_TIMEOUT_SECS")]
    pub facilitator_timeout_secs: u64,

    /// Address receiving unlock payments.
    #[arg(long, default_value = DEFAULT_PAY_TO, env = "RESOURCE_WALLET_ADDRESS")]
    pub pay_to: String,

    /// Base URL of the tag and package backend.
    #[arg(long, default_value = "http://127.0.0.1:8000", env = "BACKEND_URL")]
    pub backend_url: Url,

    /// Price of one box unlock, e.g. `0.01`.
    #[arg(long, default_value = "0.01", env = "UNLOCK_PRICE")]
    pub unlock_price: String,

    /// Payment network.
    #[arg(long, default_value = DEFAULT_NETWORK, env = "X402_NETWORK")]
    pub network: String,

    /// Payment asset.
    #[arg(long, default_value = DEFAULT_ASSET, env = "X402_ASSET")]
    pub asset: String,

    /// Identifier reported by unlocked boxes.
    #[arg(long, default_value = "BOX-8823", env = "BOX_ID")]
    pub box_id: String,
}

impl GatewayArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn facilitator_timeout(&self) -> Duration {
        Duration::from_secs(self.facilitator_timeout_secs)
    }

    /// The challenge guarding the box unlock route.
    pub fn unlock_challenge(&self) -> PaymentChallenge {
        unlock_challenge(
            &self.unlock_price,
            &self.network,
            &self.asset,
            &self.pay_to,
        )
    }
}

/// Build the box unlock challenge for the given terms.
pub fn unlock_challenge(price: &str, network: &str, asset: &str, pay_to: &str) -> PaymentChallenge {
    let shown = price.trim_start_matches('$');
    PaymentChallenge::builder()
        .network(network)
        .amount(price)
        .asset(asset)
        .pay_to(pay_to)
        .resource(UNLOCK_BOX_PATH)
        .description(format!("Please pay ${shown} USDC to unlock this box."))
        .build()
}

/// Development x402 facilitator backed by an in-memory ledger.
#[derive(Parser, Debug, Clone)]
#[command(name = "box3-facilitator")]
#[command(author, version, about, long_about = None)]
pub struct FacilitatorArgs {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0:4022", env = "BIND_ADDR")]
    pub bind: SocketAddr,

    /// Networks to accept payments on.
    #[arg(long, default_value = DEFAULT_NETWORK, env = "X402_NETWORK", value_delimiter = ',')]
    pub network: Vec<String>,

    /// Fractional digits of the asset.
    #[arg(long, default_value = "6", env = "X402_ASSET_DECIMALS")]
    pub decimals: u8,

    /// Opening balances as `address=amount`.
    #[arg(long = "fund", env = "FACILITATOR_FUND", value_delimiter = ',', value_parser = parse_funding)]
    pub funding: Vec<(Address, Price)>,
}

fn parse_funding(value: &str) -> Result<(Address, Price), String> {
    let (address, amount) = value
        .split_once('=')
        .ok_or_else(|| format!("expected address=amount, got '{value}'"))?;
    let address = address
        .trim()
        .parse::<Address>()
        .map_err(|err| format!("invalid address '{address}': {err}"))?;
    Ok((address, Price::new(amount.trim())))
}

/// Pay for a Box3 resource from the command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "box3-pay")]
#[command(author, version, about, long_about = None)]
pub struct PayArgs {
    /// Resource to request.
    #[arg(long, default_value = "http://localhost:3000/api/unlock-box", env = "TARGET_URL")]
    pub target_url: Url,

    /// Hex private key of the paying wallet.
    #[arg(long, env = "TEST_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Largest amount this client agrees to pay.
    #[arg(long, default_value = "0.1", env = "MAX_PAYMENT")]
    pub max_payment: String,

    /// Seconds a signed proof stays valid.
    #[arg(long, default_value = "300")]
    pub validity_secs: u64,
}
