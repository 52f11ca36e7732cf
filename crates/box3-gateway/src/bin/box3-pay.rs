//! Requests a paywalled resource, paying its x402 challenge with a local key.
//!
//! ```bash
//! TEST_PRIVATE_KEY=0x... TARGET_URL=http://localhost:3000/api/unlock-box box3-pay
//! ```

use std::time::Duration;

use alloy_signer_local::PrivateKeySigner;
use box3_core::types::Price;
use box3_gateway::{config::PayArgs, init_tracing};
use box3_kit::{
    client::{ClientConfig, PaymentClient, SpendingLimit},
    signer::{ProofOptions, Wallet},
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = PayArgs::parse();
    init_tracing();

    let signer: PrivateKeySigner = args.private_key.trim().parse()?;
    tracing::info!(payer = %signer.payer_address(), "Loaded wallet");

    let config = ClientConfig::builder()
        .spending_limit(SpendingLimit::Max {
            price: Price::new(args.max_payment.as_str()),
            decimals: 6,
        })
        .proof(ProofOptions {
            validity: Duration::from_secs(args.validity_secs),
        })
        .build();
    let client = PaymentClient::new(signer).with_config(config);

    tracing::info!("Requesting {}", args.target_url);
    let request = client.client.get(args.target_url.clone()).build()?;
    let paid = client
        .execute_observed(request, |state| tracing::info!(?state, "Payment flow"))
        .await?;

    tracing::info!(
        status = %paid.response.status(),
        requests = paid.requests,
        "Request completed"
    );
    if let Some(receipt) = &paid.receipt {
        tracing::info!(
            transaction = %receipt.transaction,
            network = %receipt.network,
            payer = %receipt.payer,
            "Payment settled"
        );
    }

    let body = paid.response.text().await?;
    println!("{body}");

    Ok(())
}
