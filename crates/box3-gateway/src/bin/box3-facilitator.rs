use box3_gateway::{config::FacilitatorArgs, facilitator_service, init_tracing, shutdown_signal};
use box3_kit::ledger::LedgerFacilitator;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = FacilitatorArgs::parse();
    init_tracing();

    let mut networks = args.network.iter();
    let first = networks.next().ok_or("at least one network is required")?;
    let ledger = networks.fold(LedgerFacilitator::new(first.as_str(), args.decimals), |ledger, network| {
        ledger.with_network(network.as_str())
    });

    for (address, amount) in &args.funding {
        ledger.fund(*address, amount).await?;
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        networks = ?args.network,
        decimals = args.decimals,
        "Development facilitator listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, facilitator_service::router(ledger))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
