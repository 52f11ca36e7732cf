use box3_gateway::{
    app::{AppState, router},
    backend::Backend,
    config::GatewayArgs,
    init_tracing, shutdown_signal,
};
use box3_kit::facilitator_client::FacilitatorClient;
use box3_paywall::paywall::{PayWall, ProtectedRoute};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = GatewayArgs::parse();
    init_tracing();

    let facilitator = FacilitatorClient::from_url(args.facilitator_url.clone())
        .with_timeout(args.facilitator_timeout())?;

    let challenge = args.unlock_challenge();
    tracing::info!(
        network = %challenge.network,
        amount = %challenge.amount,
        pay_to = %challenge.pay_to,
        "Configured box unlock payment"
    );

    let paywall = PayWall::builder()
        .facilitator(facilitator)
        .routes([ProtectedRoute::from_challenge(challenge)])
        .build();

    match paywall.check_supported().await {
        Ok(unsupported) if unsupported.is_empty() => {
            tracing::info!(facilitator = %args.facilitator_url, "Facilitator supports all routes")
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(
            error = %err,
            facilitator = %args.facilitator_url,
            "Facilitator unreachable at startup"
        ),
    }

    let state = AppState {
        backend: Backend::new(args.backend_url.clone()),
        box_id: args.box_id.clone(),
    };
    let app = router(state, paywall);

    let listener = tokio::net::TcpListener::bind(args.bind_address()).await?;
    tracing::info!(
        "Box3 gateway listening on http://{}",
        listener.local_addr()?
    );
    tracing::info!(backend = %args.backend_url, "Proxying tag and package requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
