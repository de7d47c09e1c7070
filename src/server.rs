use std::net::SocketAddr;

use clap::Parser;
use reconboard::{router, AppState, ServerArgs};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let settings = ServerArgs::parse().into_settings();
    let bind = settings.bind;
    let state = AppState::bootstrap(settings).await?;
    info!(
        mode = %state.engine().mode(),
        tools = state.catalog().len(),
        "catalog loaded"
    );
    let app = router(state);

    info!("Starting reconboard API on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
