use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use talkstick::{
    common::{AnyResult, logger},
    configs::Config,
    log_println,
    server::AppState,
    transport,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long running sessions get to restore everyone's voice on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log_println!("Using built-in defaults: {}", e);
            Config::default()
        }
    };

    logger::init(config.logging.as_ref());

    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let shared_state = Arc::new(AppState::new(config));

    let app = transport::router(shared_state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    info!("Talkstick v{} listening on {}", env!("CARGO_PKG_VERSION"), address);

    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    let coordinator = &shared_state.coordinator;
    let signalled = coordinator.stop_all();
    if signalled > 0 {
        info!("Stopping {} running session(s)", signalled);
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while !coordinator.active_sessions().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let left = coordinator.active_sessions().len();
        if left > 0 {
            warn!("{} session(s) did not finish before exit", left);
        }
    }

    Ok(())
}
