//! Gateway binary entry point: load configuration, wire the pipeline,
//! serve until a shutdown signal drains it.

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use scribe_gateway::gateway::{build_gateway, serve};
use scribe_gateway::{GatewayConfig, GatewayError, GatewayResult};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> GatewayResult<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting scribe-gateway");

    let config = GatewayConfig::load().await?;
    let (app, state) = build_gateway(&config)?;

    // Detached for the life of the process.
    let _sweeper = state.limiter.spawn_sweeper();

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| GatewayError::config(format!("failed to bind {}: {}", addr, err)))?;

    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        lifecycle.begin_drain();
    });

    serve(app, state, listener, config.server.shutdown_grace).await?;

    info!("gateway stopped");
    Ok(())
}

/// Log format comes from `GATEWAY_LOG_FORMAT` (`json` or compact text),
/// the filter from `RUST_LOG` with a request-level default for this crate.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scribe_gateway=info,tower_http=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if matches!(std::env::var("GATEWAY_LOG_FORMAT").as_deref(), Ok("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves when the process receives SIGTERM or SIGINT.
async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, draining"),
        _ = sigint.recv() => info!("received SIGINT, draining"),
    }
}
