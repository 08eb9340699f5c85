use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app;
mod gateway_channel;
mod http;
mod logging;
mod rpc;
mod ws;

use app::AppState;
use logging::{LogRing, RingLayer};

const SHUTDOWN_GRACE_SECS: u64 = 5;

/// `skynet-gateway` — the channel fabric and JSON-RPC gateway process.
#[derive(Debug, Parser)]
#[command(name = "skynet-gateway", version)]
struct Cli {
    /// Path to a config file; overrides the default search order
    /// (`./.skynet/config.toml`, `./config.toml`, `~/.skynet/config.toml`)
    /// and the `SKYNET_CONFIG` env var.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_ring = Arc::new(LogRing::default());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "skynet_gateway=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(RingLayer::new(log_ring.clone()))
        .init();

    let config_path = cli.config.or_else(|| std::env::var("SKYNET_CONFIG").ok());
    let config = skynet_core::config::SkynetConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;

    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let (state, scheduler_engine) = AppState::build(config, log_ring);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let channels = state.channels.clone();
    let bus = state.bus.clone();
    tokio::spawn({
        let channels = channels.clone();
        let bus = bus.clone();
        async move { channels.start_all(bus).await }
    });
    tokio::spawn(async move { channels.dispatch_outbound_loop(bus).await });
    tokio::spawn(scheduler_engine.run(shutdown_rx));

    let router = build_router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "skynet gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown_tx));

    // Bound the drain: once the signal fires, in-flight requests get
    // SHUTDOWN_GRACE_SECS to finish before the process exits regardless.
    tokio::select! {
        result = serve => result?,
        _ = wait_then_force_exit() => {}
    }

    Ok(())
}

async fn wait_then_force_exit() {
    tokio::signal::ctrl_c().await.ok();
    tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/ws", get(ws::connection::ws_handler))
        .route(
            "/webhook/{channel}",
            post(http::webhooks::webhook_handler).get(http::webhooks::webhook_handler),
        )
        .route(
            "/webhook/{channel}/{account}",
            post(http::webhooks::webhook_handler_with_account).get(http::webhooks::webhook_handler_with_account),
        )
        // Legacy single-channel paths predating the generic `/webhook/:channel`
        // route; kept indefinitely per DESIGN.md's Open Question resolution.
        .route(
            "/feishu/webhook",
            post(http::webhooks::legacy_feishu_handler).get(http::webhooks::legacy_feishu_handler),
        )
        .route(
            "/wework/event",
            post(http::webhooks::legacy_wework_handler).get(http::webhooks::legacy_wework_handler),
        )
        .fallback(http::fallback_handler)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Waits for Ctrl+C, then flips the shutdown watch so the scheduler and any
/// other `shutdown_rx`-aware task stop, and lets axum begin draining
/// in-flight requests. `wait_then_force_exit` bounds how long that drain
/// is allowed to take.
async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(true);
}
