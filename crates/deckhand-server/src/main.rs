mod auth;
mod routes;

use std::sync::Arc;

use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use deckhand_portforward::{
    KubeconfigStore,
    PortForwardManager,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::routes::AppState;

/// HTTP backend serving per-cluster port-forward sessions to the UI.
#[derive(Debug, Parser)]
#[command(name = "deckhand-server", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 4466, env = "DECKHAND_PORT")]
    listen_port: u16,

    /// Colon-separated kubeconfig paths; defaults to $KUBECONFIG, then
    /// ~/.kube/config.
    #[arg(long, env = "DECKHAND_KUBECONFIG")]
    kubeconfig: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let manager = Arc::new(PortForwardManager::new(KubeconfigStore::new(
        args.kubeconfig,
    )));
    let state = AppState {
        manager: manager.clone(),
    };

    let addr = format!("0.0.0.0:{}", args.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "deckhand server listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Tear the tunnels down before the runtime goes away.
    manager.stop_all();
    info!("deckhand server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{
            SignalKind,
            signal,
        };

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}
