use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use lra_coordinator::config::Config;
use lra_coordinator::dispatch::{Dispatcher, HttpParticipantClient};
use lra_coordinator::engine::Coordinator;
use lra_coordinator::http::app;
use lra_coordinator::recovery::RecoveryScanner;
use lra_coordinator::store::{JournalStore, LraStore, MemoryStore};

#[derive(Debug, Parser)]
#[command(name = "lra-coordinator", about = "Coordinator for Long Running Actions")]
struct Args {
    /// YAML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_yaml_file(path)?,
        None => Config::default(),
    };

    let store: Arc<dyn LraStore> = match &config.journal_path {
        Some(path) => {
            info!(path = %path.display(), "using journal store");
            Arc::new(JournalStore::open(path).context("opening journal")?)
        }
        None => {
            info!("using in-memory store; lras will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(HttpParticipantClient::new()),
        config.dispatch,
    ));
    let coordinator = Coordinator::new(store.clone(), dispatcher, config.effective_base_url());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let scanner = RecoveryScanner::new(coordinator.clone(), store, config.recovery);
    let scanner_handle = tokio::spawn(scanner.run(shutdown_rx.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(
        listen = %config.listen,
        base = %coordinator.base_url(),
        "lra coordinator listening"
    );

    let mut shutdown_rx_http = shutdown_rx;
    axum::serve(listener, app(coordinator))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx_http.changed().await;
        })
        .await
        .context("serving")?;

    let _ = scanner_handle.await;
    Ok(())
}

/// Flip the shutdown signal on ctrl-c.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });
}
