//! Batch-call client - prints the connected account's capabilities and
//! optionally submits a configured batch, polling it until it resolves.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use batchcall_client::config::Settings;
use batchcall_client::metrics::MetricsServer;
use batchcall_client::{BatchClient, JsonRpcWalletTransport, LocalSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting batch-call client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} wallet endpoints",
        settings.wallet.rpc_urls.len()
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let transport = Arc::new(JsonRpcWalletTransport::new(&settings.wallet)?);
    let session = Arc::new(LocalSession::new(settings.session.chains.clone()));
    session.connect(settings.session.account, settings.session.chain_id)?;

    let client = BatchClient::new(session.clone(), transport);
    let account = settings.session.account;

    let capabilities = client
        .get_capabilities(account)
        .await
        .context("Failed to fetch wallet capabilities")?;
    println!("{}", serde_json::to_string_pretty(capabilities.as_ref())?);

    if let Some(request) = settings.batch_request() {
        let poll_interval = Duration::from_millis(settings.client.poll_interval_ms);
        let id = client.submit(request).await?;
        info!("Batch {} submitted, polling every {:?}", id, poll_interval);

        tokio::select! {
            result = client.wait_for_completion(&id, poll_interval) => {
                let record = result?;
                info!("Batch {} resolved as {}", id, record.state);
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            _ = shutdown_signal() => {
                warn!("Shutdown signal received, batch {} left unresolved", id);
            }
        }
    }

    session.disconnect();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Batch-call client stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,batchcall_client=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
