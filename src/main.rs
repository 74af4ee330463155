//! RBF Relayer - broadcasts configured contract calls for a set of accounts,
//! escalating fees on stalled transactions.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rbf_relayer::chain::ChainProvider;
use rbf_relayer::clock::TokioClock;
use rbf_relayer::config::Settings;
use rbf_relayer::metrics::MetricsServer;
use rbf_relayer::tx::EngineConfig;
use rbf_relayer::wallet::load_signers;
use rbf_relayer::workflow::WorkflowRunner;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting RBF Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let engine_config = EngineConfig::try_from(&settings.relayer)?;
    info!(
        "Loaded configuration: chain {} ({}), {} operation(s), {} replacement round(s) at +{}%",
        settings.chain.name,
        settings.chain.chain_id,
        settings.operations.len(),
        engine_config.max_replacements,
        engine_config.bump_percent
    );

    // Chain connection
    let provider = Arc::new(
        ChainProvider::new(settings.chain.clone()).context("Failed to initialize chain provider")?,
    );
    provider.check_chain_id().await;

    let signers = load_signers(&settings.wallet, settings.chain.chain_id)?;

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

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = WorkflowRunner::new(
        provider,
        Arc::new(TokioClock::new()),
        engine_config,
        &settings,
        shutdown_rx,
    );

    let run = runner.run(signers);
    tokio::pin!(run);

    let reports = tokio::select! {
        reports = &mut run => reports,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping after in-flight polls...");
            let _ = shutdown_tx.send(true);
            run.await
        }
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    match serde_json::to_string_pretty(&reports) {
        Ok(summary) => info!("Run summary:\n{}", summary),
        Err(e) => warn!("Could not serialize run summary: {}", e),
    }

    if failed > 0 {
        anyhow::bail!("{} of {} account(s) did not complete", failed, reports.len());
    }

    info!("All {} account(s) completed", reports.len());
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rbf_relayer=debug,hyper=warn"));

    let json = std::env::var("RELAYER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
