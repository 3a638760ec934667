use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use rfsh_core::BridgeConfig;
use rfsh_core::TracingEventSink;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

/// Serves until Ctrl-C or SIGTERM. Fails only if start-up fails.
pub async fn run(config: BridgeConfig) -> Result<()> {
    info!(
        mode = %config.mode,
        transport = %config.transport.kind,
        "starting rfsh {}",
        env!("CARGO_PKG_VERSION")
    );
    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let result = rfsh_core::serve(config, Arc::new(TracingEventSink), shutdown).await;
    signals.abort();
    result.context("bridge failed to start")
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            wait_for_ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
