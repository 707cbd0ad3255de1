use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::router::{build_router, AppState};
use crate::config::ServeConfig;
use crate::pipeline::LeafAnalyzer;

/// Bind and serve until Ctrl-C or SIGTERM.
pub async fn serve(analyzer: LeafAnalyzer, config: &ServeConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.socket_addr()?;
    let classifier = analyzer.has_classifier();
    let state = AppState::new(analyzer, config.max_concurrent);
    let app = build_router(state, config.max_body_bytes, config.request_timeout());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        classifier,
        max_concurrent = config.max_concurrent,
        "leaf analysis server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received, draining requests");
}
