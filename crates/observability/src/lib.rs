//! # sprechfunk-observability
//!
//! Observability-Crate fuer Sprechfunk:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Structured Logging (text/JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, MetrikSchnappschuss, SprechfunkMetrics};

use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::watch;

/// Startet den Observability-HTTP-Server
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
///
/// Laeuft bis `shutdown_rx` `true` meldet.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: SprechfunkMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = metrics_router(metriken);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;
    tracing::info!("Observability-Server gestoppt");
    Ok(())
}
