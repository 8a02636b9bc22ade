use anyhow::Result;
use axum::{routing::any, routing::get, Router};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::service::hub::Hub;
use crate::service::metrics::HubMetrics;
use crate::service::routes::{self, Endpoint};
use crate::service::status::HubError;

/// Routes for one hub instance under `prefix`.
///
/// Every endpoint accepts any method; the handler itself rejects the wrong
/// one with 405 so the rejection is logged and counted like any other error.
pub fn hub_router(prefix: &str, hub: Arc<Hub>) -> Router {
    Router::new()
        .route(
            &Endpoint::AddLogHead.full_path(prefix),
            any(routes::add_log_head),
        )
        .route(&Endpoint::GetSth.full_path(prefix), any(routes::get_sth))
        .route(
            &Endpoint::GetSthConsistency.full_path(prefix),
            any(routes::get_sth_consistency),
        )
        .route(
            &Endpoint::GetProofByHash.full_path(prefix),
            any(routes::get_proof_by_hash),
        )
        .route(
            &Endpoint::GetEntries.full_path(prefix),
            any(routes::get_entries),
        )
        .route(
            &Endpoint::GetLogKeys.full_path(prefix),
            any(routes::get_log_keys),
        )
        .with_state(hub)
}

/// Creates and configures the HTTP server with all hub routes and `/metrics`
pub fn create_server(hubs: Vec<(String, Arc<Hub>)>, metrics: Arc<HubMetrics>) -> Router {
    // Fallback handler for unmatched routes
    async fn handle_unmatched() -> HubError {
        tracing::debug!("Unmatched route accessed");
        HubError::NotFound("route not found".to_string())
    }

    let mut app = Router::new()
        .route("/metrics", get(routes::metrics))
        .with_state(metrics);
    for (prefix, hub) in hubs {
        tracing::info!(hub = hub.label(), prefix = %prefix, "registering hub handlers");
        app = app.merge(hub_router(&prefix, hub));
    }
    app.fallback(handle_unmatched)
}

/// Serves `app` on `addr` until Ctrl+C or server failure
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the specified address
/// or the server fails.
pub async fn run_server(app: Router, addr: &SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "HTTP server listening");
    let server = axum::serve(listener, app).into_future();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        result = server => {
            match result {
                Ok(()) => tracing::info!("HTTP server shut down"),
                Err(e) => {
                    tracing::error!(error = ?e, "HTTP server error");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
