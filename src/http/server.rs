//! HTTP server with the gate in front of every route.

use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::GateLayer;
use crate::error::Result;
use crate::gate::AdmissionGate;

/// HTTP server guarded by an [`AdmissionGate`].
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The gate applied to every request
    gate: Arc<AdmissionGate>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, gate: Arc<AdmissionGate>) -> Self {
        Self { addr, gate }
    }

    /// Build the router served by this server.
    pub fn router(&self) -> Router {
        routes().layer(GateLayer::new(self.gate.clone()))
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router();

        info!(addr = %local_addr, "Starting HTTP server");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

/// Routes served behind the gate.
fn routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "turnstile",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
