//! HTTP Server for the Gateway
//!
//! This module provides the HTTP server implementation using axum.
//! It accepts execute requests and answers them with the response envelope.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use hexgate_client::EngineClient;
use hexgate_common::{Envelope, GatewayError, Result};
use hyper::body::Bytes;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::router::{GatewayRouter, HealthReport};

/// HTTP server for the gateway.
///
/// This server:
/// - Handles execute requests at `POST /execute`
/// - Provides a health endpoint at `GET /__health`
/// - Always answers `200`; success or failure travels in the envelope
pub struct HttpServer {
    router: Arc<GatewayRouter>,
}

impl HttpServer {
    pub fn new(client: Arc<EngineClient>) -> Self {
        Self {
            router: Arc::new(GatewayRouter::new(client)),
        }
    }

    /// The axum application with CORS enabled.
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .route("/execute", post(handle_execute))
            .route("/__health", get(health_check))
            .layer(CorsLayer::permissive())
            .with_state(self.router.clone())
    }

    /// Binds `addr` and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the address cannot be bound or
    /// the server fails.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Transport(format!("Failed to get local addr: {}", e)))?;
        info!("Gateway HTTP server listening on {}", local_addr);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::Transport(format!("Server error: {}", e)))?;

        info!("Gateway HTTP server stopped");
        Ok(())
    }
}

async fn handle_execute(State(router): State<Arc<GatewayRouter>>, body: Bytes) -> Json<Envelope> {
    Json(router.handle_execute(&body).await)
}

async fn health_check(State(router): State<Arc<GatewayRouter>>) -> Json<HealthReport> {
    Json(router.health())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; serve until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
