//! hexgate Server
//!
//! This crate provides the HTTP request gateway: it validates execute
//! requests, runs them through the engine client and renders every outcome
//! as a `{"ok", "result" | "error"}` envelope.

pub mod http_server;
pub mod router;

use std::sync::Arc;

use hexgate_client::{install_builtins, ClientConfig, EngineClient};
use hexgate_common::Result;

pub use http_server::HttpServer;
pub use router::{GatewayRouter, HealthReport};

/// Builds the engine client used by the gateway, with the built-in
/// callbacks installed, and starts its session.
///
/// An unreachable engine is not an error here; the session keeps retrying
/// in the background if reconnection is enabled.
pub async fn start_client(config: ClientConfig) -> Result<Arc<EngineClient>> {
    let client = Arc::new(EngineClient::new(config)?);
    install_builtins(client.registry());
    client.start().await;
    Ok(client)
}
