//! Request routing for the gateway.
//!
//! Turns raw HTTP bodies into engine executions and every outcome into an
//! [`Envelope`]. Nothing here returns an error: malformed input, transport
//! faults and script failures all end as `{"ok": false, "error": ...}`.

use std::sync::Arc;
use std::time::Instant;

use hexgate_client::{EngineClient, SessionState};
use hexgate_common::{Envelope, EngineValue, GatewayError, CODE_MUST_BE_STRING, INVALID_JSON_BODY};
use serde::Serialize;
use tracing::{debug, warn};

/// Body of `GET /__health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub state: SessionState,
    pub pending: usize,
    pub uptime_ms: u64,
}

/// Validates execute requests and forwards them to the engine client.
pub struct GatewayRouter {
    client: Arc<EngineClient>,
    started: Instant,
}

impl GatewayRouter {
    pub fn new(client: Arc<EngineClient>) -> Self {
        Self {
            client,
            started: Instant::now(),
        }
    }

    pub fn client(&self) -> &Arc<EngineClient> {
        &self.client
    }

    /// Handles a `POST /execute` body.
    ///
    /// The body must be a JSON object whose `code` field is a string.
    /// Anything else is answered without contacting the engine.
    pub async fn handle_execute(&self, body: &[u8]) -> Envelope {
        let code = match parse_execute_body(body) {
            Ok(code) => code,
            Err(e) => {
                debug!(error = %e, "Rejecting execute request");
                return Envelope::from(e);
            }
        };

        let outcome = self.client.execute(code).await;
        if let Err(e) = &outcome {
            log_failure(e);
        }
        Envelope::from(outcome)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            state: self.client.state(),
            pending: self.client.pending_count(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Extracts the `code` string from an execute body.
///
/// Both rejections are [`GatewayError::Validation`].
fn parse_execute_body(body: &[u8]) -> Result<String, GatewayError> {
    let request: EngineValue = serde_json::from_slice(body)
        .map_err(|_| GatewayError::Validation(INVALID_JSON_BODY.to_string()))?;
    match request.get("code") {
        Some(EngineValue::String(code)) => Ok(code.clone()),
        _ => Err(GatewayError::Validation(CODE_MUST_BE_STRING.to_string())),
    }
}

fn log_failure(err: &GatewayError) {
    if err.is_transport() {
        warn!(error = %err, "Execution failed in transport");
    } else {
        debug!(error = %err, "Execution failed");
    }
}
