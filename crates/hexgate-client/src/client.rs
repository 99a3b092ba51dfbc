use std::sync::Arc;
use std::time::Duration;

use hexgate_common::{ExecutionResult, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::multiplexer::{Dispatcher, Multiplexer};
use crate::pending::PendingTable;
use crate::registry::{CallbackHandler, CallbackRegistry};
use crate::session::{Session, SessionState};

/// Gateway-side handle to the engine.
///
/// Owns the session, the callback registry and the execution multiplexer.
/// Construct one at startup and share it (for example behind an `Arc`) with
/// everything that executes code.
pub struct EngineClient {
    config: ClientConfig,
    registry: Arc<CallbackRegistry>,
    session: Arc<Session>,
    multiplexer: Multiplexer,
}

impl EngineClient {
    /// Creates a client. No connection is made until [`start`](Self::start),
    /// [`connect`](Self::connect) or the first execution.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`](hexgate_common::GatewayError::Config)
    /// if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(CallbackRegistry::new());
        let pending = Arc::new(PendingTable::new());
        let dispatcher = Arc::new(Dispatcher::new(pending.clone(), registry.clone()));
        let session = Arc::new(Session::new(&config, dispatcher));
        let multiplexer = Multiplexer::new(session.clone(), pending, &config);

        Ok(Self {
            config,
            registry,
            session,
            multiplexer,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts the reconnect supervisor and makes the first connection
    /// attempt. A failed attempt is logged, not returned; the supervisor
    /// keeps retrying.
    pub async fn start(&self) {
        self.session.supervise(self.config.reconnect.clone());
        match self.session.connect().await {
            Ok(()) => info!(engine = %self.config.engine_addr, "Engine session established"),
            Err(e) => warn!(
                engine = %self.config.engine_addr,
                error = %e,
                reconnect = self.config.reconnect.enabled,
                "Engine unavailable at startup"
            ),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Registers or replaces a host callback.
    pub fn register(&self, name: impl Into<String>, handler: CallbackHandler) {
        self.registry.register(name, handler);
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// See [`Multiplexer::execute`].
    pub async fn execute(&self, code: impl Into<String>) -> Result<ExecutionResult> {
        self.multiplexer.execute(code).await
    }

    /// See [`Multiplexer::execute_with_timeout`].
    pub async fn execute_with_timeout(
        &self,
        code: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.multiplexer.execute_with_timeout(code, timeout).await
    }

    /// Number of executions awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.multiplexer.pending_count()
    }
}
