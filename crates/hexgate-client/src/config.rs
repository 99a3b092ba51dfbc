//! Engine client configuration.

use std::time::Duration;

use hexgate_common::protocol::error::{GatewayError, Result};
use hexgate_common::transport::DEFAULT_CONNECT_TIMEOUT;

/// Default engine address.
pub const DEFAULT_ENGINE_ADDR: &str = "127.0.0.1:9001";

/// Reconnection policy applied after the session fails.
///
/// Delays grow exponentially from `initial_backoff_ms` by
/// `backoff_multiplier` and are capped at `max_backoff_ms`.
///
/// # Default Configuration
///
/// - `enabled`: true
/// - `initial_backoff_ms`: 250
/// - `max_backoff_ms`: 10000 (10 seconds)
/// - `backoff_multiplier`: 2.0
/// - `max_attempts`: unlimited
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Attempts per outage before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Reconnection switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the given attempt (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(64) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Configuration of an [`EngineClient`](crate::EngineClient).
///
/// # Example
///
/// ```
/// use hexgate_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("127.0.0.1:9001")
///     .with_execute_timeout(Some(Duration::from_secs(5)))
///     .with_max_pending(64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// `host:port` of the engine.
    pub engine_addr: String,
    pub connect_timeout: Duration,
    /// Per-execution deadline; `None` waits indefinitely.
    pub execute_timeout: Option<Duration>,
    /// Upper bound on outstanding executions.
    pub max_pending: usize,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Longest a single frame write may stall before the connection is
    /// treated as lost.
    pub write_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            engine_addr: DEFAULT_ENGINE_ADDR.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            execute_timeout: Some(Duration::from_secs(30)),
            max_pending: 1024,
            outbound_buffer: 256,
            write_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(engine_addr: impl Into<String>) -> Self {
        Self {
            engine_addr: engine_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_execute_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execute_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if:
    /// - The engine address is empty
    /// - The connect timeout, write timeout or `max_pending` is zero
    /// - The execute timeout is zero or longer than one hour
    /// - The backoff multiplier is below 1.0 or the initial backoff exceeds the cap
    pub fn validate(&self) -> Result<()> {
        if self.engine_addr.trim().is_empty() {
            return Err(GatewayError::Config("engine address must not be empty".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(GatewayError::Config("connect timeout must be greater than zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(GatewayError::Config("write timeout must be greater than zero".into()));
        }
        if self.max_pending == 0 {
            return Err(GatewayError::Config("max_pending must be greater than zero".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(GatewayError::Config("outbound buffer must be greater than zero".into()));
        }
        if let Some(timeout) = self.execute_timeout {
            if timeout.is_zero() {
                return Err(GatewayError::Config(
                    "execute timeout must be greater than zero (use None to disable)".into(),
                ));
            }
            if timeout.as_secs() > 3600 {
                return Err(GatewayError::Config(format!(
                    "execute timeout must be <= 1 hour (got {} seconds)",
                    timeout.as_secs()
                )));
            }
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(GatewayError::Config("backoff multiplier must be >= 1.0".into()));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(GatewayError::Config(
                "initial backoff must not exceed max backoff".into(),
            ));
        }
        Ok(())
    }
}
