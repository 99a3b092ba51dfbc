use thiserror::Error;

/// Error taxonomy shared by every hexgate crate.
///
/// The `Display` text of each variant is what HTTP callers see in the
/// `error` field of a failure envelope. Script failures are not errors here:
/// they arrive as [`ExecutionResult::Failure`](super::ExecutionResult) and
/// are passed through verbatim, while transport failures carry a prefix.
/// Callers can only tell the two apart by that text.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed HTTP input (the message is returned as-is).
    #[error("{0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Too many pending executions (limit {0})")]
    TooManyPending(usize),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the error came from the session transport rather than from
    /// the script or the caller's input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_)
                | GatewayError::ConnectionLost(_)
                | GatewayError::Timeout(_)
                | GatewayError::Transport(_)
                | GatewayError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
