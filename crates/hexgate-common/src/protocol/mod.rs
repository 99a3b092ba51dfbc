pub mod envelope;
pub mod error;
pub mod messages;
pub mod value;


pub use envelope::{Envelope, CODE_MUST_BE_STRING, INVALID_JSON_BODY};
pub use error::{GatewayError, Result};
pub use messages::{
    next_correlation_id, CallId, CallbackReply, CallbackRequest, CorrelationId, EngineResponse,
    ExecuteRequest, ExecutionResult, InboundMessage, OutboundMessage,
};
pub use value::{EngineValue, ValueKind};
