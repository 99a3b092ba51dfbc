//! Engine session messages.
//!
//! Every frame on the session carries one JSON object. The shapes are
//! distinguished by their keys rather than by an explicit tag:
//!
//! | direction | shape                                         |
//! |-----------|-----------------------------------------------|
//! | out       | `{"id": 7, "code": "..."}`                    |
//! | in        | `{"id": 7, "result": <value>}`                |
//! | in        | `{"id": 7, "error": "..."}`                   |
//! | in        | `{"call": "print", "args": [...], "callId": "c1"}` |
//! | out       | `{"callId": "c1", "result": <value>}`         |
//! | out       | `{"callId": "c1", "error": "..."}`            |

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::value::EngineValue;

/// Identifier linking an execute request to its response.
pub type CorrelationId = u64;

/// Engine-chosen identifier of a callback invocation. Opaque to the gateway
/// and echoed back unchanged.
pub type CallId = serde_json::Value;

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique correlation identifier.
///
/// The counter is monotonic, so an identifier is never handed out twice
/// during the lifetime of the process.
pub fn next_correlation_id() -> CorrelationId {
    CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A script execution request sent to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    pub id: CorrelationId,
    pub code: String,
}

impl ExecuteRequest {
    /// Creates a request with a freshly allocated correlation identifier.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: next_correlation_id(),
            code: code.into(),
        }
    }
}

/// The engine's answer to an [`ExecuteRequest`].
///
/// A frame carrying both `error` and `result` decodes as a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EngineResponse {
    Failure { id: CorrelationId, error: String },
    Success { id: CorrelationId, result: EngineValue },
}

impl EngineResponse {
    pub fn success(id: CorrelationId, result: EngineValue) -> Self {
        EngineResponse::Success { id, result }
    }

    pub fn failure(id: CorrelationId, error: impl Into<String>) -> Self {
        EngineResponse::Failure {
            id,
            error: error.into(),
        }
    }

    pub fn id(&self) -> CorrelationId {
        match self {
            EngineResponse::Failure { id, .. } | EngineResponse::Success { id, .. } => *id,
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        match self {
            EngineResponse::Failure { error, .. } => ExecutionResult::Failure(error),
            EngineResponse::Success { result, .. } => ExecutionResult::Success(result),
        }
    }
}

/// Outcome of one script execution as reported by the engine.
///
/// `Failure` is a script-level error. It is not a transport fault and does
/// not affect the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(EngineValue),
    Failure(String),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }
}

/// A request from the engine to run a host callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackRequest {
    pub call: String,
    #[serde(default)]
    pub args: Vec<EngineValue>,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// The host's answer to a [`CallbackRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CallbackReply {
    Failure {
        #[serde(rename = "callId")]
        call_id: CallId,
        error: String,
    },
    Success {
        #[serde(rename = "callId")]
        call_id: CallId,
        result: EngineValue,
    },
}

impl CallbackReply {
    pub fn success(call_id: CallId, result: EngineValue) -> Self {
        CallbackReply::Success { call_id, result }
    }

    pub fn failure(call_id: CallId, error: impl Into<String>) -> Self {
        CallbackReply::Failure {
            call_id,
            error: error.into(),
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            CallbackReply::Failure { call_id, .. } | CallbackReply::Success { call_id, .. } => call_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallbackReply::Success { .. })
    }
}

/// Any frame the gateway reads from the engine.
///
/// `Unrecognized` keeps the raw JSON of frames that match no known shape so
/// the dispatcher can still fail the request they refer to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InboundMessage {
    Callback(CallbackRequest),
    Response(EngineResponse),
    Unrecognized(EngineValue),
}

/// Any frame the gateway writes to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundMessage {
    Execute(ExecuteRequest),
    CallbackReply(CallbackReply),
}

impl From<ExecuteRequest> for OutboundMessage {
    fn from(request: ExecuteRequest) -> Self {
        OutboundMessage::Execute(request)
    }
}

impl From<CallbackReply> for OutboundMessage {
    fn from(reply: CallbackReply) -> Self {
        OutboundMessage::CallbackReply(reply)
    }
}
