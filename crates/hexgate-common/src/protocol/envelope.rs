//! HTTP response envelope.
//!
//! Every answer of the gateway is a `200 OK` carrying one of two shapes:
//!
//! ```text
//! {"ok": true,  "result": <engine value>}
//! {"ok": false, "error": "<message>"}
//! ```
//!
//! Success or failure is carried in the envelope, never in the HTTP status.

use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use super::messages::ExecutionResult;
use super::value::EngineValue;

/// Error text returned when the request body has no string `code` field.
pub const CODE_MUST_BE_STRING: &str = "Code must be a string";

/// Error text returned when the request body is not JSON at all.
pub const INVALID_JSON_BODY: &str = "Request body must be valid JSON";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Envelope {
    Failure { ok: bool, error: String },
    Success { ok: bool, result: EngineValue },
}

impl Envelope {
    pub fn success(result: EngineValue) -> Self {
        Envelope::Success { ok: true, result }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Envelope::Failure {
            ok: false,
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Envelope::Failure { ok, .. } | Envelope::Success { ok, .. } => *ok,
        }
    }

    pub fn result(&self) -> Option<&EngineValue> {
        match self {
            Envelope::Success { result, .. } => Some(result),
            Envelope::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Envelope::Failure { error, .. } => Some(error),
            Envelope::Success { .. } => None,
        }
    }
}

impl From<ExecutionResult> for Envelope {
    fn from(result: ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success(value) => Envelope::success(value),
            ExecutionResult::Failure(message) => Envelope::failure(message),
        }
    }
}

impl From<GatewayError> for Envelope {
    fn from(err: GatewayError) -> Self {
        Envelope::failure(err.to_string())
    }
}

impl From<Result<ExecutionResult, GatewayError>> for Envelope {
    fn from(outcome: Result<ExecutionResult, GatewayError>) -> Self {
        match outcome {
            Ok(result) => result.into(),
            Err(err) => err.into(),
        }
    }
}
