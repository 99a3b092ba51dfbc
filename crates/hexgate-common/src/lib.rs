//! hexgate Common Types and Transport
//!
//! This crate provides the protocol definitions and the framed TCP transport
//! shared by the hexgate gateway crates.
//!
//! # Overview
//!
//! hexgate accepts script-execution requests over HTTP and forwards them to a
//! remote execution engine over one long-lived session connection. This crate
//! holds the pieces every other crate agrees on:
//!
//! - **Protocol Layer**: engine session messages, the HTTP response envelope,
//!   the error taxonomy and the loosely-typed value model
//! - **Transport Layer**: length-prefixed JSON frames over TCP
//!
//! # Architecture
//!
//! The session wire protocol:
//! - **Transport**: a single TCP connection to the engine
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 100 MB (prevents memory exhaustion)
//!
//! # Components
//!
//! - [`protocol`] - Session messages, envelope, errors, values
//! - [`transport`] - Framing, codec and connection helpers
//! - `testing` - Scripted engine for tests (feature `testing`)
//!
//! # Example
//!
//! ```
//! use hexgate_common::{Envelope, ExecuteRequest, EngineResponse, ExecutionResult};
//! use serde_json::json;
//!
//! let request = ExecuteRequest::new("1 + 1");
//! let response = EngineResponse::success(request.id, json!(2));
//!
//! let envelope = Envelope::from(response.into_result());
//! assert!(envelope.is_ok());
//! # let _ = ExecutionResult::Failure(String::new());
//! ```

pub mod protocol;
pub mod transport;

#[cfg(feature = "testing")]
pub mod testing;

pub use protocol::*;
