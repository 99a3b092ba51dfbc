//! hexgate Transport Layer
//!
//! The engine session is a single TCP connection carrying JSON frames.
//!
//! # Architecture
//!
//! - **Transport**: one long-lived TCP connection per gateway process
//! - **Codec**: JSON serialization of [`InboundMessage`](crate::protocol::InboundMessage)
//!   and [`OutboundMessage`](crate::protocol::OutboundMessage)
//! - **Wire Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode session messages
//! - **[`FrameReader`]** / **[`FrameWriter`]**: length-prefixed framing over
//!   any tokio byte stream (the two halves of the engine connection)
//! - **[`connect`]**: dial the engine with a timeout
//!
//! # Message Size Limits
//!
//! Frames larger than [`MAX_MESSAGE_SIZE`] (100 MB) are rejected in both
//! directions to prevent memory exhaustion.

pub mod codec;
pub mod tcp;

pub use codec::JsonCodec;
pub use tcp::{connect, FrameReader, FrameWriter, DEFAULT_CONNECT_TIMEOUT, MAX_MESSAGE_SIZE};

#[cfg(test)]
mod tests;
