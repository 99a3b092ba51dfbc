use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;
use crate::protocol::{InboundMessage, OutboundMessage};

/// JSON codec for session frames.
///
/// The gateway encodes [`OutboundMessage`]s and decodes
/// [`InboundMessage`]s; the opposite pair exists for engine-side code such
/// as the test engine.
///
/// # Example
///
/// ```
/// use hexgate_common::transport::JsonCodec;
/// use hexgate_common::protocol::{ExecuteRequest, InboundMessage, OutboundMessage};
///
/// let out = OutboundMessage::from(ExecuteRequest { id: 1, code: "1 + 1".into() });
/// let bytes = JsonCodec::encode_outbound(&out).unwrap();
/// assert_eq!(JsonCodec::decode_outbound(&bytes).unwrap(), out);
///
/// let inbound = JsonCodec::decode_inbound(br#"{"id":1,"result":2}"#).unwrap();
/// assert!(matches!(inbound, InboundMessage::Response(_)));
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_outbound(message: &OutboundMessage) -> Result<Vec<u8>> {
        Self::encode(message)
    }

    pub fn decode_outbound(data: &[u8]) -> Result<OutboundMessage> {
        Self::decode(data)
    }

    pub fn encode_inbound(message: &InboundMessage) -> Result<Vec<u8>> {
        Self::encode(message)
    }

    /// Decodes a frame read from the engine.
    ///
    /// Any valid JSON decodes; shapes the gateway does not know come back as
    /// [`InboundMessage::Unrecognized`]. Only non-JSON bytes are an error.
    pub fn decode_inbound(data: &[u8]) -> Result<InboundMessage> {
        Self::decode(data)
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
