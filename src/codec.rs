//! Message payload encoding.
//!
//! The codec is injected into the processor so deployments can pick their
//! wire format; [`JsonCodec`] is the default.

use crate::request::OperationRequest;
use thiserror::Error;

/// Failure encoding or decoding an [`OperationRequest`].
#[derive(Debug, Error)]
#[error("codec: {message}")]
pub struct CodecError {
    message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Encodes and decodes the wire payload carried in broker message bodies.
pub trait Codec: Send + Sync {
    fn encode(&self, request: &OperationRequest) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<OperationRequest, CodecError>;
    /// Content type stamped onto outgoing messages.
    fn content_type(&self) -> &'static str;
}

/// Text-JSON codec. Fields absent from the wire decode to their zero value.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, request: &OperationRequest) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(request)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<OperationRequest, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
