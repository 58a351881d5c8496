//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur encoding or decoding wire bodies.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR deserialization failed (malformed or unknown fields/kinds).
    #[error("decode error: {0}")]
    Decode(String),

    /// Decompression failed.
    #[error("decompress error: {0}")]
    Decompress(String),

    /// Base64 unwrapping failed.
    #[error("base64 error: {0}")]
    Base64(String),
}
