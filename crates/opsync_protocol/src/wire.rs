//! Wire body codec.
//!
//! Bodies are CBOR, then zlib-compressed. Runtime environments without
//! native binary upload wrap the compressed bytes in base64; the order is
//! always compress-then-encode, so decoding strips base64 first and
//! decompresses second.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Encodes a message as compressed CBOR.
pub fn encode_body<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut cbor = Vec::new();
    ciborium::ser::into_writer(value, &mut cbor)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&cbor)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a message from compressed CBOR.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    let mut cbor = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut cbor)
        .map_err(|e| ProtocolError::Decompress(e.to_string()))?;

    ciborium::de::from_reader(cbor.as_slice()).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Encodes a message as compressed CBOR wrapped in base64.
pub fn encode_body_b64<T: Serialize>(value: &T) -> ProtocolResult<String> {
    Ok(BASE64.encode(encode_body(value)?))
}

/// Decodes a base64-wrapped compressed body.
pub fn decode_body_b64<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    let compressed = BASE64
        .decode(text.trim())
        .map_err(|e| ProtocolError::Base64(e.to_string()))?;
    decode_body(&compressed)
}

/// Decodes a body that may or may not be base64-wrapped.
///
/// Raw compressed bytes are tried first; if decompression fails and the body
/// is valid UTF-8, the base64 form is tried.
pub fn decode_body_auto<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    match decode_body(bytes) {
        Ok(value) => Ok(value),
        Err(raw_err @ ProtocolError::Decompress(_)) => match std::str::from_utf8(bytes) {
            Ok(text) => decode_body_b64(text),
            Err(_) => Err(raw_err),
        },
        Err(other) => Err(other),
    }
}
