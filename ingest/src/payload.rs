use std::borrow::Cow;
use std::io::prelude::*;

use base64::Engine;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// `kind` and `message` describe the underlying failure for logs only.
    #[error("bad request data ({kind}): {message}")]
    BadRequestData { kind: &'static str, message: String },
}

impl DecodeError {
    pub fn bad_data<E: std::error::Error>(err: E) -> Self {
        DecodeError::BadRequestData {
            kind: std::any::type_name::<E>(),
            message: err.to_string(),
        }
    }
}

fn inflate<R: Read>(mut decoder: R) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Undo the transport encoding of a body. Clients send one of plain JSON,
/// base64 of zlib (or gzip) compressed JSON, or base64 of plain JSON.
pub fn decompress(raw: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if raw.first() == Some(&b'{') {
        return Ok(Cow::Borrowed(raw));
    }

    let stripped: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(stripped)
        .map_err(DecodeError::bad_data)?;

    let inflated = if decoded.starts_with(&GZIP_MAGIC) {
        inflate(GzDecoder::new(decoded.as_slice()))
    } else {
        inflate(ZlibDecoder::new(decoded.as_slice()))
    };

    match inflated {
        Ok(bytes) => Ok(Cow::Owned(bytes)),
        Err(err) => {
            debug!("payload is not compressed, using it as is: {}", err);
            Ok(Cow::Owned(decoded))
        }
    }
}

/// Decode a request body into a JSON object.
pub fn decode(raw: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let bytes = decompress(raw)?;

    match serde_json::from_slice::<Value>(&bytes).map_err(DecodeError::bad_data)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::BadRequestData {
            kind: "serde_json::Value",
            message: format!("expected a JSON object, got {}", json_type(&other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The compressed client encoding: base64 of zlib deflated JSON.
pub fn encode(value: &Map<String, Value>) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(base64::engine::general_purpose::STANDARD
        .encode(compressed)
        .into_bytes())
}
