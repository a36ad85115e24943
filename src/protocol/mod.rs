//! Wire codec for the harness RPC protocol.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. Requests additionally end with `\r\n`, which is not counted in
//! the length; line-oriented peers rely on it.
//!
//! ```text
//! request:  [len: u32 be][{"__method": ..., "__data": ...}][\r\n]
//! response: [len: u32 be][{"__data": ..., "__error": ...}]
//! ```

mod reader;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use reader::FrameReader;

pub const LENGTH_PREFIX_LEN: usize = 4;
pub const FRAME_TERMINATOR: [u8; 2] = *b"\r\n";

/// Largest frame body a reader accepts.
pub const MAX_FRAME_LEN: usize = 64 << 20;

pub const METHOD_FIELD: &str = "__method";
pub const DATA_FIELD: &str = "__data";
pub const ERROR_FIELD: &str = "__error";

/// A call as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "__method")]
    pub method: String,
    #[serde(rename = "__data", default)]
    pub data: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }
}

/// A reply as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "__data", default)]
    pub data: Value,
    #[serde(rename = "__error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self { data, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}

#[inline]
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN]> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Protocol(format!("payload of {len} bytes exceeds u32 length")))?;
    Ok(len.to_be_bytes())
}

/// Decodes the length prefix at the start of `bytes`.
///
/// Callers must buffer until at least [`LENGTH_PREFIX_LEN`] bytes are present.
#[inline]
pub fn decode_length(bytes: &[u8]) -> Result<usize> {
    let prefix: [u8; LENGTH_PREFIX_LEN] = bytes
        .get(..LENGTH_PREFIX_LEN)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "length prefix needs {LENGTH_PREFIX_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
    Ok(u32::from_be_bytes(prefix) as usize)
}

/// Length prefix followed by `payload` verbatim.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    out.extend_from_slice(&encode_length(payload.len())?);
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn encode_message<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let text = serde_json::to_vec(value)?;
    frame(&text)
}

/// Decodes one complete frame. The declared length must match the bytes that
/// follow it exactly.
pub fn decode_message<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    let declared = decode_length(frame)?;
    let body = &frame[LENGTH_PREFIX_LEN..];
    if body.len() != declared {
        return Err(Error::Protocol(format!(
            "declared length {declared} but frame carries {} bytes",
            body.len()
        )));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Full request frame, terminator included.
pub fn encode_request(method: &str, data: &Value) -> Result<Vec<u8>> {
    let request = Request::new(method, data.clone());
    let mut out = encode_message(&request)?;
    out.extend_from_slice(&FRAME_TERMINATOR);
    Ok(out)
}

/// Escapes newlines for the line-oriented protocol variant: every `\n`
/// becomes `\` followed by `\n`.
pub fn escape_binary(s: &str) -> String {
    s.replace('\n', "\\\n")
}

/// Inverse of [`escape_binary`].
pub fn unescape_binary(s: &str) -> String {
    s.replace("\\\n", "\n")
}
