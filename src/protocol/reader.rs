use std::io::{BufReader, Read};

use serde_json::Value;

use crate::config::Endpoint;
use crate::error::{Error, Phase, Result};
use crate::protocol::{
    decode_length, Request, FRAME_TERMINATOR, LENGTH_PREFIX_LEN, MAX_FRAME_LEN,
};

/// Buffered reader for length-prefixed frames.
///
/// Short reads from the transport are retried until the requested byte count
/// is satisfied. EOF, timeouts and socket errors become [`Error::Transport`]
/// in the [`Phase::Receive`] phase.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    peer: Endpoint,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, peer: Endpoint) -> Self {
        Self {
            inner: BufReader::new(inner),
            peer,
        }
    }

    pub fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .map_err(|err| Error::transport(&self.peer, Phase::Receive, err))?;
        Ok(buf)
    }

    pub fn read_length(&mut self) -> Result<usize> {
        let prefix = self.read_exact_bytes(LENGTH_PREFIX_LEN)?;
        let len = decode_length(&prefix)?;
        if len > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!(
                "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }
        Ok(len)
    }

    /// Reads one frame body (length prefix consumed, not returned).
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        let len = self.read_length()?;
        self.read_exact_bytes(len)
    }

    /// Reads a response frame and decodes it as arbitrary JSON.
    pub fn read_value(&mut self) -> Result<Value> {
        let body = self.read_frame()?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reads a request frame, including its mandatory terminator.
    pub fn read_request(&mut self) -> Result<Request> {
        let body = self.read_frame()?;
        let terminator = self.read_exact_bytes(FRAME_TERMINATOR.len())?;
        if terminator != FRAME_TERMINATOR {
            return Err(Error::Protocol(format!(
                "request terminator was {terminator:?}, expected \\r\\n"
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
