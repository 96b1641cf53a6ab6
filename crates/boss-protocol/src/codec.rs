//! Newline-delimited JSON framing.
//!
//! Every message occupies exactly one line. Serialized JSON never contains
//! a raw newline, so a line boundary is always a message boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from encoding or decoding a single frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Serializes `message` as one line, including the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, FrameError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| FrameError::Malformed(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parses one line (with or without its trailing newline).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(FrameError::Empty);
    }
    serde_json::from_str(line).map_err(|e| FrameError::Malformed(e.to_string()))
}
