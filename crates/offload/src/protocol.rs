//! Wire protocol between the bridge and worker processes.
//!
//! Frames are single lines: a fixed tag followed by compact JSON. The worker
//! shares its stdout with whatever the invoked function prints (and, in test
//! binaries, with the harness banner), so readers skip every line that does
//! not carry the tag. The exit status remains the fallback when no frame
//! arrives at all.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Prefix identifying protocol frames on an otherwise shared stream.
pub const FRAME_TAG: &str = "@offload:";

/// Startup data handed to a worker process, one per invocation.
///
/// `module` and `method` are mandatory; `args` defaults to the empty list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupData {
    /// Registered name of the target module.
    pub module: String,
    /// Exported method to call.
    pub method: String,
    /// Positional arguments, plain-serializable values only.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Outcome posted by a worker process, at most one per invocation.
///
/// On success `message` is the returned value; on failure it is
/// human-readable detail text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the invocation failed.
    pub error: bool,
    /// Returned value, or failure detail.
    pub message: Value,
}

impl Outcome {
    /// Successful outcome carrying the returned value.
    pub fn success(value: Value) -> Self {
        Self {
            error: false,
            message: value,
        }
    }

    /// Failed outcome carrying detail text.
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            error: true,
            message: Value::String(detail.into()),
        }
    }

    /// The failure detail as display text.
    pub fn detail_text(&self) -> String {
        match &self.message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Encode a message as a tagged, newline-terminated frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String> {
    let body = serde_json::to_string(message)
        .map_err(|e| Error::Serialization(format!("failed to encode frame: {e}")))?;
    Ok(format!("{FRAME_TAG}{body}\n"))
}

/// Parse a single line as a frame.
///
/// Returns `None` for unrelated output on the shared stream. Earlier output
/// may leave an unterminated line that the frame then lands on, so the tag is
/// located anywhere in the line, not just at its start.
pub fn parse_frame<T: DeserializeOwned>(line: &str) -> Option<Result<T>> {
    line.find(FRAME_TAG).map(|start| {
        let body = &line[start + FRAME_TAG.len()..];
        serde_json::from_str(body)
            .map_err(|e| Error::Serialization(format!("failed to decode frame: {e}")))
    })
}

/// Write a frame and flush it.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let frame = encode_frame(message)?;
    writer
        .write_all(frame.as_bytes())
        .map_err(|e| Error::Ipc(format!("failed to write frame: {e}")))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("failed to flush frame: {e}")))
}

/// Read the next frame, skipping unrelated lines.
///
/// Returns `Ok(None)` when the stream ends without a frame.
pub fn read_frame<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Ipc(format!("failed to read frame: {e}")))?;
        if let Some(parsed) = parse_frame(&line) {
            return parsed.map(Some);
        }
    }
    Ok(None)
}
