//! Wire protocol between the console and the scanner.
//!
//! Every message is a single JSON object terminated by a newline, in both
//! directions. The `type` field selects the message kind.

mod inbound;
mod outbound;

pub use inbound::InboundMessage;
pub use outbound::{DeviceCommand, OutboundMessage};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Address the scanner listens on when it runs its own access point.
pub const DEFAULT_DEVICE_ADDR: &str = "192.168.4.1:81";

/// Errors produced while moving messages over the wire.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spectrum frame has {len} bins, expected {expected}")]
    FrameLength { len: usize, expected: usize },

    #[error("connection closed")]
    Closed,
}

/// Serialize a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, WireError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (without or with its terminator) into a message.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, WireError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Parse one raw line. Bytes that are not UTF-8 surface as `WireError::Json`
/// like any other malformed payload.
pub fn decode_bytes<T: DeserializeOwned>(line: &[u8]) -> Result<T, WireError> {
    Ok(serde_json::from_slice(line)?)
}

/// Whether a raw line carries nothing but whitespace.
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Write a message as a JSON line and flush.
pub async fn write_json<W, T>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode_line(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next non-empty JSON line.
///
/// Returns `WireError::Closed` at end of stream.
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(WireError::Closed);
        }
        if !is_blank(&line) {
            return decode_bytes(&line);
        }
    }
}
