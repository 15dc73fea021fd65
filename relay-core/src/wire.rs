//! Text encoding for the bridge channel: relay payloads out, acknowledgments in.

use serde_json::Value;

use crate::protocol::{Ack, RelayPayload};

/// Default ceiling on one encoded relay payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Encode a payload for the bridge. Returns the JSON value and its encoded length.
/// The length is measured without materializing the text.
pub fn encode_payload(
    payload: &RelayPayload,
    max_bytes: usize,
) -> Result<(Value, usize), PayloadEncodeError> {
    let mut counter = ByteCount(0);
    serde_json::to_writer(&mut counter, payload)?;
    let len = counter.0;
    if len > max_bytes {
        return Err(PayloadEncodeError::TooLarge {
            len,
            max: max_bytes,
        });
    }
    Ok((serde_json::to_value(payload)?, len))
}

/// Writer that only counts bytes.
struct ByteCount(usize);

impl std::io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Error encoding a relay payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("payload too large ({len} bytes, max {max})")]
    TooLarge { len: usize, max: usize },
}

/// Decode a native reply. Hosts answer with either an object or its JSON text.
pub fn decode_ack(reply: Value) -> Result<Ack, AckDecodeError> {
    match reply {
        Value::String(text) => serde_json::from_str(&text).map_err(AckDecodeError::Decode),
        other => serde_json::from_value(other).map_err(AckDecodeError::Decode),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AckDecodeError {
    #[error("malformed acknowledgment: {0}")]
    Decode(#[source] serde_json::Error),
}
