//! Length-prefixed record frames.
//!
//! Each frame is a 4-byte big-endian unsigned length `L` followed by exactly
//! `L` bytes of JSON encoding one [`LogRecord`]. There is no handshake and
//! no acknowledgement; frames only flow from the producer to the receiver.

use crate::record::LogRecord;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Failure while encoding or decoding a frame.
///
/// Every decode error ends the connection it occurred on and nothing else.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("connection closed inside the length header ({got} of 4 bytes)")]
    TruncatedHeader { got: usize },

    #[error("connection closed inside a payload ({got} of {expected} bytes)")]
    TruncatedPayload { expected: u32, got: usize },

    #[error("frame length {len} exceeds limit {max}")]
    TooLarge { len: u32, max: u32 },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode record payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("i/o error while reading frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize `record` into a complete frame (header plus payload).
///
/// The record should already be prepared; unrendered arguments and raw
/// errors are not part of the serialized form.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(record).map_err(FrameError::Encode)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a payload (without its header) into a record.
pub fn decode_payload(payload: &[u8]) -> Result<LogRecord, FrameError> {
    serde_json::from_slice(payload).map_err(FrameError::Decode)
}

/// Read one frame from `reader`.
///
/// **Returns**
/// - `Ok(Some(record))` for a complete, well-formed frame.
/// - `Ok(None)` on a clean end of stream before any header byte.
/// - `Err(..)` for a short header, a short payload, an oversized length or
///   a payload that does not decode.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Option<LogRecord>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(FrameError::TruncatedHeader { got });
    }

    let len = u32::from_be_bytes(header);
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    let got = read_full(reader, &mut payload).await?;
    if got < payload.len() {
        return Err(FrameError::TruncatedPayload { expected: len, got });
    }

    decode_payload(&payload).map(Some)
}

// Like `read_exact`, but reports how many bytes arrived before EOF.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;

    fn frame_of(json: &str) -> Vec<u8> {
        let mut bytes = (json.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(json.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn reads_back_encoded_record() {
        let mut record = LogRecord::new(Level::Error, "mainLog", "some {} message").with_args(["error"]);
        record.prepare();
        let bytes = encode_frame(&record).unwrap();
        assert_eq!(u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize, bytes.len() - 4);

        let mut reader = bytes.as_slice();
        let decoded = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(decoded.level, Level::Error);
        assert_eq!(decoded.logger_name, "mainLog");
        assert_eq!(decoded.rendered_message.as_deref(), Some("some error message"));
        assert!(read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_header_is_reported() {
        let mut reader: &[u8] = &[0, 0];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { got: 2 }));
    }

    #[tokio::test]
    async fn short_payload_is_reported() {
        let mut bytes = frame_of(r#"{"level":"INFO","logger":"x","message":"a"}"#);
        bytes.truncate(bytes.len() - 5);
        let mut reader = bytes.as_slice();
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::TruncatedPayload { .. }));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let bytes = frame_of(r#"{"level":"INFO","message":"a"}"#);
        let mut reader = bytes.as_slice();
        let err = read_frame(&mut reader, 8).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn corrupt_payload_is_reported() {
        let bytes = frame_of("not json at all");
        let mut reader = bytes.as_slice();
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
    }
}
