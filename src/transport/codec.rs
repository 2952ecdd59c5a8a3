//! Native messaging frame codec.
//!
//! Each message is a UTF-8 JSON document preceded by its length as a 32-bit
//! unsigned integer in native byte order. Uses `LengthDelimitedCodec` for
//! framing and `serde_json` for the body.

// ============================================================================
// Imports
// ============================================================================

use std::io;

use serde_json::Value;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use tracing::{trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// Largest message a native host may send (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Width of the length prefix.
const LENGTH_FIELD_BYTES: usize = 4;

// ============================================================================
// NativeMessageCodec
// ============================================================================

/// Codec for length-prefixed JSON native messages.
///
/// Frames whose body is not valid JSON are logged and skipped. A frame
/// longer than the configured maximum is an IO error and ends the stream.
#[derive(Debug)]
pub struct NativeMessageCodec {
    inner: LengthDelimitedCodec,
}

impl Default for NativeMessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl NativeMessageCodec {
    /// Creates a codec accepting frames up to `max_message_bytes`.
    #[must_use]
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_FIELD_BYTES)
                .native_endian()
                .max_frame_length(max_message_bytes)
                .new_codec(),
        }
    }
}

impl Decoder for NativeMessageCodec {
    type Item = Value;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(frame) = self.inner.decode(src)? {
            match serde_json::from_slice(&frame) {
                Ok(message) => {
                    trace!(len = frame.len(), "Decoded native message");
                    return Ok(Some(message));
                }
                Err(e) => {
                    warn!(error = %e, len = frame.len(), "Skipping malformed native message");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<Value> for NativeMessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        trace!(len = json.len(), "Encoding native message");
        self.inner.encode(Bytes::from(json), dst)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let len = u32::try_from(body.len()).expect("small body");
        buf.extend_from_slice(&len.to_ne_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_encode_uses_native_endian_prefix() {
        let mut codec = NativeMessageCodec::default();
        let mut buf = BytesMut::new();

        codec.encode(json!({ "a": 1 }), &mut buf).expect("encode");

        let body = br#"{"a":1}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_ne_bytes());
        assert_eq!(&buf[4..], body);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = NativeMessageCodec::default();
        let full = frame(br#"{"module":"har","status":"x","data":null}"#);

        let mut partial = BytesMut::from(&full[..10]);
        assert_eq!(codec.decode(&mut partial).expect("decode"), None);

        partial.extend_from_slice(&full[10..]);
        let message = codec.decode(&mut partial).expect("decode").expect("message");
        assert_eq!(message["status"], "x");
    }

    #[test]
    fn test_decode_skips_malformed_frame() {
        let mut codec = NativeMessageCodec::default();
        let mut buf = frame(b"not json");
        buf.extend_from_slice(&frame(br#"{"ok":true}"#));

        let message = codec.decode(&mut buf).expect("decode").expect("message");
        assert_eq!(message, json!({ "ok": true }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = NativeMessageCodec::new(8);
        let mut buf = frame(br#"{"too":"long"}"#);

        assert!(codec.decode(&mut buf).is_err());
    }
}
