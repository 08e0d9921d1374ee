//! Kerberos TCP record marking (RFC 4120 section 7.2.2).
//!
//! Every message on a stream is preceded by a 4-byte big-endian length. The
//! high bit of the length is reserved and must be zero. UDP carries one
//! message per datagram and needs no framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length prefix size.
pub const HEADER_LEN: usize = 4;

/// Largest message accepted by default.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Result of decoding a frame from the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult<T> {
    /// A complete frame was decoded.
    Complete(T),
    /// More data is needed to complete the frame.
    Incomplete,
    /// The input is invalid.
    Invalid(String),
}

/// Frame codec for a stream transport.
pub trait FrameCodec: Send + Sync {
    /// Attempt to take one frame from the buffer.
    ///
    /// On `Complete`, the frame's bytes (header included) are consumed.
    fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<Bytes>;

    /// Frame a payload.
    fn encode(&self, payload: &[u8]) -> Bytes;

    /// Name used in logs.
    fn protocol_name(&self) -> &'static str;
}

/// 4-byte length-prefixed framing.
#[derive(Debug, Clone, Copy)]
pub struct RecordMarkCodec {
    max_frame: usize,
}

impl RecordMarkCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for RecordMarkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameCodec for RecordMarkCodec {
    fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<Bytes> {
        if buffer.len() < HEADER_LEN {
            return DecodeResult::Incomplete;
        }

        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        if len & 0x8000_0000 != 0 {
            return DecodeResult::Invalid("reserved length bit set".to_string());
        }
        let len = len as usize;
        if len > self.max_frame {
            return DecodeResult::Invalid(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame
            ));
        }
        if buffer.len() < HEADER_LEN + len {
            return DecodeResult::Incomplete;
        }

        buffer.advance(HEADER_LEN);
        DecodeResult::Complete(buffer.split_to(len).freeze())
    }

    fn encode(&self, payload: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        out.freeze()
    }

    fn protocol_name(&self) -> &'static str {
        "kerberos-tcp"
    }
}
