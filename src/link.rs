//! Link framing for the polled block channel
//!
//! Every transaction on the channel carries at most one link frame:
//!
//! ```text
//! +-------+------+--------+--------+-----------------+-----+
//! | 0x7C  | 0xFF | len_lo | len_hi | payload (len B) | 0x7E|
//! +-------+------+--------+--------+-----------------+-----+
//! ```
//!
//! The channel is clocked whether or not the peer has anything to say, so
//! most received blocks are not frames at all. Decoding therefore reports a
//! reason instead of logging loudly, and never panics on arbitrary input.

use bytes::BufMut;
use thiserror::Error;

use crate::MAX_PAYLOAD_LEN;

/// Start of frame marker
pub const START_MARKER: u8 = 0x7c;

/// Sync / padding marker following the start marker
pub const PAD_MARKER: u8 = 0xff;

/// End of frame marker
pub const END_MARKER: u8 = 0x7e;

/// Offset of the little-endian payload length
pub const LENGTH_OFFSET: usize = 2;

/// Offset of the first payload byte
pub const PAYLOAD_OFFSET: usize = 4;

/// Number of framing fields: start, pad, len_lo, len_hi, end and one spare
pub const OVERHEAD: usize = 6;

/// Largest frame the encoder can produce
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + OVERHEAD;

/// Errors produced when building a link frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Reasons a received block is not a valid link frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Block shorter than a frame header ({0} bytes)")]
    Truncated(usize),

    #[error("Missing start marker (found {0:#04x})")]
    BadStartMarker(u8),

    #[error("Missing padding marker (found {0:#04x})")]
    BadPadMarker(u8),

    #[error("Invalid payload length {0}")]
    LengthOutOfRange(usize),

    #[error("Missing end marker at offset {offset}")]
    BadEndMarker { offset: usize },
}

impl DecodeError {
    /// True when the block does not even start like a frame, which is what an
    /// idle peer clocks out
    pub fn is_idle(&self) -> bool {
        matches!(self, DecodeError::BadStartMarker(_) | DecodeError::Truncated(_))
    }
}

/// Validate `payload` and write a link frame for it into `out`.
///
/// Returns the number of significant bytes written, `payload.len() + OVERHEAD - 1`.
pub fn encode_into(payload: &[u8], out: &mut [u8]) -> Result<usize, LinkError> {
    if payload.is_empty() {
        return Err(LinkError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(LinkError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let frame_len = payload.len() + OVERHEAD - 1;
    if out.len() < frame_len {
        return Err(LinkError::BufferTooSmall {
            needed: frame_len,
            available: out.len(),
        });
    }

    out.fill(0);
    let mut cursor = &mut out[..];
    cursor.put_u8(START_MARKER);
    cursor.put_u8(PAD_MARKER);
    cursor.put_u16_le(payload.len() as u16);
    cursor.put_slice(payload);
    cursor.put_u8(END_MARKER);

    Ok(frame_len)
}

/// Validate a received block and return the payload length it announces.
///
/// The payload itself starts at [`PAYLOAD_OFFSET`]; see [`payload`].
pub fn decode(buf: &[u8]) -> Result<usize, DecodeError> {
    if buf.len() < PAYLOAD_OFFSET {
        return Err(DecodeError::Truncated(buf.len()));
    }
    if buf[0] != START_MARKER {
        return Err(DecodeError::BadStartMarker(buf[0]));
    }
    if buf[1] != PAD_MARKER {
        return Err(DecodeError::BadPadMarker(buf[1]));
    }

    let len = u16::from_le_bytes([buf[LENGTH_OFFSET], buf[LENGTH_OFFSET + 1]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::LengthOutOfRange(len));
    }

    let end = PAYLOAD_OFFSET + len;
    match buf.get(end) {
        Some(&END_MARKER) => Ok(len),
        _ => Err(DecodeError::BadEndMarker { offset: end }),
    }
}

/// Payload slice of a block previously validated by [`decode`]
pub fn payload(buf: &[u8], len: usize) -> Option<&[u8]> {
    buf.get(PAYLOAD_OFFSET..PAYLOAD_OFFSET + len)
}

/// Reusable frame assembly buffer
///
/// One encoder is owned by the single producer of outbound frames. Each call
/// to [`LinkEncoder::encode`] overwrites the previous frame, so the encoder is
/// not reentrant; `&mut self` makes that explicit.
#[derive(Debug, Clone)]
pub struct LinkEncoder {
    buf: Box<[u8; MAX_FRAME_LEN]>,
    len: usize,
}

impl LinkEncoder {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; MAX_FRAME_LEN]),
            len: 0,
        }
    }

    /// Assemble a frame for `payload`, returning its reported length.
    ///
    /// On failure the previously assembled frame is discarded.
    pub fn encode(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        self.len = 0;
        let len = encode_into(payload, &mut self.buf[..])?;
        self.len = len;
        Ok(len)
    }

    /// Significant bytes of the last successfully assembled frame
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for LinkEncoder {
    fn default() -> Self {
        Self::new()
    }
}
