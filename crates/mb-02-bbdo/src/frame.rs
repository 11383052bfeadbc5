//! # Frame Layout
//!
//! ```text
//! 0       2       4               8               12              16
//! ├───────┼───────┼───────────────┼───────────────┼───────────────┤
//! │ crc16 │  len  │   type code   │   source id   │    dest id    │ payload (len bytes)
//! └───────┴───────┴───────────────┴───────────────┴───────────────┘
//! ```
//!
//! All integers are big-endian. The checksum covers bytes 2..16 of the
//! header. A payload of 0xFFFF bytes or more is carried as a chain: every
//! frame with `len == 0xFFFF` is followed by another frame continuing the
//! same payload, and the chain ends with a frame shorter than 0xFFFF
//! (possibly empty).

use crate::checksum::crc16;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use shared_types::{StreamError, TypeCode};

pub const HEADER_SIZE: usize = 16;

/// Payload length that marks a continued frame.
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: u16,
    pub payload_len: u16,
    pub type_code: TypeCode,
    pub source_id: u32,
    pub destination_id: u32,
}

impl FrameHeader {
    /// Build a header with a freshly computed checksum.
    #[must_use]
    pub fn new(payload_len: u16, type_code: TypeCode, source_id: u32, destination_id: u32) -> Self {
        let mut header = Self {
            checksum: 0,
            payload_len,
            type_code,
            source_id,
            destination_id,
        };
        let mut raw = [0u8; HEADER_SIZE];
        header.write_to(&mut raw[..]);
        header.checksum = crc16(&raw[2..]);
        header
    }

    fn write_to(&self, mut out: &mut [u8]) {
        out.put_u16(self.checksum);
        out.put_u16(self.payload_len);
        out.put_u32(self.type_code.raw());
        out.put_u32(self.source_id);
        out.put_u32(self.destination_id);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut raw = [0u8; HEADER_SIZE];
        self.write_to(&mut raw[..]);
        buf.put_slice(&raw);
    }

    /// Read a header from the first [`HEADER_SIZE`] bytes of `raw`.
    #[must_use]
    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Self {
        let be16 = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
        let be32 = |at: usize| u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Self {
            checksum: be16(0),
            payload_len: be16(2),
            type_code: TypeCode::from_raw(be32(4)),
            source_id: be32(8),
            destination_id: be32(12),
        }
    }

    /// Check the stored checksum against the covered header bytes.
    pub fn verify(raw: &[u8; HEADER_SIZE]) -> Result<(), StreamError> {
        let expected = u16::from_be_bytes([raw[0], raw[1]]);
        let computed = crc16(&raw[2..]);
        if expected != computed {
            return Err(StreamError::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }
}

/// Append `payload` as one frame, or a chain of frames when it is long.
pub fn write_frames(
    buf: &mut BytesMut,
    type_code: TypeCode,
    source_id: u32,
    destination_id: u32,
    payload: &[u8],
) {
    buf.reserve(payload.len() + HEADER_SIZE * (1 + payload.len() / MAX_FRAME_PAYLOAD));
    let mut rest = payload;
    loop {
        let chunk_len = rest.len().min(MAX_FRAME_PAYLOAD);
        let (chunk, tail) = rest.split_at(chunk_len);
        // chunk_len is clamped to MAX_FRAME_PAYLOAD, so the cast is lossless
        FrameHeader::new(chunk_len as u16, type_code, source_id, destination_id).encode(buf);
        buf.put_slice(chunk);
        rest = tail;
        if chunk_len < MAX_FRAME_PAYLOAD {
            break;
        }
    }
}

/// A complete, regrouped frame chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

#[derive(Debug)]
pub enum ParseResult {
    /// A chain ended; `consumed` counts every byte of it, headers included.
    Complete { frame: RawFrame, consumed: usize },
    /// At least `needed` bytes must be buffered before progress.
    Incomplete { needed: usize },
}

/// Regroups frame chains from a read buffer.
///
/// Every whole frame is taken off the buffer as soon as it is available, so
/// a long chain is copied once however many reads it spans. Checksums are
/// verified as soon as each header is buffered, unless `verify` is false
/// (coarse mode).
#[derive(Debug)]
pub struct FrameAssembler {
    verify: bool,
    max_payload: usize,
    head: Option<FrameHeader>,
    payload: BytesMut,
    consumed: usize,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(verify: bool, max_payload: usize) -> Self {
        Self {
            verify,
            max_payload,
            head: None,
            payload: BytesMut::new(),
            consumed: 0,
        }
    }

    /// Whether part of a chain has been taken off the buffer already.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.head.is_some()
    }

    /// Payload bytes regrouped so far for the chain in progress.
    #[must_use]
    pub fn pending_payload(&self) -> usize {
        self.payload.len()
    }

    /// Take frames off the front of `buf` until a chain completes.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<ParseResult, StreamError> {
        loop {
            let Some(raw) = buf.get(..HEADER_SIZE) else {
                return Ok(ParseResult::Incomplete {
                    needed: HEADER_SIZE,
                });
            };
            let mut header_bytes = [0u8; HEADER_SIZE];
            header_bytes.copy_from_slice(raw);
            if self.verify {
                FrameHeader::verify(&header_bytes)?;
            }
            let header = FrameHeader::parse(&header_bytes);
            let len = usize::from(header.payload_len);
            if self.payload.len() + len > self.max_payload {
                return Err(StreamError::InvalidPayload(format!(
                    "frame chain for {} exceeds {} bytes",
                    header.type_code, self.max_payload
                )));
            }
            let frame_end = HEADER_SIZE + len;
            if buf.len() < frame_end {
                return Ok(ParseResult::Incomplete { needed: frame_end });
            }
            buf.advance(HEADER_SIZE);
            self.payload.extend_from_slice(&buf.split_to(len));
            self.consumed += frame_end;
            let head = *self.head.get_or_insert(header);
            if len < MAX_FRAME_PAYLOAD {
                let consumed = std::mem::take(&mut self.consumed);
                self.head = None;
                return Ok(ParseResult::Complete {
                    frame: RawFrame {
                        header: head,
                        payload: self.payload.split().freeze(),
                    },
                    consumed,
                });
            }
        }
    }
}
