//! # Error Types
//!
//! The error taxonomy shared by the codec, the protocol streams and the bus.
//!
//! Flow-control and cancellation conditions are not errors: `WindowFull` is a
//! [`WriteOutcome`](crate::stream::WriteOutcome), `Timeout` and `Closed` are
//! [`ReadOutcome`](crate::stream::ReadOutcome)s.

use crate::type_code::TypeCode;
use thiserror::Error;

/// Errors raised while turning events into bytes, lines or rows and back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before every mapped field was read.
    #[error("Truncated payload for {type_code}: field '{field}' needs {needed} bytes, {remaining} remaining")]
    TruncatedPayload {
        type_code: TypeCode,
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// No field map is registered for this code.
    #[error("Unknown event type {0}")]
    UnknownEventType(TypeCode),

    /// The bytes were present but do not form a valid value.
    #[error("Invalid payload for {type_code}: {reason}")]
    InvalidPayload { type_code: TypeCode, reason: String },
}

/// Errors surfaced by [`Stream`](crate::stream::Stream) implementations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The substream ended inside a frame, or a payload was short.
    #[error("Truncated payload: needed {needed} bytes, {available} available")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("Unknown event type {0}")]
    UnknownEventType(TypeCode),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Missing mandatory extension, incompatible version, or no handshake.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Checksum mismatch: header carries {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },

    /// Some subscribers could not take the event; the others did.
    #[error("Spill store exhausted for {subscribers:?} ({delivered} deliveries succeeded)")]
    SpillExhausted {
        delivered: usize,
        subscribers: Vec<String>,
    },

    /// The bus has not started and cannot hold more events yet.
    #[error("Bus backlog full ({capacity} events)")]
    BacklogFull { capacity: usize },

    /// The operation does not exist in this stream's direction.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Write attempted on a closed stream.
    #[error("Stream closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the stream that raised this error is unusable afterwards.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::SpillExhausted { .. } | Self::BacklogFull { .. } | Self::Unsupported(_)
        )
    }
}

impl From<CodecError> for StreamError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::TruncatedPayload {
                needed, remaining, ..
            } => Self::TruncatedPayload {
                needed,
                available: remaining,
            },
            CodecError::UnknownEventType(code) => Self::UnknownEventType(code),
            CodecError::InvalidPayload { type_code, reason } => {
                Self::InvalidPayload(format!("{type_code}: {reason}"))
            }
        }
    }
}

/// Errors raised while building the event registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Type code {type_code} already registered as '{existing}', cannot register '{rejected}'")]
    DuplicateType {
        type_code: TypeCode,
        existing: &'static str,
        rejected: &'static str,
    },

    #[error("Category {id} already registered as '{existing}', cannot register '{rejected}'")]
    DuplicateCategory {
        id: u16,
        existing: &'static str,
        rejected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_map_onto_stream_taxonomy() {
        let code = TypeCode::new(1, 14);
        let err: StreamError = CodecError::TruncatedPayload {
            type_code: code,
            field: "output",
            needed: 8,
            remaining: 3,
        }
        .into();
        assert!(matches!(
            err,
            StreamError::TruncatedPayload {
                needed: 8,
                available: 3
            }
        ));

        let err: StreamError = CodecError::UnknownEventType(code).into();
        assert!(matches!(err, StreamError::UnknownEventType(c) if c == code));
    }

    #[test]
    fn test_fatality() {
        assert!(StreamError::ChecksumMismatch {
            expected: 1,
            computed: 2
        }
        .is_fatal());
        assert!(!StreamError::Unsupported("read").is_fatal());
        assert!(!StreamError::BacklogFull { capacity: 8 }.is_fatal());
    }
}
