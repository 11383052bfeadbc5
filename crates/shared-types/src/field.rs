//! # Field Maps
//!
//! A field map is the static, ordered list of [`Field`] entries describing one
//! event type: the column name, the value kind, the NULL policy used when the
//! event is written to SQL, and a pair of plain function pointers reading and
//! writing the member.
//!
//! The same table drives the binary codec, the legacy line mapping and the
//! SQL mapping. Entry order is part of the wire format and must not change
//! within a protocol version.
//!
//! An entry with an empty name is informational only: it stays in memory but
//! is never serialized.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Semantic kind of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Short,
    Int,
    UInt,
    Long,
    Double,
    String,
    Timestamp,
}

impl FieldKind {
    /// Encoded width on the wire, `None` for length-prefixed strings.
    #[must_use]
    pub const fn wire_size(self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Short => Some(2),
            Self::Int | Self::UInt => Some(4),
            Self::Long | Self::Double | Self::Timestamp => Some(8),
            Self::String => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Short => "short",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    #[must_use]
    pub const fn as_secs(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    /// Zero is the "never happened" sentinel.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(at) => write!(f, "{}", at.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A typed field value read out of (or written into) an event.
///
/// Equality on doubles is bit-exact, so a NaN compares equal to the same NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Short(i16),
    Int(i32),
    UInt(u32),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
}

impl FieldValue {
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Bool(_) => FieldKind::Bool,
            Self::Short(_) => FieldKind::Short,
            Self::Int(_) => FieldKind::Int,
            Self::UInt(_) => FieldKind::UInt,
            Self::Long(_) => FieldKind::Long,
            Self::Double(_) => FieldKind::Double,
            Self::String(_) => FieldKind::String,
            Self::Timestamp(_) => FieldKind::Timestamp,
        }
    }

    /// The zero value of a kind, as found in a freshly allocated event.
    #[must_use]
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Bool(false),
            FieldKind::Short => Self::Short(0),
            FieldKind::Int => Self::Int(0),
            FieldKind::UInt => Self::UInt(0),
            FieldKind::Long => Self::Long(0),
            FieldKind::Double => Self::Double(0.0),
            FieldKind::String => Self::String(String::new()),
            FieldKind::Timestamp => Self::Timestamp(Timestamp::default()),
        }
    }

    /// Whether this value is the sentinel that `policy` maps to SQL NULL.
    #[must_use]
    pub fn is_null_under(&self, policy: NullPolicy) -> bool {
        let sentinel = match policy {
            NullPolicy::Never => return false,
            NullPolicy::OnZero => 0,
            NullPolicy::OnMinusOne => -1,
        };
        match self {
            Self::Short(v) => i64::from(*v) == sentinel,
            Self::Int(v) => i64::from(*v) == sentinel,
            Self::UInt(v) => i64::from(*v) == sentinel,
            Self::Long(v) => *v == sentinel,
            Self::Timestamp(v) => v.as_secs() == sentinel,
            Self::Double(v) => *v == sentinel as f64,
            Self::Bool(_) | Self::String(_) => false,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

/// Which sentinel, if any, is written as SQL NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullPolicy {
    #[default]
    Never,
    OnZero,
    OnMinusOne,
}

/// A value of the wrong kind was offered to a field setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} value, found {found}")]
pub struct KindMismatch {
    pub expected: FieldKind,
    pub found: FieldKind,
}

/// Rust types that can back a mapped field.
pub trait FieldType: Sized {
    const KIND: FieldKind;

    fn to_value(&self) -> FieldValue;

    fn from_value(value: FieldValue) -> Result<Self, KindMismatch>;
}

macro_rules! impl_field_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldType for $ty {
                const KIND: FieldKind = FieldKind::$kind;

                fn to_value(&self) -> FieldValue {
                    FieldValue::$kind(Clone::clone(self))
                }

                fn from_value(value: FieldValue) -> Result<Self, KindMismatch> {
                    match value {
                        FieldValue::$kind(v) => Ok(v),
                        other => Err(KindMismatch {
                            expected: Self::KIND,
                            found: other.kind(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_field_type! {
    bool => Bool,
    i16 => Short,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    f64 => Double,
    String => String,
    Timestamp => Timestamp,
}

/// One entry of a field map.
pub struct Field<T: 'static> {
    /// Column name; empty for informational-only members.
    pub name: &'static str,
    pub kind: FieldKind,
    pub null_policy: NullPolicy,
    pub get: fn(&T) -> FieldValue,
    pub set: fn(&mut T, FieldValue) -> Result<(), KindMismatch>,
}

impl<T> Field<T> {
    /// Informational-only entries are skipped by every mapping.
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        !self.name.is_empty()
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("null_policy", &self.null_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_equality_is_bitwise() {
        assert_eq!(FieldValue::Double(f64::NAN), FieldValue::Double(f64::NAN));
        assert_ne!(FieldValue::Double(0.0), FieldValue::Double(-0.0));
    }

    #[test]
    fn test_null_policies() {
        assert!(FieldValue::UInt(0).is_null_under(NullPolicy::OnZero));
        assert!(!FieldValue::UInt(3).is_null_under(NullPolicy::OnZero));
        assert!(FieldValue::Int(-1).is_null_under(NullPolicy::OnMinusOne));
        assert!(FieldValue::Timestamp(Timestamp::default()).is_null_under(NullPolicy::OnZero));
        assert!(!FieldValue::Int(0).is_null_under(NullPolicy::Never));
        assert!(!FieldValue::String(String::new()).is_null_under(NullPolicy::OnZero));
    }

    #[test]
    fn test_kind_mismatch() {
        let err = i32::from_value(FieldValue::String("x".into())).unwrap_err();
        assert_eq!(err.expected, FieldKind::Int);
        assert_eq!(err.found, FieldKind::String);
    }

    #[test]
    fn test_zero_values_match_kind() {
        for kind in [
            FieldKind::Bool,
            FieldKind::Short,
            FieldKind::Int,
            FieldKind::UInt,
            FieldKind::Long,
            FieldKind::Double,
            FieldKind::String,
            FieldKind::Timestamp,
        ] {
            assert_eq!(FieldValue::zero(kind).kind(), kind);
        }
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::from_secs(0).to_string(), "1970-01-01T00:00:00+00:00");
    }
}
