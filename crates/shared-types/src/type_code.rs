//! # Type Codes
//!
//! Every event is identified by a 32-bit code. The high 16 bits name the
//! category (the family of records), the low 16 bits the element within it.
//!
//! ```text
//! ┌────────────────┬────────────────┐
//! │ category (u16) │ element (u16)  │
//! └────────────────┴────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known categories.
pub mod category {
    /// Protocol-internal control events (negotiation, acks, pings).
    pub const INTERNAL: u16 = 0;
    /// Monitoring engine events: hosts, services, downtimes, logs.
    pub const NEB: u16 = 1;
    /// Performance data destined for graphing backends.
    pub const STORAGE: u16 = 3;
    /// Business activity monitoring.
    pub const BAM: u16 = 6;
}

/// 32-bit event type code, `(category << 16) | element`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeCode(u32);

impl TypeCode {
    /// Build a code from its two halves.
    #[must_use]
    pub const fn new(category: u16, element: u16) -> Self {
        Self(((category as u32) << 16) | element as u32)
    }

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn category(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[must_use]
    pub const fn element(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Control events are consumed by the protocol layer and never surfaced.
    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.category() == category::INTERNAL
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category(), self.element())
    }
}

impl From<u32> for TypeCode {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<TypeCode> for u32 {
    fn from(code: TypeCode) -> Self {
        code.0
    }
}
