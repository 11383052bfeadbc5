//! # Shared Types Crate
//!
//! The event model every other crate of the broker builds on.
//!
//! ## Contents
//!
//! - [`TypeCode`]: the 32-bit `category << 16 | element` identifier.
//! - [`field`]: field kinds, values and the static per-type field maps.
//! - [`Event`]: a type-erased, shareable record plus routing ids.
//! - [`EventRegistry`]: lookup of field maps by type code.
//! - [`catalogue`]: the built-in event types.
//! - [`Stream`]: the contract implemented by every endpoint.
//! - [`errors`]: the codec/stream error taxonomy.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod catalogue;
pub mod errors;
pub mod event;
pub mod field;
pub mod registry;
pub mod stream;
pub mod type_code;

pub use errors::{CodecError, RegistryError, StreamError};
pub use event::{Event, EventData, MappedEvent, SharedEvent};
pub use field::{Field, FieldKind, FieldType, FieldValue, NullPolicy, Timestamp};
pub use registry::{EventInfo, EventRegistry, FieldAccessError, FieldInfo};
pub use stream::{Acceptor, Connector, ReadOutcome, Stream, StreamStats, WriteOutcome};
pub use type_code::{category, TypeCode};
