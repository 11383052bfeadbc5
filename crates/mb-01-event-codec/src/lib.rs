//! # Event Codec
//!
//! Generic serialization of every registered event type, driven entirely by
//! the static field maps in `shared-types`. No event type carries its own
//! serialization code.
//!
//! ## Mappings
//!
//! | Mapping | Module | Used by |
//! |---------|--------|---------|
//! | Binary payload | [`wire`] | BBDO frames |
//! | `name=value` lines | [`lines`] | line-oriented legacy peers |
//! | Column/value rows | [`sql`] | SQL writers |
//!
//! Null policies only apply to the SQL mapping; binary and line forms always
//! carry the raw value.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod lines;
pub mod sql;
pub mod wire;

pub use sql::{SqlRow, SqlValue};

use bytes::{Bytes, BytesMut};
use shared_types::{CodecError, Event, EventInfo, EventRegistry, TypeCode};
use std::sync::Arc;

/// Registry-backed front end to the three mappings.
#[derive(Debug, Clone)]
pub struct EventCodec {
    registry: Arc<EventRegistry>,
}

impl EventCodec {
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    fn info(&self, type_code: TypeCode) -> Result<&EventInfo, CodecError> {
        self.registry
            .get(type_code)
            .ok_or(CodecError::UnknownEventType(type_code))
    }

    pub fn encode(&self, event: &Event) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode_into(event, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the payload of `event` to `buf`, returning its length.
    pub fn encode_into(&self, event: &Event, buf: &mut BytesMut) -> Result<usize, CodecError> {
        wire::encode_into(self.info(event.type_code())?, event, buf)
    }

    /// Decode a payload. Routing ids are left at zero; they travel outside it.
    pub fn decode(&self, type_code: TypeCode, payload: &[u8]) -> Result<Event, CodecError> {
        let data = wire::decode(self.info(type_code)?, payload)?;
        Ok(Event::from_boxed(data))
    }

    pub fn encode_lines(&self, event: &Event) -> Result<String, CodecError> {
        lines::encode_lines(self.info(event.type_code())?, event)
    }

    pub fn decode_lines(&self, type_code: TypeCode, text: &str) -> Result<Event, CodecError> {
        let data = lines::decode_lines(self.info(type_code)?, text)?;
        Ok(Event::from_boxed(data))
    }

    pub fn to_sql_row(&self, event: &Event) -> Result<SqlRow, CodecError> {
        sql::to_sql_row(self.info(event.type_code())?, event)
    }

    pub fn from_sql_row(&self, type_code: TypeCode, row: &SqlRow) -> Result<Event, CodecError> {
        let data = sql::from_sql_row(self.info(type_code)?, row)?;
        Ok(Event::from_boxed(data))
    }

    pub fn insert_statement(&self, type_code: TypeCode) -> Result<Option<String>, CodecError> {
        Ok(sql::insert_statement(self.info(type_code)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shared_types::catalogue::neb::ServiceStatus;
    use shared_types::{FieldKind, FieldValue, MappedEvent, Timestamp};

    fn codec() -> EventCodec {
        EventCodec::new(Arc::new(EventRegistry::builtin()))
    }

    /// Fill every field of a fresh `info` record from the seeds.
    fn populate(info: &EventInfo, seeds: &[(u64, String)]) -> Event {
        let mut data = info.instantiate();
        for (index, field) in info.fields().iter().enumerate() {
            let (bits, text) = &seeds[index % seeds.len()];
            let value = match field.kind {
                FieldKind::Bool => FieldValue::Bool(bits & 1 == 1),
                FieldKind::Short => FieldValue::Short(*bits as i16),
                FieldKind::Int => FieldValue::Int(*bits as i32),
                FieldKind::UInt => FieldValue::UInt(*bits as u32),
                FieldKind::Long => FieldValue::Long(*bits as i64),
                FieldKind::Double => FieldValue::Double(f64::from_bits(*bits)),
                FieldKind::String => FieldValue::String(text.clone()),
                FieldKind::Timestamp => FieldValue::Timestamp(Timestamp::from_secs(*bits as i64)),
            };
            info.set(data.as_mut(), index, value).unwrap();
        }
        Event::from_boxed(data)
    }

    proptest! {
        #[test]
        fn prop_every_registered_type_round_trips(
            seeds in prop::collection::vec((any::<u64>(), ".{0,24}"), 1..24)
        ) {
            let codec = codec();
            for info in codec.registry().iter() {
                let event = populate(info, &seeds);
                let payload = codec.encode(&event).unwrap();
                let decoded = codec.decode(info.type_code(), &payload).unwrap();
                prop_assert_eq!(&decoded, &event);
            }
        }

        #[test]
        fn prop_short_payloads_never_panic(cut in 0usize..64) {
            let codec = codec();
            let event = Event::new(ServiceStatus {
                output: "CRITICAL - socket timeout".into(),
                ..ServiceStatus::default()
            });
            let payload = codec.encode(&event).unwrap();
            let cut = cut.min(payload.len().saturating_sub(1));
            let result = codec.decode(ServiceStatus::TYPE_CODE, &payload[..cut]);
            prop_assert!(
                matches!(result, Err(CodecError::TruncatedPayload { .. })),
                "unexpected result: {:?}",
                result
            );
        }
    }

    #[test]
    fn test_nan_zero_and_empty_values_round_trip() {
        let codec = codec();
        let event = Event::new(ServiceStatus {
            latency: f64::from_bits(0x7FF8_0000_0000_0001),
            execution_time: -0.0,
            output: String::new(),
            ..ServiceStatus::default()
        });
        let payload = codec.encode(&event).unwrap();
        let decoded = codec.decode(ServiceStatus::TYPE_CODE, &payload).unwrap();
        let status = decoded.downcast_ref::<ServiceStatus>().unwrap();
        assert_eq!(status.latency.to_bits(), 0x7FF8_0000_0000_0001);
        assert_eq!(status.execution_time.to_bits(), (-0.0f64).to_bits());
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let codec = codec();
        let code = TypeCode::new(77, 1);
        assert_eq!(
            codec.decode(code, &[]).unwrap_err(),
            CodecError::UnknownEventType(code)
        );
    }

    #[test]
    fn test_unregistered_event_cannot_be_encoded() {
        let codec = EventCodec::new(Arc::new(EventRegistry::new()));
        let event = Event::new(ServiceStatus::default());
        assert!(matches!(
            codec.encode(&event),
            Err(CodecError::UnknownEventType(_))
        ));
    }
}
