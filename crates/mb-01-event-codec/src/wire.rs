//! # Binary Payload Encoding
//!
//! Fields are written in field-map order with no tags or padding:
//!
//! | Kind      | Encoding                              |
//! |-----------|---------------------------------------|
//! | bool      | 1 byte, 0 or 1                        |
//! | short     | i16 big-endian                        |
//! | int/uint  | 32-bit big-endian                     |
//! | long      | i64 big-endian                        |
//! | double    | IEEE-754 bit pattern, u64 big-endian  |
//! | string    | u32 byte length + UTF-8 bytes         |
//! | timestamp | i64 seconds since the epoch           |
//!
//! Decoding ignores trailing bytes after the last mapped field.

use bytes::{Buf, BufMut, BytesMut};
use shared_types::{
    CodecError, Event, EventData, EventInfo, FieldAccessError, FieldInfo, FieldKind, FieldValue,
    Timestamp, TypeCode,
};

pub(crate) fn access_error(type_code: TypeCode, err: FieldAccessError) -> CodecError {
    CodecError::InvalidPayload {
        type_code,
        reason: err.to_string(),
    }
}

/// Append the payload of `event` to `buf`, returning the bytes written.
pub fn encode_into(info: &EventInfo, event: &Event, buf: &mut BytesMut) -> Result<usize, CodecError> {
    let start = buf.len();
    for (index, field) in info.serialized_fields() {
        let value = info
            .get(event.data(), index)
            .map_err(|e| access_error(info.type_code(), e))?;
        put_value(info.type_code(), field, &value, buf)?;
    }
    Ok(buf.len() - start)
}

fn put_value(
    type_code: TypeCode,
    field: &FieldInfo,
    value: &FieldValue,
    buf: &mut BytesMut,
) -> Result<(), CodecError> {
    match value {
        FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
        FieldValue::Short(v) => buf.put_i16(*v),
        FieldValue::Int(v) => buf.put_i32(*v),
        FieldValue::UInt(v) => buf.put_u32(*v),
        FieldValue::Long(v) => buf.put_i64(*v),
        FieldValue::Double(v) => buf.put_u64(v.to_bits()),
        FieldValue::Timestamp(v) => buf.put_i64(v.as_secs()),
        FieldValue::String(v) => {
            let len = u32::try_from(v.len()).map_err(|_| CodecError::InvalidPayload {
                type_code,
                reason: format!("field '{}' is {} bytes long", field.name, v.len()),
            })?;
            buf.put_u32(len);
            buf.put_slice(v.as_bytes());
        }
    }
    Ok(())
}

/// Rebuild a record of type `info` from `payload`.
pub fn decode(info: &EventInfo, payload: &[u8]) -> Result<Box<dyn EventData>, CodecError> {
    let mut data = info.instantiate();
    let mut cursor = payload;
    for (index, field) in info.serialized_fields() {
        let value = take_value(info.type_code(), field, &mut cursor)?;
        info.set(data.as_mut(), index, value)
            .map_err(|e| access_error(info.type_code(), e))?;
    }
    if cursor.has_remaining() {
        tracing::trace!(
            type_code = %info.type_code(),
            trailing = cursor.remaining(),
            "Ignoring trailing payload bytes"
        );
    }
    Ok(data)
}

fn ensure(
    type_code: TypeCode,
    field: &FieldInfo,
    cursor: &[u8],
    needed: usize,
) -> Result<(), CodecError> {
    if cursor.remaining() < needed {
        return Err(CodecError::TruncatedPayload {
            type_code,
            field: field.name,
            needed,
            remaining: cursor.remaining(),
        });
    }
    Ok(())
}

fn take_value(
    type_code: TypeCode,
    field: &FieldInfo,
    cursor: &mut &[u8],
) -> Result<FieldValue, CodecError> {
    if let Some(width) = field.kind.wire_size() {
        ensure(type_code, field, cursor, width)?;
    }
    let value = match field.kind {
        FieldKind::Bool => FieldValue::Bool(cursor.get_u8() != 0),
        FieldKind::Short => FieldValue::Short(cursor.get_i16()),
        FieldKind::Int => FieldValue::Int(cursor.get_i32()),
        FieldKind::UInt => FieldValue::UInt(cursor.get_u32()),
        FieldKind::Long => FieldValue::Long(cursor.get_i64()),
        FieldKind::Double => FieldValue::Double(f64::from_bits(cursor.get_u64())),
        FieldKind::Timestamp => FieldValue::Timestamp(Timestamp::from_secs(cursor.get_i64())),
        FieldKind::String => {
            ensure(type_code, field, cursor, 4)?;
            let len = cursor.get_u32() as usize;
            ensure(type_code, field, cursor, len)?;
            let remaining: &[u8] = *cursor;
            let (bytes, rest) = remaining.split_at(len);
            let text = std::str::from_utf8(bytes).map_err(|e| CodecError::InvalidPayload {
                type_code,
                reason: format!("field '{}' is not UTF-8: {e}", field.name),
            })?;
            *cursor = rest;
            FieldValue::String(text.to_owned())
        }
    };
    Ok(value)
}
