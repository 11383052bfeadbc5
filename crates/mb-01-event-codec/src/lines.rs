//! # Legacy Line Mapping
//!
//! Text form used by line-oriented peers: one `name=value` pair per line, in
//! field-map order. Booleans are `0`/`1`, timestamps are epoch seconds and
//! strings escape backslash, newline and carriage return.
//!
//! Decoding is lenient in the way those peers expect: unknown keys are
//! skipped and missing keys keep their zero value.

use crate::wire::access_error;
use shared_types::{CodecError, Event, EventData, EventInfo, FieldKind, FieldValue, Timestamp};
use std::fmt::Write as _;
use tracing::trace;

pub fn encode_lines(info: &EventInfo, event: &Event) -> Result<String, CodecError> {
    let mut out = String::new();
    for (index, field) in info.serialized_fields() {
        let value = info
            .get(event.data(), index)
            .map_err(|e| access_error(info.type_code(), e))?;
        let _ = writeln!(out, "{}={}", field.name, render(&value));
    }
    Ok(out)
}

pub fn decode_lines(info: &EventInfo, text: &str) -> Result<Box<dyn EventData>, CodecError> {
    let mut data = info.instantiate();
    for line in text.lines().filter(|line| !line.is_empty()) {
        let Some((key, raw)) = line.split_once('=') else {
            return Err(CodecError::InvalidPayload {
                type_code: info.type_code(),
                reason: format!("line without '=': {line:?}"),
            });
        };
        let Some((index, field)) = info.serialized_fields().find(|(_, f)| f.name == key) else {
            trace!(type_code = %info.type_code(), key, "Skipping unknown key");
            continue;
        };
        let value = parse(field.kind, raw).ok_or_else(|| CodecError::InvalidPayload {
            type_code: info.type_code(),
            reason: format!("'{raw}' is not a valid {} for '{key}'", field.kind),
        })?;
        info.set(data.as_mut(), index, value)
            .map_err(|e| access_error(info.type_code(), e))?;
    }
    Ok(data)
}

fn render(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(v) => u8::from(*v).to_string(),
        FieldValue::Short(v) => v.to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::UInt(v) => v.to_string(),
        FieldValue::Long(v) => v.to_string(),
        FieldValue::Double(v) => v.to_string(),
        FieldValue::Timestamp(v) => v.as_secs().to_string(),
        FieldValue::String(v) => escape(v),
    }
}

fn parse(kind: FieldKind, raw: &str) -> Option<FieldValue> {
    let value = match kind {
        FieldKind::Bool => match raw {
            "1" | "true" => FieldValue::Bool(true),
            "0" | "false" | "" => FieldValue::Bool(false),
            _ => return None,
        },
        FieldKind::Short => FieldValue::Short(raw.parse().ok()?),
        FieldKind::Int => FieldValue::Int(raw.parse().ok()?),
        FieldKind::UInt => FieldValue::UInt(raw.parse().ok()?),
        FieldKind::Long => FieldValue::Long(raw.parse().ok()?),
        FieldKind::Double => FieldValue::Double(raw.parse().ok()?),
        FieldKind::Timestamp => FieldValue::Timestamp(Timestamp::from_secs(raw.parse().ok()?)),
        FieldKind::String => FieldValue::String(unescape(raw)),
    };
    Some(value)
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
