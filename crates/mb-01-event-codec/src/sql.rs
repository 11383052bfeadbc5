//! # SQL Row Mapping
//!
//! Turns events into column/value rows for SQL writers and back. This is the
//! only place where a field's [`NullPolicy`](shared_types::NullPolicy) is
//! applied: sentinel values become [`SqlValue::Null`] on the way out, and
//! `Null` reads back as the zero value.

use crate::wire::access_error;
use shared_types::{CodecError, Event, EventData, EventInfo, FieldKind, FieldValue, Timestamp};

/// A database-level value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<FieldValue> for SqlValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(v) => Self::Bool(v),
            FieldValue::Short(v) => Self::Integer(i64::from(v)),
            FieldValue::Int(v) => Self::Integer(i64::from(v)),
            FieldValue::UInt(v) => Self::Integer(i64::from(v)),
            FieldValue::Long(v) => Self::Integer(v),
            FieldValue::Double(v) => Self::Real(v),
            FieldValue::String(v) => Self::Text(v),
            FieldValue::Timestamp(v) => Self::Integer(v.as_secs()),
        }
    }
}

/// One row bound for `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    pub table: &'static str,
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl SqlRow {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

pub fn to_sql_row(info: &EventInfo, event: &Event) -> Result<SqlRow, CodecError> {
    let mut columns = Vec::with_capacity(info.fields().len());
    for (index, field) in info.serialized_fields() {
        let value = info
            .get(event.data(), index)
            .map_err(|e| access_error(info.type_code(), e))?;
        let value = if value.is_null_under(field.null_policy) {
            SqlValue::Null
        } else {
            SqlValue::from(value)
        };
        columns.push((field.name, value));
    }
    Ok(SqlRow {
        table: info.table(),
        columns,
    })
}

pub fn from_sql_row(info: &EventInfo, row: &SqlRow) -> Result<Box<dyn EventData>, CodecError> {
    let mut data = info.instantiate();
    for (index, field) in info.serialized_fields() {
        let Some(value) = row.get(field.name) else {
            continue;
        };
        let value = to_field_value(field.kind, value).ok_or_else(|| CodecError::InvalidPayload {
            type_code: info.type_code(),
            reason: format!("column '{}' holds {value:?}, expected {}", field.name, field.kind),
        })?;
        info.set(data.as_mut(), index, value)
            .map_err(|e| access_error(info.type_code(), e))?;
    }
    Ok(data)
}

fn to_field_value(kind: FieldKind, value: &SqlValue) -> Option<FieldValue> {
    let value = match (kind, value) {
        (kind, SqlValue::Null) => FieldValue::zero(kind),
        (FieldKind::Bool, SqlValue::Bool(v)) => FieldValue::Bool(*v),
        (FieldKind::Bool, SqlValue::Integer(v)) => FieldValue::Bool(*v != 0),
        (FieldKind::Short, SqlValue::Integer(v)) => FieldValue::Short(i16::try_from(*v).ok()?),
        (FieldKind::Int, SqlValue::Integer(v)) => FieldValue::Int(i32::try_from(*v).ok()?),
        (FieldKind::UInt, SqlValue::Integer(v)) => FieldValue::UInt(u32::try_from(*v).ok()?),
        (FieldKind::Long, SqlValue::Integer(v)) => FieldValue::Long(*v),
        (FieldKind::Timestamp, SqlValue::Integer(v)) => {
            FieldValue::Timestamp(Timestamp::from_secs(*v))
        }
        (FieldKind::Double, SqlValue::Real(v)) => FieldValue::Double(*v),
        (FieldKind::Double, SqlValue::Integer(v)) => FieldValue::Double(*v as f64),
        (FieldKind::String, SqlValue::Text(v)) => FieldValue::String(v.clone()),
        _ => return None,
    };
    Some(value)
}

/// Parameterised `INSERT` for `info`, `None` when the type has no table.
#[must_use]
pub fn insert_statement(info: &EventInfo) -> Option<String> {
    if info.table().is_empty() {
        return None;
    }
    let columns: Vec<&str> = info.serialized_fields().map(|(_, f)| f.name).collect();
    let placeholders: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
    Some(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        info.table(),
        columns.join(", "),
        placeholders.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::catalogue::bam::BaEvent;
    use shared_types::catalogue::internal::Ack;
    use shared_types::catalogue::neb::Downtime;

    #[test]
    fn test_zero_sentinels_become_null() {
        let info = EventInfo::of::<Downtime>();
        let event = Event::new(Downtime {
            host_id: 3,
            service_id: 0,
            triggered_by: 0,
            duration: 0,
            start_time: Timestamp::from_secs(100),
            ..Downtime::default()
        });
        let row = to_sql_row(&info, &event).unwrap();

        assert_eq!(row.table, "downtimes");
        assert_eq!(row.get("host_id"), Some(&SqlValue::Integer(3)));
        assert_eq!(row.get("service_id"), Some(&SqlValue::Null));
        assert_eq!(row.get("triggered_by"), Some(&SqlValue::Null));
        assert_eq!(row.get("duration"), Some(&SqlValue::Integer(0)));
        assert_eq!(row.get("start_time"), Some(&SqlValue::Integer(100)));
        assert_eq!(row.get("end_time"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_row_round_trip() {
        let info = EventInfo::of::<BaEvent>();
        let original = Event::new(BaEvent {
            ba_id: 9,
            first_level: 87.5,
            in_downtime: true,
            start_time: Timestamp::from_secs(12),
            status: 2,
            ..BaEvent::default()
        });
        let row = to_sql_row(&info, &original).unwrap();
        let back = Event::from_boxed(from_sql_row(&info, &row).unwrap());
        assert_eq!(back, original);
    }

    #[test]
    fn test_out_of_range_integer_rejected() {
        let info = EventInfo::of::<Ack>();
        let row = SqlRow {
            table: "",
            columns: vec![("acknowledged_events", SqlValue::Integer(-1))],
        };
        assert!(from_sql_row(&info, &row).is_err());
    }

    #[test]
    fn test_insert_statement() {
        let info = EventInfo::of::<BaEvent>();
        assert_eq!(
            insert_statement(&info).unwrap(),
            "INSERT INTO mod_bam_reporting_ba_events (ba_id, first_level, end_time, in_downtime, start_time, status) \
             VALUES (:ba_id, :first_level, :end_time, :in_downtime, :start_time, :status)"
        );
        assert!(insert_statement(&EventInfo::of::<Ack>()).is_none());
    }
}
