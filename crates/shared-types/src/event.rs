//! # Events
//!
//! [`Event`] is the unit that flows through the bus and over the wire. It
//! wraps a type-erased payload (anything implementing [`MappedEvent`]) plus
//! the routing ids carried in the BBDO header. Once built, events are shared
//! read-only behind an [`Arc`].

use crate::field::Field;
use crate::type_code::TypeCode;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An event shared between queues and tasks.
pub type SharedEvent = Arc<Event>;

/// A concrete event record described by a static field map.
///
/// Usually implemented through [`mapped_event!`](crate::mapped_event).
pub trait MappedEvent: Default + Clone + fmt::Debug + Send + Sync + 'static {
    const TYPE_CODE: TypeCode;

    /// Element name, unique within the category.
    const NAME: &'static str;

    /// SQL table the record maps to; empty when it is never stored.
    const TABLE: &'static str;

    fn field_map() -> &'static [Field<Self>];
}

/// Compare two records on their serialized fields, doubles bit-exact.
pub fn fields_equal<T: MappedEvent>(a: &T, b: &T) -> bool {
    T::field_map()
        .iter()
        .filter(|field| field.is_serialized())
        .all(|field| (field.get)(a) == (field.get)(b))
}

/// Object-safe view of a [`MappedEvent`].
pub trait EventData: Any + Send + Sync + fmt::Debug {
    fn type_code(&self) -> TypeCode;

    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn clone_boxed(&self) -> Box<dyn EventData>;

    fn eq_dyn(&self, other: &dyn EventData) -> bool;
}

impl<T: MappedEvent> EventData for T {
    fn type_code(&self) -> TypeCode {
        T::TYPE_CODE
    }

    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn EventData> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn EventData) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| fields_equal(self, other))
    }
}

/// A typed record plus its routing ids.
#[derive(Debug)]
pub struct Event {
    source_id: u32,
    destination_id: u32,
    data: Box<dyn EventData>,
}

impl Event {
    pub fn new<T: MappedEvent>(data: T) -> Self {
        Self::from_boxed(Box::new(data))
    }

    #[must_use]
    pub fn from_boxed(data: Box<dyn EventData>) -> Self {
        Self {
            source_id: 0,
            destination_id: 0,
            data,
        }
    }

    #[must_use]
    pub fn with_route(mut self, source_id: u32, destination_id: u32) -> Self {
        self.source_id = source_id;
        self.destination_id = destination_id;
        self
    }

    #[must_use]
    pub fn type_code(&self) -> TypeCode {
        self.data.type_code()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.data.type_name()
    }

    #[must_use]
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    #[must_use]
    pub fn destination_id(&self) -> u32 {
        self.destination_id
    }

    #[must_use]
    pub fn data(&self) -> &dyn EventData {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> &mut dyn EventData {
        self.data.as_mut()
    }

    /// Borrow the concrete record if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: MappedEvent>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.type_code().is_internal()
    }

    #[must_use]
    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            source_id: self.source_id,
            destination_id: self.destination_id,
            data: self.data.clone_boxed(),
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.destination_id == other.destination_id
            && self.data.eq_dyn(other.data.as_ref())
    }
}

impl<T: MappedEvent> From<T> for Event {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

/// Declare an event record together with its field map.
///
/// ```
/// use shared_types::{mapped_event, TypeCode};
///
/// mapped_event! {
///     /// A probe record.
///     pub struct Probe {
///         type_code: TypeCode::new(42, 1),
///         name: "probe",
///         table: "probes",
///     }
///     fields {
///         probe_id: u32 => "probe_id" (OnZero),
///         label: String => "label",
///         scratch: i64 => "",
///     }
/// }
/// ```
#[macro_export]
macro_rules! mapped_event {
    (@policy) => {
        $crate::field::NullPolicy::Never
    };
    (@policy $policy:ident) => {
        $crate::field::NullPolicy::$policy
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            type_code: $code:expr,
            name: $ev_name:literal,
            table: $table:literal $(,)?
        }
        fields {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty => $column:literal $( ($policy:ident) )?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl $crate::event::MappedEvent for $name {
            const TYPE_CODE: $crate::type_code::TypeCode = $code;
            const NAME: &'static str = $ev_name;
            const TABLE: &'static str = $table;

            fn field_map() -> &'static [$crate::field::Field<Self>] {
                static FIELDS: &[$crate::field::Field<$name>] = &[
                    $(
                        $crate::field::Field {
                            name: $column,
                            kind: <$ty as $crate::field::FieldType>::KIND,
                            null_policy: $crate::mapped_event!(@policy $($policy)?),
                            get: |event: &$name| $crate::field::FieldType::to_value(&event.$field),
                            set: |event: &mut $name, value| {
                                event.$field = <$ty as $crate::field::FieldType>::from_value(value)?;
                                Ok(())
                            },
                        },
                    )*
                ];
                FIELDS
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                $crate::event::fields_equal(self, other)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, NullPolicy};

    mapped_event! {
        struct Sample {
            type_code: TypeCode::new(9, 1),
            name: "sample",
            table: "samples",
        }
        fields {
            id: u32 => "id" (OnZero),
            ratio: f64 => "ratio",
            note: String => "",
        }
    }

    mapped_event! {
        struct Other {
            type_code: TypeCode::new(9, 2),
            name: "other",
            table: "",
        }
        fields {}
    }

    #[test]
    fn test_field_map_shape() {
        let map = Sample::field_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map[0].name, "id");
        assert_eq!(map[0].kind, FieldKind::UInt);
        assert_eq!(map[0].null_policy, NullPolicy::OnZero);
        assert_eq!(map[1].kind, FieldKind::Double);
        assert!(!map[2].is_serialized());
        assert!(Other::field_map().is_empty());
    }

    #[test]
    fn test_downcast_and_route() {
        let event = Event::new(Sample {
            id: 7,
            ..Sample::default()
        })
        .with_route(1, 2);

        assert_eq!(event.type_code(), TypeCode::new(9, 1));
        assert_eq!(event.type_name(), "sample");
        assert_eq!(event.source_id(), 1);
        assert_eq!(event.destination_id(), 2);
        assert_eq!(event.downcast_ref::<Sample>().map(|s| s.id), Some(7));
        assert!(event.downcast_ref::<Other>().is_none());
    }

    #[test]
    fn test_equality_ignores_informational_fields() {
        let a = Sample {
            id: 1,
            ratio: f64::NAN,
            note: "left".into(),
        };
        let b = Sample {
            note: "right".into(),
            ..a.clone()
        };
        assert_eq!(a, b);
        assert_eq!(Event::new(a.clone()), Event::new(b));
        assert_ne!(Event::new(a), Event::new(Other::default()));
    }

    #[test]
    fn test_setter_rejects_wrong_kind() {
        let mut sample = Sample::default();
        let set = Sample::field_map()[0].set;
        assert!(set(&mut sample, crate::field::FieldValue::UInt(5)).is_ok());
        assert_eq!(sample.id, 5);
        assert!(set(&mut sample, crate::field::FieldValue::Bool(true)).is_err());
    }
}
