//! # Event Registry
//!
//! Type-erased index of every known event type, keyed by [`TypeCode`]. The
//! codec looks field maps up here when it only has a code off the wire.
//!
//! The registry is built once at startup and shared behind an `Arc`; there is
//! no global instance.

use crate::errors::RegistryError;
use crate::event::{EventData, MappedEvent};
use crate::field::{FieldKind, FieldValue, KindMismatch, NullPolicy};
use crate::type_code::{category, TypeCode};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Per-field metadata, without the typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub kind: FieldKind,
    pub null_policy: NullPolicy,
}

impl FieldInfo {
    #[must_use]
    pub const fn is_serialized(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Failure to access a field through the erased interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldAccessError {
    #[error("event is {found}, accessor belongs to {expected}")]
    WrongType { expected: TypeCode, found: TypeCode },

    #[error("no field at index {0}")]
    NoSuchField(usize),

    #[error(transparent)]
    Kind(#[from] KindMismatch),
}

/// Erased description of one event type.
pub struct EventInfo {
    type_code: TypeCode,
    name: &'static str,
    table: &'static str,
    fields: Vec<FieldInfo>,
    construct: fn() -> Box<dyn EventData>,
    getter: fn(&dyn EventData, usize) -> Result<FieldValue, FieldAccessError>,
    setter: fn(&mut dyn EventData, usize, FieldValue) -> Result<(), FieldAccessError>,
}

fn construct<T: MappedEvent>() -> Box<dyn EventData> {
    Box::new(T::default())
}

fn get_field<T: MappedEvent>(data: &dyn EventData, index: usize) -> Result<FieldValue, FieldAccessError> {
    let event = data
        .as_any()
        .downcast_ref::<T>()
        .ok_or(FieldAccessError::WrongType {
            expected: T::TYPE_CODE,
            found: data.type_code(),
        })?;
    let field = T::field_map()
        .get(index)
        .ok_or(FieldAccessError::NoSuchField(index))?;
    Ok((field.get)(event))
}

fn set_field<T: MappedEvent>(
    data: &mut dyn EventData,
    index: usize,
    value: FieldValue,
) -> Result<(), FieldAccessError> {
    let found = data.type_code();
    let event = data
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or(FieldAccessError::WrongType {
            expected: T::TYPE_CODE,
            found,
        })?;
    let field = T::field_map()
        .get(index)
        .ok_or(FieldAccessError::NoSuchField(index))?;
    (field.set)(event, value)?;
    Ok(())
}

impl EventInfo {
    /// Capture the field map of `T`.
    #[must_use]
    pub fn of<T: MappedEvent>() -> Self {
        Self {
            type_code: T::TYPE_CODE,
            name: T::NAME,
            table: T::TABLE,
            fields: T::field_map()
                .iter()
                .map(|field| FieldInfo {
                    name: field.name,
                    kind: field.kind,
                    null_policy: field.null_policy,
                })
                .collect(),
            construct: construct::<T>,
            getter: get_field::<T>,
            setter: set_field::<T>,
        }
    }

    #[must_use]
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Fields that take part in serialization, with their map index.
    pub fn serialized_fields(&self) -> impl Iterator<Item = (usize, &FieldInfo)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_serialized())
    }

    /// Allocate a zero-valued record of this type.
    #[must_use]
    pub fn instantiate(&self) -> Box<dyn EventData> {
        (self.construct)()
    }

    pub fn get(&self, data: &dyn EventData, index: usize) -> Result<FieldValue, FieldAccessError> {
        (self.getter)(data, index)
    }

    pub fn set(
        &self,
        data: &mut dyn EventData,
        index: usize,
        value: FieldValue,
    ) -> Result<(), FieldAccessError> {
        (self.setter)(data, index, value)
    }
}

impl fmt::Debug for EventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventInfo")
            .field("type_code", &self.type_code)
            .field("name", &self.name)
            .field("table", &self.table)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Index of event types and category names.
#[derive(Debug)]
pub struct EventRegistry {
    types: BTreeMap<TypeCode, EventInfo>,
    categories: BTreeMap<u16, &'static str>,
}

impl EventRegistry {
    /// An empty registry knowing only the internal category.
    #[must_use]
    pub fn new() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(category::INTERNAL, "internal");
        Self {
            types: BTreeMap::new(),
            categories,
        }
    }

    /// A registry holding the built-in catalogue.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::catalogue::install(&mut registry);
        registry
    }

    pub fn register<T: MappedEvent>(&mut self) -> Result<(), RegistryError> {
        self.register_info(EventInfo::of::<T>())
    }

    pub fn register_info(&mut self, info: EventInfo) -> Result<(), RegistryError> {
        let code = info.type_code();
        if let Some(existing) = self.types.get(&code) {
            return Err(RegistryError::DuplicateType {
                type_code: code,
                existing: existing.name(),
                rejected: info.name(),
            });
        }
        debug!(type_code = %code, name = info.name(), fields = info.fields().len(), "Event type registered");
        self.types.insert(code, info);
        Ok(())
    }

    pub fn register_category(&mut self, id: u16, name: &'static str) -> Result<(), RegistryError> {
        if let Some(existing) = self.categories.get(&id) {
            return Err(RegistryError::DuplicateCategory {
                id,
                existing: *existing,
                rejected: name,
            });
        }
        self.categories.insert(id, name);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, code: TypeCode) -> Option<&EventInfo> {
        self.types.get(&code)
    }

    #[must_use]
    pub fn contains(&self, code: TypeCode) -> bool {
        self.types.contains_key(&code)
    }

    #[must_use]
    pub fn category_name(&self, id: u16) -> Option<&'static str> {
        self.categories.get(&id).copied()
    }

    #[must_use]
    pub fn category_id(&self, name: &str) -> Option<u16> {
        self.categories
            .iter()
            .find(|(_, known)| **known == name)
            .map(|(id, _)| *id)
    }

    /// Resolve `category:element`, by name (`neb:host_status`) or number (`1:14`).
    #[must_use]
    pub fn resolve(&self, spec: &str) -> Option<TypeCode> {
        let (cat, element) = spec.split_once(':')?;
        let cat = cat
            .parse::<u16>()
            .ok()
            .or_else(|| self.category_id(cat))?;
        if let Ok(element) = element.parse::<u16>() {
            let code = TypeCode::new(cat, element);
            return self.contains(code).then_some(code);
        }
        self.types
            .values()
            .find(|info| info.type_code().category() == cat && info.name() == element)
            .map(EventInfo::type_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventInfo> {
        self.types.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
