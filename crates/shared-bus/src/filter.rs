//! # Subscription Filters
//!
//! A subscriber either takes everything or names the categories and exact
//! type codes it wants. Filters are resolved against the registry once, at
//! configuration time; matching is then a pair of set lookups.

use shared_types::{EventRegistry, TypeCode};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown event category '{0}'")]
    UnknownCategory(String),

    #[error("unknown event type '{0}'")]
    UnknownType(String),
}

/// Which events a subscriber (or a filtered publisher) takes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only {
        categories: BTreeSet<u16>,
        types: BTreeSet<TypeCode>,
    },
}

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::All
    }

    #[must_use]
    pub fn categories(categories: impl IntoIterator<Item = u16>) -> Self {
        Self::Only {
            categories: categories.into_iter().collect(),
            types: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn types(types: impl IntoIterator<Item = TypeCode>) -> Self {
        Self::Only {
            categories: BTreeSet::new(),
            types: types.into_iter().collect(),
        }
    }

    /// Add an exact type code to the filter. No-op on `All`.
    #[must_use]
    pub fn with_type(mut self, code: TypeCode) -> Self {
        if let Self::Only { types, .. } = &mut self {
            types.insert(code);
        }
        self
    }

    #[must_use]
    pub fn matches(&self, code: TypeCode) -> bool {
        match self {
            Self::All => true,
            Self::Only { categories, types } => {
                categories.contains(&code.category()) || types.contains(&code)
            }
        }
    }

    /// Build a filter from configuration entries.
    ///
    /// Accepted forms: `*` or `all`, a category (`neb` or `1`), a category
    /// wildcard (`neb:*`), and an exact type (`neb:host_status` or `1:14`).
    /// An empty list selects everything.
    pub fn parse<S: AsRef<str>>(entries: &[S], registry: &EventRegistry) -> Result<Self, FilterError> {
        let mut categories = BTreeSet::new();
        let mut types = BTreeSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry == "*" || entry.eq_ignore_ascii_case("all") {
                return Ok(Self::All);
            }
            match entry.split_once(':') {
                Some((cat, "*")) => {
                    categories.insert(resolve_category(cat, registry)?);
                }
                Some(_) => {
                    let code = registry
                        .resolve(entry)
                        .ok_or_else(|| FilterError::UnknownType(entry.to_string()))?;
                    types.insert(code);
                }
                None => {
                    categories.insert(resolve_category(entry, registry)?);
                }
            }
        }
        if categories.is_empty() && types.is_empty() {
            return Ok(Self::All);
        }
        Ok(Self::Only { categories, types })
    }
}

fn resolve_category(name: &str, registry: &EventRegistry) -> Result<u16, FilterError> {
    name.parse::<u16>()
        .ok()
        .filter(|id| registry.category_name(*id).is_some())
        .or_else(|| registry.category_id(name))
        .ok_or_else(|| FilterError::UnknownCategory(name.to_string()))
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Only { categories, types } => {
                let parts: Vec<String> = categories
                    .iter()
                    .map(|c| format!("{c}:*"))
                    .chain(types.iter().map(ToString::to_string))
                    .collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::catalogue::bam::BaEvent;
    use shared_types::catalogue::neb::{HostStatus, ServiceStatus};
    use shared_types::catalogue::storage::Metric;
    use shared_types::{category, MappedEvent};

    #[test]
    fn test_parse_mixed_entries() {
        let registry = EventRegistry::builtin();
        let filter = EventFilter::parse(&["storage", "neb:host_status", "6:5"], &registry).unwrap();

        assert!(filter.matches(Metric::TYPE_CODE));
        assert!(filter.matches(HostStatus::TYPE_CODE));
        assert!(filter.matches(BaEvent::TYPE_CODE));
        assert!(!filter.matches(ServiceStatus::TYPE_CODE));
        assert_eq!(filter.to_string(), "3:*,1:14,6:5");
    }

    #[test]
    fn test_wildcards_and_empty_select_all() {
        let registry = EventRegistry::builtin();
        assert_eq!(EventFilter::parse(&["neb", "*"], &registry).unwrap(), EventFilter::All);
        assert_eq!(EventFilter::parse::<&str>(&[], &registry).unwrap(), EventFilter::All);
        assert_eq!(
            EventFilter::parse(&["bam:*"], &registry).unwrap(),
            EventFilter::categories([category::BAM])
        );
    }

    #[test]
    fn test_unknown_names_rejected() {
        let registry = EventRegistry::builtin();
        assert_eq!(
            EventFilter::parse(&["nagios"], &registry).unwrap_err(),
            FilterError::UnknownCategory("nagios".into())
        );
        assert_eq!(
            EventFilter::parse(&["neb:host_state"], &registry).unwrap_err(),
            FilterError::UnknownType("neb:host_state".into())
        );
        assert_eq!(
            EventFilter::parse(&["42"], &registry).unwrap_err(),
            FilterError::UnknownCategory("42".into())
        );
    }
}
