//! # Event Catalogue
//!
//! The built-in event types, grouped by category. Element numbers and field
//! order are part of the wire format.

pub mod bam;
pub mod internal;
pub mod neb;
pub mod storage;

use crate::event::MappedEvent;
use crate::registry::{EventInfo, EventRegistry};
use crate::type_code::category;
use tracing::warn;

/// Category names as used in configuration filters.
pub const CATEGORIES: &[(u16, &str)] = &[
    (category::NEB, "neb"),
    (category::STORAGE, "storage"),
    (category::BAM, "bam"),
];

fn builtin_types() -> Vec<EventInfo> {
    fn info<T: MappedEvent>() -> EventInfo {
        EventInfo::of::<T>()
    }

    vec![
        info::<internal::VersionResponse>(),
        info::<internal::Ack>(),
        info::<internal::Ping>(),
        info::<neb::Acknowledgement>(),
        info::<neb::Comment>(),
        info::<neb::Downtime>(),
        info::<neb::HostCheck>(),
        info::<neb::HostStatus>(),
        info::<neb::Instance>(),
        info::<neb::LogEntry>(),
        info::<neb::ServiceStatus>(),
        info::<storage::Metric>(),
        info::<storage::Status>(),
        info::<bam::BaStatus>(),
        info::<bam::KpiStatus>(),
        info::<bam::BaEvent>(),
    ]
}

/// Install the built-in categories and types into `registry`.
///
/// Entries already present are kept and reported.
pub fn install(registry: &mut EventRegistry) {
    for (id, name) in CATEGORIES {
        if let Err(e) = registry.register_category(*id, name) {
            warn!(error = %e, "Skipping built-in category");
        }
    }
    for info in builtin_types() {
        if let Err(e) = registry.register_info(info) {
            warn!(error = %e, "Skipping built-in event type");
        }
    }
}
