//! Business activity monitoring events (category 6).

use crate::field::Timestamp;
use crate::mapped_event;
use crate::type_code::{category, TypeCode};

mapped_event! {
    /// Current state of a business activity.
    pub struct BaStatus {
        type_code: TypeCode::new(category::BAM, 1),
        name: "ba_status",
        table: "mod_bam",
    }
    fields {
        ba_id: u32 => "ba_id",
        in_downtime: bool => "in_downtime",
        last_state_change: Timestamp => "last_state_change" (OnZero),
        level_acknowledgement: f64 => "level_acknowledgement",
        level_downtime: f64 => "level_downtime",
        level_nominal: f64 => "level_nominal",
        state: i16 => "current_status",
        state_changed: bool => "",
    }
}

mapped_event! {
    /// Current state and impact of a key performance indicator.
    pub struct KpiStatus {
        type_code: TypeCode::new(category::BAM, 3),
        name: "kpi_status",
        table: "mod_bam_kpi",
    }
    fields {
        kpi_id: u32 => "kpi_id",
        in_downtime: bool => "in_downtime",
        level_acknowledgement_hard: f64 => "acknowledged",
        level_downtime_hard: f64 => "downtime",
        level_nominal_hard: f64 => "level_nominal",
        state_hard: i16 => "current_status",
        state_soft: i16 => "state_type",
        last_state_change: Timestamp => "last_state_change" (OnZero),
        last_impact: f64 => "last_impact",
        valid: bool => "valid",
    }
}

mapped_event! {
    /// A closed or open period during which a business activity held one state.
    pub struct BaEvent {
        type_code: TypeCode::new(category::BAM, 5),
        name: "ba_event",
        table: "mod_bam_reporting_ba_events",
    }
    fields {
        ba_id: u32 => "ba_id",
        first_level: f64 => "first_level",
        end_time: Timestamp => "end_time" (OnZero),
        in_downtime: bool => "in_downtime",
        start_time: Timestamp => "start_time",
        status: i16 => "status",
    }
}
