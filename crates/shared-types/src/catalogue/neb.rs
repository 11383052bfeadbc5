//! Monitoring engine events (category 1).
//!
//! Identifiers that the engine leaves at zero when a record does not apply
//! (service ids on host-level records, unset timestamps) are marked
//! `OnZero` so they land in SQL as NULL.

use crate::field::Timestamp;
use crate::mapped_event;
use crate::type_code::{category, TypeCode};

mapped_event! {
    /// A host or service problem acknowledgement.
    pub struct Acknowledgement {
        type_code: TypeCode::new(category::NEB, 1),
        name: "acknowledgement",
        table: "acknowledgements",
    }
    fields {
        acknowledgement_type: i16 => "type",
        author: String => "author",
        comment: String => "comment_data",
        deletion_time: Timestamp => "deletion_time" (OnZero),
        entry_time: Timestamp => "entry_time" (OnZero),
        host_id: u32 => "host_id",
        instance_id: u32 => "instance_id",
        is_sticky: bool => "sticky",
        notify_contacts: bool => "notify_contacts",
        persistent_comment: bool => "persistent_comment",
        service_id: u32 => "service_id" (OnZero),
        state: i16 => "state",
    }
}

mapped_event! {
    pub struct Comment {
        type_code: TypeCode::new(category::NEB, 2),
        name: "comment",
        table: "comments",
    }
    fields {
        author: String => "author",
        comment_type: i16 => "type",
        data: String => "data",
        deletion_time: Timestamp => "deletion_time" (OnZero),
        entry_time: Timestamp => "entry_time" (OnZero),
        entry_type: i16 => "entry_type",
        expire_time: Timestamp => "expire_time" (OnZero),
        expires: bool => "expires",
        host_id: u32 => "host_id",
        instance_id: u32 => "instance_id",
        internal_id: u32 => "internal_id",
        persistent: bool => "persistent",
        service_id: u32 => "service_id" (OnZero),
        source: i16 => "source",
    }
}

mapped_event! {
    /// A scheduled downtime, from creation through cancellation or expiry.
    pub struct Downtime {
        type_code: TypeCode::new(category::NEB, 5),
        name: "downtime",
        table: "downtimes",
    }
    fields {
        actual_end_time: Timestamp => "actual_end_time" (OnZero),
        actual_start_time: Timestamp => "actual_start_time" (OnZero),
        author: String => "author",
        comment: String => "comment_data",
        deletion_time: Timestamp => "deletion_time" (OnZero),
        downtime_type: i16 => "type",
        duration: i64 => "duration",
        end_time: Timestamp => "end_time" (OnZero),
        entry_time: Timestamp => "entry_time" (OnZero),
        fixed: bool => "fixed",
        host_id: u32 => "host_id",
        instance_id: u32 => "instance_id",
        internal_id: u32 => "internal_id",
        service_id: u32 => "service_id" (OnZero),
        start_time: Timestamp => "start_time" (OnZero),
        triggered_by: u32 => "triggered_by" (OnZero),
        was_cancelled: bool => "cancelled",
        was_started: bool => "started",
    }
}

mapped_event! {
    pub struct HostCheck {
        type_code: TypeCode::new(category::NEB, 8),
        name: "host_check",
        table: "hosts",
    }
    fields {
        active_checks_enabled: bool => "active_checks",
        check_type: i16 => "check_type",
        command_line: String => "command_line",
        host_id: u32 => "host_id",
        next_check: Timestamp => "next_check" (OnZero),
    }
}

mapped_event! {
    /// Periodic host state snapshot.
    pub struct HostStatus {
        type_code: TypeCode::new(category::NEB, 14),
        name: "host_status",
        table: "hosts",
    }
    fields {
        host_id: u32 => "host_id",
        acknowledged: bool => "acknowledged",
        active_checks_enabled: bool => "active_checks",
        check_interval: f64 => "check_interval",
        check_type: i16 => "check_type",
        current_check_attempt: i16 => "check_attempt",
        current_state: i16 => "state",
        execution_time: f64 => "execution_time",
        has_been_checked: bool => "checked",
        last_check: Timestamp => "last_check" (OnZero),
        last_hard_state: i16 => "last_hard_state",
        last_state_change: Timestamp => "last_state_change" (OnZero),
        /// Kept for correlation only, not stored.
        last_time_up: Timestamp => "",
        latency: f64 => "latency",
        max_check_attempts: i16 => "max_check_attempts",
        next_check: Timestamp => "next_check" (OnZero),
        output: String => "output",
        percent_state_change: f64 => "percent_state_change",
        perf_data: String => "perfdata",
        state_type: i16 => "state_type",
    }
}

mapped_event! {
    /// A monitoring engine process starting or stopping.
    pub struct Instance {
        type_code: TypeCode::new(category::NEB, 15),
        name: "instance",
        table: "instances",
    }
    fields {
        engine: String => "engine",
        id: u32 => "instance_id",
        is_running: bool => "running",
        name: String => "name",
        pid: u32 => "pid",
        program_end: Timestamp => "end_time" (OnZero),
        program_start: Timestamp => "start_time" (OnZero),
        version: String => "version",
    }
}

mapped_event! {
    pub struct LogEntry {
        type_code: TypeCode::new(category::NEB, 17),
        name: "log_entry",
        table: "logs",
    }
    fields {
        c_time: Timestamp => "ctime",
        host_id: u32 => "host_id" (OnZero),
        host_name: String => "host_name",
        instance_name: String => "instance_name",
        log_type: i16 => "type",
        msg_type: i16 => "msg_type",
        notification_cmd: String => "notification_cmd",
        notification_contact: String => "notification_contact",
        output: String => "output",
        retry: i32 => "retry",
        service_description: String => "service_description",
        service_id: u32 => "service_id" (OnZero),
        status: i16 => "status",
    }
}

mapped_event! {
    /// Periodic service state snapshot.
    pub struct ServiceStatus {
        type_code: TypeCode::new(category::NEB, 24),
        name: "service_status",
        table: "services",
    }
    fields {
        host_id: u32 => "host_id",
        service_id: u32 => "service_id",
        acknowledged: bool => "acknowledged",
        active_checks_enabled: bool => "active_checks",
        check_interval: f64 => "check_interval",
        check_type: i16 => "check_type",
        current_check_attempt: i16 => "check_attempt",
        current_state: i16 => "state",
        execution_time: f64 => "execution_time",
        last_check: Timestamp => "last_check" (OnZero),
        last_hard_state: i16 => "last_hard_state",
        last_state_change: Timestamp => "last_state_change" (OnZero),
        latency: f64 => "latency",
        next_check: Timestamp => "next_check" (OnZero),
        output: String => "output",
        percent_state_change: f64 => "percent_state_change",
        perf_data: String => "perfdata",
        state_type: i16 => "state_type",
    }
}
