//! Performance data events (category 3) consumed by graphing backends.

use crate::field::Timestamp;
use crate::mapped_event;
use crate::type_code::{category, TypeCode};

mapped_event! {
    /// One sample of one metric.
    pub struct Metric {
        type_code: TypeCode::new(category::STORAGE, 1),
        name: "metric",
        table: "data_bin",
    }
    fields {
        ctime: Timestamp => "ctime",
        interval: u32 => "interval",
        metric_id: u32 => "id_metric",
        name: String => "name",
        rrd_len: i32 => "rrd_len",
        value: f64 => "value",
        value_type: i16 => "value_type",
        host_id: u32 => "host_id" (OnZero),
        service_id: u32 => "service_id" (OnZero),
    }
}

mapped_event! {
    /// State sample of an indexed service, for status graphs.
    pub struct Status {
        type_code: TypeCode::new(category::STORAGE, 4),
        name: "status",
        table: "",
    }
    fields {
        ctime: Timestamp => "ctime",
        index_id: u32 => "index_id",
        interval: u32 => "interval",
        rrd_len: i32 => "rrd_len",
        state: i16 => "state",
    }
}
