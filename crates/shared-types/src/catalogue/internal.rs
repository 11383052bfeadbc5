//! Protocol control events (category 0). They never leave the BBDO layer.

use crate::mapped_event;
use crate::type_code::{category, TypeCode};

mapped_event! {
    /// Handshake frame: protocol version, offered extensions, requested window.
    pub struct VersionResponse {
        type_code: TypeCode::new(category::INTERNAL, 1),
        name: "version_response",
        table: "",
    }
    fields {
        bbdo_major: i16 => "major",
        bbdo_minor: i16 => "minor",
        bbdo_patch: i16 => "patch",
        /// JSON array of extension declarations.
        extensions: String => "extensions",
        ack_limit: u32 => "ack_limit",
    }
}

mapped_event! {
    /// Sent by a reader once it has consumed a window worth of events.
    pub struct Ack {
        type_code: TypeCode::new(category::INTERNAL, 2),
        name: "ack",
        table: "",
    }
    fields {
        acknowledged_events: u32 => "acknowledged_events",
    }
}

mapped_event! {
    /// Keep-alive without payload.
    pub struct Ping {
        type_code: TypeCode::new(category::INTERNAL, 3),
        name: "ping",
        table: "",
    }
    fields {}
}
