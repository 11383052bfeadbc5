//! # Version and Extension Negotiation
//!
//! Both peers exchange a `version_response` control event carrying their
//! protocol version, their extension declarations (as JSON) and the ack
//! window they want. Each side then runs [`negotiate`] on the pair; the rule
//! is symmetric so both reach the same verdict.
//!
//! - Protocol majors must match.
//! - An extension declared mandatory by either side must be offered by both.
//! - Surviving extensions are those offered by both, in local order.
//! - The ack window is the smaller of the two requests.

use serde::{Deserialize, Serialize};
use shared_types::catalogue::internal::VersionResponse;
use shared_types::StreamError;
use std::collections::BTreeMap;
use std::fmt;

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: 2,
    minor: 0,
    patch: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A named protocol feature a peer declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    /// May be dropped from the negotiated set without failing.
    #[serde(default)]
    pub optional: bool,
    /// The handshake fails if the other side does not offer it.
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl Extension {
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
            mandatory: false,
            options: BTreeMap::new(),
        }
    }

    pub fn mandatory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            mandatory: true,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// What one side puts on the wire during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: ProtocolVersion,
    pub extensions: Vec<Extension>,
    pub ack_limit: u32,
}

impl Handshake {
    pub fn to_event(&self) -> Result<VersionResponse, StreamError> {
        let extensions = serde_json::to_string(&self.extensions)
            .map_err(|e| StreamError::NegotiationFailed(format!("cannot encode extensions: {e}")))?;
        Ok(VersionResponse {
            bbdo_major: self.version.major as i16,
            bbdo_minor: self.version.minor as i16,
            bbdo_patch: self.version.patch as i16,
            extensions,
            ack_limit: self.ack_limit,
        })
    }

    pub fn from_event(event: &VersionResponse) -> Result<Self, StreamError> {
        let extensions = if event.extensions.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&event.extensions).map_err(|e| {
                StreamError::NegotiationFailed(format!("malformed extension list: {e}"))
            })?
        };
        Ok(Self {
            version: ProtocolVersion {
                major: event.bbdo_major as u16,
                minor: event.bbdo_minor as u16,
                patch: event.bbdo_patch as u16,
            },
            extensions,
            ack_limit: event.ack_limit,
        })
    }
}

/// An extension both sides agreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedExtension {
    pub name: String,
    pub local_options: BTreeMap<String, String>,
    pub peer_options: BTreeMap<String, String>,
}

/// Outcome of a successful handshake; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub peer_version: ProtocolVersion,
    pub extensions: Vec<NegotiatedExtension>,
    pub ack_limit: u32,
}

impl Negotiated {
    pub fn extension_names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|ext| ext.name.as_str())
    }

    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext.name == name)
    }
}

fn missing_mandatory<'a>(declared: &'a [Extension], offered: &[Extension]) -> Option<&'a str> {
    declared
        .iter()
        .filter(|ext| ext.mandatory)
        .find(|ext| !offered.iter().any(|other| other.name == ext.name))
        .map(|ext| ext.name.as_str())
}

/// Evaluate a handshake from the local side's point of view.
pub fn negotiate(local: &Handshake, peer: &Handshake) -> Result<Negotiated, StreamError> {
    if local.version.major != peer.version.major {
        return Err(StreamError::NegotiationFailed(format!(
            "incompatible protocol versions: local {}, peer {}",
            local.version, peer.version
        )));
    }
    if peer.ack_limit == 0 {
        return Err(StreamError::NegotiationFailed(
            "peer requested an empty ack window".into(),
        ));
    }
    if let Some(name) = missing_mandatory(&local.extensions, &peer.extensions) {
        return Err(StreamError::NegotiationFailed(format!(
            "peer does not offer mandatory extension '{name}'"
        )));
    }
    if let Some(name) = missing_mandatory(&peer.extensions, &local.extensions) {
        return Err(StreamError::NegotiationFailed(format!(
            "peer requires extension '{name}' which is not offered locally"
        )));
    }

    let extensions = local
        .extensions
        .iter()
        .filter_map(|ext| {
            peer.extensions
                .iter()
                .find(|other| other.name == ext.name)
                .map(|other| NegotiatedExtension {
                    name: ext.name.clone(),
                    local_options: ext.options.clone(),
                    peer_options: other.options.clone(),
                })
        })
        .collect();

    Ok(Negotiated {
        peer_version: peer.version,
        extensions,
        ack_limit: local.ack_limit.min(peer.ack_limit),
    })
}
