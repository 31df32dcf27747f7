//! Storage endpoint (RSE) records
//!
//! An [`Rse`] is a named storage site or service. Records are loaded from the
//! catalog into a topology snapshot and treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifier of a storage endpoint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RseId(String);

impl RseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Storage medium of an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RseKind {
    /// Online storage, readable without staging
    #[default]
    Disk,
    /// Tape archive; reads need staging, writes are archival
    Tape,
}

impl fmt::Display for RseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RseKind::Disk => write!(f, "DISK"),
            RseKind::Tape => write!(f, "TAPE"),
        }
    }
}

impl FromStr for RseKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DISK" => Ok(RseKind::Disk),
            "TAPE" => Ok(RseKind::Tape),
            _ => Err(anyhow::anyhow!("Invalid RSE type: {}", s)),
        }
    }
}

/// An access protocol exposed by an endpoint
///
/// Priorities follow the usual convention: 1 is the most preferred value and
/// 0 means the operation is not supported through this protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub scheme: String,
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_priority")]
    pub read_priority: u32,
    #[serde(default = "default_priority")]
    pub write_priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl Protocol {
    /// Create a protocol usable for both reads and writes
    pub fn new(scheme: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            hostname: hostname.into(),
            port,
            prefix: String::new(),
            read_priority: 1,
            write_priority: 1,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_priorities(mut self, read: u32, write: u32) -> Self {
        self.read_priority = read;
        self.write_priority = write;
        self
    }

    pub fn supports_read(&self) -> bool {
        self.read_priority > 0
    }

    pub fn supports_write(&self) -> bool {
        self.write_priority > 0
    }

    /// `scheme://host[:port]prefix` with the prefix normalised to a leading slash
    pub fn base_url(&self) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        let prefix = if prefix.is_empty() || prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{}", prefix)
        };

        if self.port == 0 {
            format!("{}://{}{}", self.scheme, self.hostname, prefix)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.hostname, self.port, prefix)
        }
    }
}

/// A storage endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rse {
    pub id: RseId,
    #[serde(default, rename = "type")]
    pub kind: RseKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default = "default_true")]
    pub availability_read: bool,
    #[serde(default = "default_true")]
    pub availability_write: bool,
}

fn default_true() -> bool {
    true
}

impl Rse {
    /// Attribute naming the QoS class of the endpoint
    pub const ATTR_QOS: &'static str = "qos";
    /// Comma list of QoS classes a destination accepts data from
    pub const ATTR_SOURCE_QOS: &'static str = "source_qos";
    /// Destination refuses direct writes from tape sources
    pub const ATTR_STAGING_REQUIRED: &'static str = "staging_required";
    /// Eligibility of the endpoint as an intermediate hop
    pub const ATTR_MULTIHOP: &'static str = "available_for_multihop";

    pub fn new(id: impl Into<RseId>, kind: RseKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: BTreeMap::new(),
            protocols: Vec::new(),
            availability_read: true,
            availability_write: true,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_availability(mut self, read: bool, write: bool) -> Self {
        self.availability_read = read;
        self.availability_write = write;
        self
    }

    pub fn is_tape(&self) -> bool {
        self.kind == RseKind::Tape
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Boolean view of an attribute; unparseable values read as absent
    pub fn attribute_flag(&self, key: &str) -> Option<bool> {
        match self.attribute(key)?.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn qos(&self) -> Option<&str> {
        self.attribute(Self::ATTR_QOS)
    }

    pub fn staging_required(&self) -> bool {
        self.attribute_flag(Self::ATTR_STAGING_REQUIRED)
            .unwrap_or(false)
    }

    /// Whether this endpoint, as a destination, accepts data coming from `source`
    ///
    /// Without a `source_qos` restriction every source is accepted. With one,
    /// the source must declare a QoS class that appears in the list.
    pub fn accepts_qos_from(&self, source: &Rse) -> bool {
        let Some(allowed) = self.attribute(Self::ATTR_SOURCE_QOS) else {
            return true;
        };

        match source.qos() {
            Some(qos) => allowed
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate.eq_ignore_ascii_case(qos)),
            None => false,
        }
    }

    pub fn readable_protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter().filter(|p| p.supports_read())
    }

    pub fn writable_protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter().filter(|p| p.supports_write())
    }
}

/// Directed distance between two endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distance {
    pub src: RseId,
    pub dst: RseId,
    pub cost: u32,
}

impl Distance {
    pub fn new(src: impl Into<RseId>, dst: impl Into<RseId>, cost: u32) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            cost,
        }
    }
}
