//! Protocol negotiation between two endpoints

use conveyor_core_topology::{Protocol, Rse};
use serde::Serialize;
use std::collections::HashMap;

/// Groups of schemes that can talk to each other
///
/// Identical schemes are always compatible. A typical deployment declares
/// `["root", "xroot"]` and `["https", "davs"]` as equivalent.
#[derive(Debug, Clone, Default)]
pub struct SchemeMap {
    groups: HashMap<String, usize>,
}

impl SchemeMap {
    pub fn new<G, S>(groups: G) -> Self
    where
        G: IntoIterator,
        G::Item: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (index, group) in groups.into_iter().enumerate() {
            for scheme in group {
                map.insert(scheme.as_ref().to_lowercase(), index);
            }
        }
        Self { groups: map }
    }

    pub fn compatible(&self, a: &str, b: &str) -> bool {
        if a.eq_ignore_ascii_case(b) {
            return true;
        }
        match (
            self.groups.get(&a.to_lowercase()),
            self.groups.get(&b.to_lowercase()),
        ) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// Protocol pair agreed for one hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolMatch {
    /// Scheme used to write at the destination; names the hop's protocol
    pub scheme: String,
    pub source: Protocol,
    pub destination: Protocol,
}

/// Pick the protocol pair for moving data from `source` to `destination`
///
/// Returns `None` when the source is not readable, the destination is not
/// writable, the destination rejects the source's QoS class, or no readable
/// source protocol shares a compatible scheme with a writable destination
/// protocol. Among compatible pairs the best destination write priority
/// wins, then the best source read priority, then declaration order.
pub fn negotiate(source: &Rse, destination: &Rse, schemes: &SchemeMap) -> Option<ProtocolMatch> {
    if !source.availability_read || !destination.availability_write {
        return None;
    }
    if !destination.accepts_qos_from(source) {
        return None;
    }

    destination
        .writable_protocols()
        .flat_map(|dst| {
            source
                .readable_protocols()
                .filter(move |src| schemes.compatible(&src.scheme, &dst.scheme))
                .map(move |src| (src, dst))
        })
        .min_by_key(|(src, dst)| (dst.write_priority, src.read_priority))
        .map(|(src, dst)| ProtocolMatch {
            scheme: dst.scheme.clone(),
            source: src.clone(),
            destination: dst.clone(),
        })
}
