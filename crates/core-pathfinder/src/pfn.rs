//! Deterministic physical file names
//!
//! A file's location below a protocol prefix is derived from its DID alone:
//! `{base}/{scope}/{h[0..2]}/{h[2..4]}/{name}` where `h` is the hex SHA-256
//! digest of `scope:name`. Every endpoint therefore stores a given file
//! under the same relative path.

use conveyor_core_requests::Did;
use conveyor_core_topology::Protocol;
use sha2::{Digest, Sha256};

/// Hashed relative path of a DID, without leading slash
pub fn relative_path(did: &Did) -> String {
    let digest = hex::encode(Sha256::digest(format!("{}:{}", did.scope, did.name).as_bytes()));
    format!(
        "{}/{}/{}/{}",
        did.scope,
        &digest[0..2],
        &digest[2..4],
        did.name
    )
}

/// Full URL of a DID behind `protocol`
pub fn physical_url(protocol: &Protocol, did: &Did) -> String {
    format!("{}/{}", protocol.base_url(), relative_path(did))
}
