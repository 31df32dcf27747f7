//! Job parameter payloads handed to the transfer execution service

use crate::error::JobParamsError;
use crate::pipeline::MetadataPipeline;
use conveyor_core_pathfinder::{Hop, TransferPath};
use conveyor_core_requests::RequestId;
use conveyor_core_topology::RseId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Submission payload for one hop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobParams {
    pub request_id: RequestId,
    pub scope: String,
    pub name: String,
    pub filesize: u64,
    pub activity: String,
    pub source_rse: RseId,
    pub dest_rse: RseId,
    pub source_url: String,
    pub dest_url: String,
    pub protocol: String,
    pub hop_index: usize,
    pub is_multihop: bool,
    pub is_final_hop: bool,
    pub overwrite: bool,
    pub verify_checksum: bool,

    /// Seconds allowed for staging from tape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bring_online: Option<u64>,

    /// Seconds to wait for archival on a tape destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_timeout: Option<u64>,

    /// Hours the job may wait in the transfer service queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_in_queue: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_metadata: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_metadata: Option<Value>,
}

/// Base submission settings shared by every hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub bring_online: Option<u64>,
    pub default_lifetime: Option<u64>,
    /// Replaces any per-endpoint `archive_timeout` attribute
    pub archive_timeout_override: Option<u64>,
    /// Activity → hours; the `default` entry covers unlisted activities
    pub max_time_in_queue: BTreeMap<String, u64>,
    pub overwrite: bool,
    pub verify_checksum: bool,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            bring_online: None,
            default_lifetime: None,
            archive_timeout_override: None,
            max_time_in_queue: BTreeMap::new(),
            overwrite: true,
            verify_checksum: true,
        }
    }
}

impl JobDefaults {
    fn time_in_queue(&self, activity: &str) -> Option<u64> {
        self.max_time_in_queue
            .get(activity)
            .or_else(|| self.max_time_in_queue.get("default"))
            .copied()
    }
}

/// Endpoint attribute holding its archive timeout in seconds
pub const ATTR_ARCHIVE_TIMEOUT: &str = "archive_timeout";

/// Turns transfer paths into job parameters
#[derive(Debug, Clone)]
pub struct JobParamsBuilder {
    pipeline: MetadataPipeline,
    defaults: JobDefaults,
}

impl JobParamsBuilder {
    pub fn new(pipeline: MetadataPipeline, defaults: JobDefaults) -> Self {
        Self { pipeline, defaults }
    }

    pub fn pipeline(&self) -> &MetadataPipeline {
        &self.pipeline
    }

    /// Parameters for every hop of `path`, in hop order
    ///
    /// Any hop failing fails the whole path; nothing partial is returned.
    pub fn build_path(&self, path: &TransferPath) -> Result<Vec<JobParams>, JobParamsError> {
        let last = path.hops.len().saturating_sub(1);
        path.hops
            .iter()
            .enumerate()
            .map(|(index, hop)| self.build_hop(hop, index, path.is_multihop(), index == last))
            .collect()
    }

    /// Parameters for a single hop
    pub fn build_hop(
        &self,
        hop: &Hop,
        hop_index: usize,
        is_multihop: bool,
        is_final_hop: bool,
    ) -> Result<JobParams, JobParamsError> {
        let metadata = self.pipeline.assemble(hop).map_err(|err| {
            warn!(request_id = hop.request.id, error = %err, "Metadata rejected");
            err
        })?;

        let request = &hop.request;
        let params = JobParams {
            request_id: request.id,
            scope: request.did.scope.clone(),
            name: request.did.name.clone(),
            filesize: request.bytes,
            activity: hop.activity.clone(),
            source_rse: hop.source.id.clone(),
            dest_rse: hop.destination.id.clone(),
            source_url: hop.source_url(),
            dest_url: hop.dest_url(),
            protocol: hop.protocol.scheme.clone(),
            hop_index,
            is_multihop,
            is_final_hop,
            overwrite: self.defaults.overwrite,
            verify_checksum: self.defaults.verify_checksum,
            bring_online: if hop.source.is_tape() {
                self.defaults.bring_online
            } else {
                None
            },
            archive_timeout: if hop.destination.is_tape() {
                self.defaults.archive_timeout_override.or_else(|| {
                    hop.destination
                        .attribute(ATTR_ARCHIVE_TIMEOUT)
                        .and_then(|value| value.trim().parse().ok())
                })
            } else {
                None
            },
            max_time_in_queue: self.defaults.time_in_queue(&hop.activity),
            lifetime: self.defaults.default_lifetime,
            archive_metadata: metadata.archive,
            staging_metadata: metadata.staging,
        };

        debug!(
            request_id = params.request_id,
            hop = hop_index,
            source = %params.source_rse,
            destination = %params.dest_rse,
            "Job parameters built"
        );
        Ok(params)
    }
}
