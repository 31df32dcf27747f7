//! Path construction over a topology snapshot

use crate::error::{NoRoute, NoRouteReason};
use crate::negotiate::{negotiate, ProtocolMatch, SchemeMap};
use crate::path::{Hop, TransferPath};
use conveyor_core_requests::{MatchedRequest, Request};
use conveyor_core_topology::{Cost, Rse, RseId, RseKind, Topology};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Routing options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathConfig {
    /// Allow two-hop paths through a staging endpoint
    pub multihop_enabled: bool,

    /// Only endpoints flagged `available_for_multihop = true` may stage
    pub require_multihop_attribute: bool,

    /// Groups of mutually compatible schemes
    pub scheme_equivalents: Vec<Vec<String>>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            multihop_enabled: true,
            require_multihop_attribute: false,
            scheme_equivalents: Vec::new(),
        }
    }
}

/// Builds transfer paths against one topology snapshot
pub struct PathBuilder<'a> {
    topology: &'a Topology,
    config: PathConfig,
    schemes: SchemeMap,
}

struct Staging<'t> {
    rse: &'t Arc<Rse>,
    inbound: ProtocolMatch,
    outbound: ProtocolMatch,
    first_cost: u32,
    second_cost: u32,
}

impl<'a> PathBuilder<'a> {
    pub fn new(topology: &'a Topology, config: PathConfig) -> Self {
        let schemes = SchemeMap::new(&config.scheme_equivalents);
        Self {
            topology,
            config,
            schemes,
        }
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Build the path for one matched request
    pub fn build(&self, matched: &MatchedRequest) -> Result<TransferPath, NoRoute> {
        let request = &matched.request;

        let Some(destination) = self.topology.rse(&request.dest_rse) else {
            return Err(NoRoute::new(
                request.id,
                NoRouteReason::DestinationUnknown {
                    rse: request.dest_rse.clone(),
                },
            ));
        };

        if matched.sources.is_empty() {
            return Err(NoRoute::new(request.id, NoRouteReason::NoSources));
        }

        for candidate in &matched.sources {
            let Some(source) = self.topology.rse(&candidate.rse) else {
                trace!(request_id = request.id, rse = %candidate.rse, "Source outside snapshot");
                continue;
            };

            if let Some(hop) = self.direct_hop(source, destination, request) {
                debug!(
                    request_id = request.id,
                    source = %source.id,
                    destination = %destination.id,
                    protocol = %hop.protocol.scheme,
                    "Direct path"
                );
                return Ok(TransferPath {
                    request: request.clone(),
                    hops: vec![hop],
                });
            }

            if !self.config.multihop_enabled {
                continue;
            }

            if let Some(staging) = self.find_staging(source, destination) {
                debug!(
                    request_id = request.id,
                    source = %source.id,
                    staging = %staging.rse.id,
                    destination = %destination.id,
                    "Staged path"
                );
                let first = Hop {
                    source: source.clone(),
                    destination: staging.rse.clone(),
                    protocol: staging.inbound,
                    activity: request.activity.clone(),
                    request: request.clone(),
                    cost: staging.first_cost,
                };
                let second = Hop {
                    source: staging.rse.clone(),
                    destination: destination.clone(),
                    protocol: staging.outbound,
                    activity: request.activity.clone(),
                    request: request.clone(),
                    cost: staging.second_cost,
                };
                return Ok(TransferPath {
                    request: request.clone(),
                    hops: vec![first, second],
                });
            }
        }

        Err(NoRoute::new(
            request.id,
            NoRouteReason::NoCompatibleRoute {
                tried: matched.sources.len(),
            },
        ))
    }

    /// Build paths for a batch, in parallel; output order follows input order
    pub fn build_all(&self, matched: &[MatchedRequest]) -> Vec<Result<TransferPath, NoRoute>> {
        matched.par_iter().map(|entry| self.build(entry)).collect()
    }

    /// Negotiated protocol for a direct hop between two snapshot endpoints
    pub fn negotiate_direct(&self, source: &RseId, destination: &RseId) -> Option<ProtocolMatch> {
        let source = self.topology.rse(source)?;
        let destination = self.topology.rse(destination)?;
        if !direct_allowed(source, destination) {
            return None;
        }
        self.topology.cost(&source.id, &destination.id).value()?;
        negotiate(source, destination, &self.schemes)
    }

    fn direct_hop(&self, source: &Arc<Rse>, destination: &Arc<Rse>, request: &Arc<Request>) -> Option<Hop> {
        if !direct_allowed(source, destination) {
            return None;
        }
        let Cost::Reachable(cost) = self.topology.cost(&source.id, &destination.id) else {
            return None;
        };
        let protocol = negotiate(source, destination, &self.schemes)?;

        Some(Hop {
            source: source.clone(),
            destination: destination.clone(),
            protocol,
            activity: request.activity.clone(),
            request: request.clone(),
            cost,
        })
    }

    fn eligible_for_staging(&self, rse: &Rse) -> bool {
        if rse.kind != RseKind::Disk {
            return false;
        }
        match rse.attribute_flag(Rse::ATTR_MULTIHOP) {
            Some(flag) => flag,
            None => !self.config.require_multihop_attribute,
        }
    }

    /// Cheapest DISK neighbour of `source` that can relay to `destination`
    ///
    /// Ties on the first leg are broken by total cost, then by id.
    fn find_staging<'t>(&'t self, source: &Rse, destination: &Rse) -> Option<Staging<'t>> {
        self.topology
            .neighbors(&source.id)
            .into_iter()
            .filter(|(candidate, _)| candidate.id != source.id && candidate.id != destination.id)
            .filter(|(candidate, _)| self.eligible_for_staging(candidate))
            .filter_map(|(candidate, first_cost)| {
                let Cost::Reachable(second_cost) = self.topology.cost(&candidate.id, &destination.id) else {
                    return None;
                };
                let inbound = negotiate(source, candidate, &self.schemes)?;
                let outbound = negotiate(candidate, destination, &self.schemes)?;
                Some(Staging {
                    rse: candidate,
                    inbound,
                    outbound,
                    first_cost,
                    second_cost,
                })
            })
            .min_by(|a, b| {
                a.first_cost
                    .cmp(&b.first_cost)
                    .then_with(|| {
                        (u64::from(a.first_cost) + u64::from(a.second_cost))
                            .cmp(&(u64::from(b.first_cost) + u64::from(b.second_cost)))
                    })
                    .then_with(|| a.rse.id.cmp(&b.rse.id))
            })
    }
}

/// Tape sources never write straight to tape or to endpoints demanding a
/// pre-staged disk copy
fn direct_allowed(source: &Rse, destination: &Rse) -> bool {
    !(source.is_tape() && (destination.is_tape() || destination.staging_required()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core_requests::{Did, RequestState, SourceReplica};
    use conveyor_core_topology::{Distance, Protocol};

    fn root() -> Protocol {
        Protocol::new("root", "host", 1094).with_prefix("/data")
    }

    fn disk(id: &str) -> Rse {
        Rse::new(id, RseKind::Disk).with_protocol(root())
    }

    fn tape(id: &str) -> Rse {
        Rse::new(id, RseKind::Tape).with_protocol(root())
    }

    fn request(id: i64, dest: &str) -> Arc<Request> {
        Arc::new(Request {
            id,
            did: Did::new("data13", format!("file.{id}")),
            dest_rse: dest.into(),
            bytes: 1000,
            activity: "T0 Export".to_string(),
            state: RequestState::Submitted,
            attempts: 0,
            last_error: None,
        })
    }

    fn matched(topology: &Topology, id: i64, dest: &str, sources: &[&str]) -> MatchedRequest {
        let request = request(id, dest);
        let mut sources: Vec<SourceReplica> = sources
            .iter()
            .map(|rse| SourceReplica {
                request_id: id,
                rse: (*rse).into(),
                available: true,
                cost: topology.cost(&(*rse).into(), &request.dest_rse),
            })
            .collect();
        sources.sort_by_key(|s| s.cost);
        MatchedRequest { request, sources }
    }

    fn hop_ids(path: &TransferPath) -> Vec<(String, String)> {
        path.hops
            .iter()
            .map(|hop| (hop.source.id.to_string(), hop.destination.id.to_string()))
            .collect()
    }

    #[test]
    fn test_direct_path() {
        let topology = Topology::from_parts(
            vec![disk("SRC"), tape("DST")],
            vec![Distance::new("SRC", "DST", 2)],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["SRC"])).unwrap();
        assert_eq!(hop_ids(&path), vec![("SRC".into(), "DST".into())]);
        assert!(!path.is_multihop());
        assert!(path.is_contiguous());
        assert_eq!(path.hops[0].protocol.scheme, "root");
        assert_eq!(path.hops[0].activity, "T0 Export");
        assert!(path.hops[0].source_url().starts_with("root://host:1094/data/data13/"));
    }

    #[test]
    fn test_cheapest_source_wins() {
        let topology = Topology::from_parts(
            vec![disk("A"), disk("B"), disk("DST")],
            vec![Distance::new("A", "DST", 5), Distance::new("B", "DST", 1)],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["A", "B"])).unwrap();
        assert_eq!(path.hops[0].source.id, RseId::from("B"));
    }

    #[test]
    fn test_equal_cost_keeps_matcher_order() {
        let topology = Topology::from_parts(
            vec![disk("Z"), disk("A"), disk("DST")],
            vec![Distance::new("Z", "DST", 1), Distance::new("A", "DST", 1)],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["Z", "A"])).unwrap();
        assert_eq!(path.hops[0].source.id, RseId::from("Z"));
    }

    #[test]
    fn test_tape_to_tape_goes_through_disk() {
        let topology = Topology::from_parts(
            vec![tape("T1"), tape("T2"), disk("BUF"), disk("FAR")],
            vec![
                Distance::new("T1", "T2", 1),
                Distance::new("T1", "BUF", 2),
                Distance::new("T1", "FAR", 3),
                Distance::new("BUF", "T2", 2),
                Distance::new("FAR", "T2", 1),
            ],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "T2", &["T1"])).unwrap();
        assert_eq!(
            hop_ids(&path),
            vec![("T1".into(), "BUF".into()), ("BUF".into(), "T2".into())]
        );
        assert!(path.is_multihop());
        assert!(path.is_contiguous());
        assert_eq!(path.total_cost(), 4);
        assert!(path.hops[0].is_stage_out_leg());
        assert!(path.hops[1].is_archive_leg());
    }

    #[test]
    fn test_staging_required_destination() {
        let topology = Topology::from_parts(
            vec![
                tape("TAPE"),
                disk("DST").with_attribute("staging_required", "true"),
                disk("BUF"),
            ],
            vec![
                Distance::new("TAPE", "DST", 1),
                Distance::new("TAPE", "BUF", 1),
                Distance::new("BUF", "DST", 1),
            ],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["TAPE"])).unwrap();
        assert_eq!(path.hops.len(), 2);
        assert_eq!(path.hops[0].destination.id, RseId::from("BUF"));
        assert!(builder.negotiate_direct(&"TAPE".into(), &"DST".into()).is_none());
    }

    #[test]
    fn test_staging_tie_break_on_total_cost_then_id() {
        let topology = Topology::from_parts(
            vec![tape("SRC"), tape("DST"), disk("B2"), disk("B1"), disk("B0")],
            vec![
                Distance::new("SRC", "B0", 1),
                Distance::new("SRC", "B1", 1),
                Distance::new("SRC", "B2", 1),
                Distance::new("B0", "DST", 5),
                Distance::new("B1", "DST", 2),
                Distance::new("B2", "DST", 2),
            ],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["SRC"])).unwrap();
        assert_eq!(path.hops[0].destination.id, RseId::from("B1"));
    }

    #[test]
    fn test_no_common_protocol_uses_staging() {
        let davs = Protocol::new("davs", "host", 443);
        let topology = Topology::from_parts(
            vec![
                disk("SRC"),
                Rse::new("DST", RseKind::Disk).with_protocol(davs.clone()),
                disk("BUF").with_protocol(davs),
            ],
            vec![
                Distance::new("SRC", "DST", 1),
                Distance::new("SRC", "BUF", 1),
                Distance::new("BUF", "DST", 1),
            ],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let path = builder.build(&matched(&topology, 1, "DST", &["SRC"])).unwrap();
        assert_eq!(path.hops[0].protocol.scheme, "root");
        assert_eq!(path.hops[1].protocol.scheme, "davs");
    }

    #[test]
    fn test_multihop_disabled() {
        let topology = Topology::from_parts(
            vec![tape("T1"), tape("T2"), disk("BUF")],
            vec![Distance::new("T1", "BUF", 1), Distance::new("BUF", "T2", 1)],
        );
        let config = PathConfig {
            multihop_enabled: false,
            ..PathConfig::default()
        };
        let builder = PathBuilder::new(&topology, config);

        let err = builder.build(&matched(&topology, 9, "T2", &["T1"])).unwrap_err();
        assert_eq!(err.request_id, 9);
        assert_eq!(err.reason, NoRouteReason::NoCompatibleRoute { tried: 1 });
    }

    #[test]
    fn test_multihop_attribute_required() {
        let topology = Topology::from_parts(
            vec![
                tape("T1"),
                tape("T2"),
                disk("OPEN"),
                disk("FLAGGED").with_attribute("available_for_multihop", "true"),
            ],
            vec![
                Distance::new("T1", "OPEN", 1),
                Distance::new("OPEN", "T2", 1),
                Distance::new("T1", "FLAGGED", 3),
                Distance::new("FLAGGED", "T2", 3),
            ],
        );
        let config = PathConfig {
            require_multihop_attribute: true,
            ..PathConfig::default()
        };
        let builder = PathBuilder::new(&topology, config);

        let path = builder.build(&matched(&topology, 1, "T2", &["T1"])).unwrap();
        assert_eq!(path.hops[0].destination.id, RseId::from("FLAGGED"));
    }

    #[test]
    fn test_no_route_reasons() {
        let topology = Topology::from_parts(vec![disk("A"), disk("DST")], vec![]);
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let err = builder.build(&matched(&topology, 1, "DST", &[])).unwrap_err();
        assert_eq!(err.reason, NoRouteReason::NoSources);

        let err = builder.build(&matched(&topology, 2, "DST", &["A"])).unwrap_err();
        assert_eq!(err.reason, NoRouteReason::NoCompatibleRoute { tried: 1 });

        let err = builder.build(&matched(&topology, 3, "ELSEWHERE", &["A"])).unwrap_err();
        assert_eq!(
            err.reason,
            NoRouteReason::DestinationUnknown {
                rse: "ELSEWHERE".into()
            }
        );
    }

    #[test]
    fn test_build_all_preserves_order() {
        let topology = Topology::from_parts(
            vec![disk("SRC"), disk("DST"), disk("NOWAY")],
            vec![Distance::new("SRC", "DST", 1)],
        );
        let builder = PathBuilder::new(&topology, PathConfig::default());

        let batch: Vec<MatchedRequest> = (1..=64)
            .map(|id| {
                let dest = if id % 3 == 0 { "NOWAY" } else { "DST" };
                matched(&topology, id, dest, &["SRC"])
            })
            .collect();

        let results = builder.build_all(&batch);
        assert_eq!(results.len(), 64);
        for (entry, result) in batch.iter().zip(&results) {
            match result {
                Ok(path) => {
                    assert_eq!(path.request.id, entry.request.id);
                    assert!(path.is_contiguous());
                }
                Err(err) => {
                    assert_eq!(err.request_id, entry.request.id);
                    assert_eq!(entry.request.dest_rse, RseId::from("NOWAY"));
                }
            }
        }
    }
}
