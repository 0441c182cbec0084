// Candidate edges between participants for one round

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::geography::LocationGraph;
use crate::participant::Participant;
use crate::types::{Distance, EdgeKey, LocationId, ParticipantId, Slots};

/// A directed edge along which `sender` may place ads with `receiver`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct CandidateEdge {
    pub sender: ParticipantId,
    pub receiver: ParticipantId,
    pub weight: f64,
    pub upper_bound: Slots,
    pub preferred: bool,
    /// Location distance; `None` on preferred edges, where distance plays no part
    pub distance: Option<Distance>,
}

/// Every candidate edge of a round, keyed by (sender, receiver)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationGraph {
    edges: BTreeMap<EdgeKey, CandidateEdge>,
}

impl AllocationGraph {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn get(&self, sender: ParticipantId, receiver: ParticipantId) -> Option<&CandidateEdge> {
        self.edges.get(&(sender, receiver))
    }

    pub fn edges(&self) -> impl Iterator<Item = &CandidateEdge> {
        self.edges.values()
    }

    pub fn outgoing(&self, id: ParticipantId) -> impl Iterator<Item = &CandidateEdge> {
        self.edges.values().filter(move |e| e.sender == id)
    }

    pub fn incoming(&self, id: ParticipantId) -> impl Iterator<Item = &CandidateEdge> {
        self.edges.values().filter(move |e| e.receiver == id)
    }
}

/// Objective weight of a non-preferred edge at `distance`
pub fn distance_weight(distance: Distance) -> f64 {
    1.0 / (1.0 + distance as f64)
}

/// Build the candidate edges for every ordered pair of distinct participants.
///
/// An edge exists iff the receiver accepts the sender. Preferred edges get
/// `config.preferred_weight`; others are weighted by inverse distance. Each
/// edge is capped at `sell_capacity / config.edge_cap_divisor` of the receiver.
pub fn build_edges(
    participants: &BTreeMap<ParticipantId, Participant>,
    locations: &LocationGraph,
    config: &ExchangeConfig,
) -> Result<AllocationGraph> {
    let mut edges = BTreeMap::new();
    let mut distance_cache: HashMap<String, HashMap<LocationId, Distance>> = HashMap::new();

    for sender in participants.values() {
        for receiver in participants.values() {
            if sender.id() == receiver.id() || !receiver.accepts(sender) {
                continue;
            }

            let preferred = sender.prefers(receiver);
            let (weight, distance) = if preferred {
                (config.preferred_weight, None)
            } else {
                let from = sender.location();
                if !distance_cache.contains_key(from) {
                    distance_cache.insert(from.to_string(), locations.distances_from(from)?);
                }
                let to = locations
                    .id_of(receiver.location())
                    .ok_or_else(|| ExchangeError::UnknownLocation(receiver.location().into()))?;
                let d = distance_cache
                    .get(from)
                    .and_then(|m| m.get(&to))
                    .copied()
                    .ok_or_else(|| ExchangeError::NoRoute {
                        from: from.to_string(),
                        to: receiver.location().to_string(),
                    })?;
                (distance_weight(d), Some(d))
            };

            let edge = CandidateEdge {
                sender: sender.id(),
                receiver: receiver.id(),
                weight,
                upper_bound: receiver.sell_capacity() / config.edge_cap_divisor,
                preferred,
                distance,
            };

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: instrument::targets::EDGE,
                sender = edge.sender.0,
                receiver = edge.receiver.0,
                weight = edge.weight,
                upper_bound = edge.upper_bound,
                preferred = edge.preferred,
                distance = edge.distance.map(i64::from).unwrap_or(-1),
            );

            edges.insert((edge.sender, edge.receiver), edge);
        }
    }

    Ok(AllocationGraph { edges })
}
