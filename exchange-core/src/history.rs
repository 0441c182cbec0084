// Per-round snapshots and the series derived from them

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::{ExchangeError, Result};
use crate::exchange::Exchange;
use crate::solver::FlowSolver;
use crate::types::{Distance, Flow, ParticipantId, Slots};

// === SNAPSHOT ===

/// An edge and the flow it carried in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct EdgeFlow {
    pub sender: ParticipantId,
    pub receiver: ParticipantId,
    pub weight: f64,
    pub upper_bound: Slots,
    pub preferred: bool,
    pub distance: Option<Distance>,
    /// Raw solver value
    pub flow: Flow,
    /// Flow truncated to whole slots, as used for balances
    pub slots: Slots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub name: String,
    pub category: String,
    pub location: String,
    pub publisher: bool,
    /// Balance when the snapshot was taken
    pub balance: Slots,
    /// Placement constraint RHS, if the participant had outgoing edges
    pub placement_limit: Option<Slots>,
    /// Publication constraint RHS, if the participant had incoming edges
    pub publication_limit: Option<Slots>,
    pub preferred: Vec<ParticipantId>,
}

/// Immutable record of one round: topology plus resolved flows.
///
/// A plain value with no link to the live exchange or any solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct RoundSnapshot {
    pub round: u64,
    /// Sorted by id
    pub participants: Vec<ParticipantSummary>,
    /// Sorted by (sender, receiver)
    pub edges: Vec<EdgeFlow>,
    pub objective: f64,
}

impl RoundSnapshot {
    /// Total slots scheduled this round
    pub fn total_flow(&self) -> Slots {
        self.edges.iter().map(|e| e.slots).sum()
    }

    /// Slots by kind: index 0 counts preferred placements, index `d + 1`
    /// counts non-preferred placements at distance `d`. The vector ends at
    /// the farthest distance that carried any flow.
    pub fn detailed_flow(&self) -> Vec<Slots> {
        let mut buckets = vec![0];
        for edge in self.edges.iter().filter(|e| e.slots > 0) {
            let index = match edge.preferred {
                true => 0,
                false => edge.distance.unwrap_or(0) as usize + 1,
            };
            if buckets.len() <= index {
                buckets.resize(index + 1, 0);
            }
            buckets[index] += edge.slots;
        }
        buckets
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantSummary> {
        self.participants
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|i| &self.participants[i])
    }

    pub fn edge(&self, sender: ParticipantId, receiver: ParticipantId) -> Option<&EdgeFlow> {
        self.edges
            .binary_search_by_key(&(sender, receiver), |e| (e.sender, e.receiver))
            .ok()
            .map(|i| &self.edges[i])
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ExchangeError::Serialization(e.to_string()))
    }
}

// === HISTORY ===

/// Chronological store of round snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    rounds: Vec<RoundSnapshot>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, snapshot: RoundSnapshot) {
        self.rounds.push(snapshot);
    }

    /// Snapshot the exchange's current round and record it
    pub fn save<S: FlowSolver>(&mut self, exchange: &Exchange<S>) -> Result<()> {
        self.record(exchange.snapshot()?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RoundSnapshot> {
        self.rounds.get(index)
    }

    pub fn latest(&self) -> Option<&RoundSnapshot> {
        self.rounds.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundSnapshot> {
        self.rounds.iter()
    }

    /// Total slots per recorded round. Call again to restart.
    pub fn total_flow_series(&self) -> impl Iterator<Item = Slots> + '_ {
        self.rounds.iter().map(RoundSnapshot::total_flow)
    }

    /// `detailed_flow` per round, zero-padded at the tail to the widest round
    pub fn detailed_flow_series(&self) -> Vec<Vec<Slots>> {
        let rows: Vec<Vec<Slots>> = self.rounds.iter().map(RoundSnapshot::detailed_flow).collect();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        rows.into_iter()
            .map(|mut row| {
                row.resize(width, 0);
                row
            })
            .collect()
    }

    /// The detailed series transposed: one row per bucket, one column per round
    pub fn detailed_flow_columns(&self) -> Vec<Vec<Slots>> {
        let rows = self.detailed_flow_series();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        (0..width)
            .map(|bucket| rows.iter().map(|row| row[bucket]).collect())
            .collect()
    }
}
