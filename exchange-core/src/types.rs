use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use tsify_next::Tsify;

// ============================================================================
// IDs
// ============================================================================

new_key_type! {
    /// Node in the location graph
    pub struct LocationId;
}

/// Stable identity of a market participant, as given by the input records.
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered (sender, receiver) pair identifying a candidate edge
pub type EdgeKey = (ParticipantId, ParticipantId);

// ============================================================================
// Quantities
// ============================================================================

/// Ad slots and ad credits are whole units
pub type Slots = i64;

/// Shortest-path distance between two locations
pub type Distance = u32;

/// Raw (possibly fractional) flow on an edge as returned by the solver
pub type Flow = f64;

/// Truncate a solver value to whole slots.
///
/// `epsilon` absorbs solver noise so that 1.9999999 counts as 2; anything
/// genuinely fractional is floored.
pub fn truncate_flow(value: Flow, epsilon: f64) -> Slots {
    if value <= 0.0 {
        return 0;
    }
    (value + epsilon).floor() as Slots
}

/// `ceil(n / 2)` for non-negative `n`, round-half-up
pub fn half_round_up(n: Slots) -> Slots {
    (n + 1).div_euclid(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_floors_fractional_flow() {
        assert_eq!(truncate_flow(1.5, 1e-7), 1);
        assert_eq!(truncate_flow(0.999, 1e-7), 0);
        assert_eq!(truncate_flow(-0.0, 1e-7), 0);
    }

    #[test]
    fn truncation_absorbs_solver_noise() {
        assert_eq!(truncate_flow(1.999_999_99, 1e-7), 2);
        assert_eq!(truncate_flow(2.000_000_01, 1e-7), 2);
    }

    #[test]
    fn half_rounds_up() {
        assert_eq!(half_round_up(0), 0);
        assert_eq!(half_round_up(1), 1);
        assert_eq!(half_round_up(2), 1);
        assert_eq!(half_round_up(3), 2);
    }
}
