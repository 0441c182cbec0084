// Linear program over candidate edges and the LP backend that solves it

use std::collections::{BTreeMap, HashMap};

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    default_solver, variable,
};
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::allocation::AllocationGraph;
use crate::error::{ExchangeError, Result};
use crate::participant::Participant;
use crate::types::{EdgeKey, Flow, ParticipantId, Slots};

// === PROGRAM ===

/// Which side of a participant's capacity a constraint limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub enum CapacitySide {
    /// Outgoing flow against buy capacity
    Placement,
    /// Incoming flow against sell capacity
    Publication,
}

/// One continuous variable per candidate edge
#[derive(Debug, Clone, PartialEq)]
pub struct FlowVariable {
    pub key: EdgeKey,
    pub upper_bound: f64,
    pub weight: f64,
}

/// `sum(flow over edges) <= rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityConstraint {
    pub name: String,
    pub participant: ParticipantId,
    pub side: CapacitySide,
    /// Indices into `FlowProgram::variables`
    pub terms: Vec<usize>,
    pub rhs: Slots,
}

/// Solver-independent description of one round's allocation problem.
///
/// Rebuilt from scratch every round; nothing carries over between solves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowProgram {
    pub round: u64,
    pub variables: Vec<FlowVariable>,
    pub constraints: Vec<CapacityConstraint>,
    by_name: HashMap<String, usize>,
    by_participant: HashMap<(ParticipantId, CapacitySide), usize>,
}

pub fn constraint_name(participant: &Participant, side: CapacitySide) -> String {
    let suffix = match side {
        CapacitySide::Placement => "ads",
        CapacitySide::Publication => "pubs",
    };
    format!("{}-{} {}", participant.name(), participant.id(), suffix)
}

impl FlowProgram {
    /// Formulate the round's LP: maximize weighted flow subject to each
    /// participant's placement and publication capacity.
    ///
    /// Participants without outgoing edges get no placement row, and those
    /// without incoming edges get no publication row.
    pub fn build(
        round: u64,
        graph: &AllocationGraph,
        participants: &BTreeMap<ParticipantId, Participant>,
    ) -> Self {
        let mut program = Self {
            round,
            ..Self::default()
        };
        let mut outgoing: BTreeMap<ParticipantId, Vec<usize>> = BTreeMap::new();
        let mut incoming: BTreeMap<ParticipantId, Vec<usize>> = BTreeMap::new();

        for (index, edge) in graph.edges().enumerate() {
            program.variables.push(FlowVariable {
                key: (edge.sender, edge.receiver),
                upper_bound: edge.upper_bound.max(0) as f64,
                weight: edge.weight,
            });
            outgoing.entry(edge.sender).or_default().push(index);
            incoming.entry(edge.receiver).or_default().push(index);
        }

        for participant in participants.values() {
            if let Some(terms) = outgoing.remove(&participant.id()) {
                program.push_constraint(
                    participant,
                    CapacitySide::Placement,
                    terms,
                    participant.buy_capacity(),
                );
            }
            if let Some(terms) = incoming.remove(&participant.id()) {
                program.push_constraint(
                    participant,
                    CapacitySide::Publication,
                    terms,
                    participant.sell_capacity(),
                );
            }
        }
        program
    }

    fn push_constraint(
        &mut self,
        participant: &Participant,
        side: CapacitySide,
        terms: Vec<usize>,
        rhs: Slots,
    ) {
        let name = constraint_name(participant, side);
        let index = self.constraints.len();
        self.by_name.insert(name.clone(), index);
        self.by_participant.insert((participant.id(), side), index);
        self.constraints.push(CapacityConstraint {
            name,
            participant: participant.id(),
            side,
            terms,
            rhs,
        });
    }

    pub fn constraint_by_name(&self, name: &str) -> Option<&CapacityConstraint> {
        self.by_name.get(name).map(|&i| &self.constraints[i])
    }

    pub fn constraint_for(
        &self,
        participant: ParticipantId,
        side: CapacitySide,
    ) -> Option<&CapacityConstraint> {
        self.by_participant
            .get(&(participant, side))
            .map(|&i| &self.constraints[i])
    }

    /// Right-hand side of a named constraint
    pub fn rhs(&self, name: &str) -> Option<Slots> {
        self.constraint_by_name(name).map(|c| c.rhs)
    }
}

// === SOLUTION ===

/// Resolved flow per edge, detached from any solver instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowSolution {
    pub flows: BTreeMap<EdgeKey, Flow>,
    pub objective: f64,
}

impl FlowSolution {
    pub fn flow(&self, sender: ParticipantId, receiver: ParticipantId) -> Flow {
        self.flows.get(&(sender, receiver)).copied().unwrap_or(0.0)
    }
}

// === BACKENDS ===

/// Anything that can maximize a `FlowProgram`
pub trait FlowSolver {
    fn solve(&self, program: &FlowProgram) -> Result<FlowSolution>;
}

/// The bundled pure-Rust LP backend (`good_lp` with microlp)
#[derive(Debug, Clone, Copy, Default)]
pub struct LpSolver;

impl FlowSolver for LpSolver {
    fn solve(&self, program: &FlowProgram) -> Result<FlowSolution> {
        if program.variables.is_empty() {
            return Ok(FlowSolution::default());
        }

        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = program
            .variables
            .iter()
            .map(|v| vars.add(variable().min(0.0).max(v.upper_bound)))
            .collect();

        let mut objective = Expression::with_capacity(handles.len());
        for (handle, v) in handles.iter().zip(&program.variables) {
            objective.add_mul(v.weight, *handle);
        }

        let mut problem = vars.maximise(objective).using(default_solver);
        for constraint in &program.constraints {
            let mut lhs = Expression::with_capacity(constraint.terms.len());
            for &term in &constraint.terms {
                lhs.add_mul(1.0, handles[term]);
            }
            problem = problem.with(lhs.leq(constraint.rhs as f64));
        }

        let solution = problem.solve().map_err(|e| match e {
            ResolutionError::Infeasible => ExchangeError::InfeasibleModel {
                round: program.round,
            },
            other => ExchangeError::SolverUnavailable(other.to_string()),
        })?;

        let mut flows = BTreeMap::new();
        let mut total = 0.0;
        for (handle, v) in handles.iter().zip(&program.variables) {
            let value = solution.value(*handle).max(0.0);
            total += v.weight * value;
            flows.insert(v.key, value);
        }
        Ok(FlowSolution {
            flows,
            objective: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::build_edges;
    use crate::config::ExchangeConfig;
    use crate::geography::LocationGraph;

    fn two_party(buyer_quota: Slots, capacity: Slots) -> BTreeMap<ParticipantId, Participant> {
        [
            Participant::buyer(ParticipantId(1), "Buyer", 'A', buyer_quota, "Canton"),
            Participant::publisher(ParticipantId(2), "Paper", 'B', 0, capacity, "Canton"),
        ]
        .into_iter()
        .map(|p| (p.id(), p))
        .collect()
    }

    #[test]
    fn constraints_only_where_edges_exist() {
        let participants = two_party(5, 4);
        let graph = build_edges(
            &participants,
            &LocationGraph::harbor_district(),
            &ExchangeConfig::default(),
        )
        .unwrap();
        let program = FlowProgram::build(1, &graph, &participants);

        assert_eq!(program.variables.len(), 1);
        assert_eq!(program.constraints.len(), 2);
        assert_eq!(program.rhs("Buyer-1 ads"), Some(5));
        assert_eq!(program.rhs("Paper-2 pubs"), Some(4));
        assert!(program.rhs("Paper-2 ads").is_none(), "no outgoing edges");
        assert!(program.rhs("Buyer-1 pubs").is_none());
    }

    #[test]
    fn solves_to_edge_bound() {
        let participants = two_party(5, 4);
        let graph = build_edges(
            &participants,
            &LocationGraph::harbor_district(),
            &ExchangeConfig::default(),
        )
        .unwrap();
        let program = FlowProgram::build(1, &graph, &participants);
        let solution = LpSolver.solve(&program).unwrap();

        assert!((solution.flow(ParticipantId(1), ParticipantId(2)) - 2.0).abs() < 1e-6);
        assert!((solution.objective - 2.0).abs() < 1e-6);
    }

    #[test]
    fn empty_program_solves_to_nothing() {
        let solution = LpSolver.solve(&FlowProgram::default()).unwrap();
        assert!(solution.flows.is_empty());
        assert_eq!(solution.objective, 0.0);
    }

    #[test]
    fn negative_capacity_is_infeasible() {
        let participants: BTreeMap<_, _> = [
            Participant::buyer(ParticipantId(1), "Debtor", 'A', 0, "Canton")
                .with_opening_balance(-3),
            Participant::publisher(ParticipantId(2), "Paper", 'B', 0, 4, "Canton"),
        ]
        .into_iter()
        .map(|p| (p.id(), p))
        .collect();
        let graph = build_edges(
            &participants,
            &LocationGraph::harbor_district(),
            &ExchangeConfig::default(),
        )
        .unwrap();
        let program = FlowProgram::build(7, &graph, &participants);
        assert_eq!(
            LpSolver.solve(&program),
            Err(ExchangeError::InfeasibleModel { round: 7 })
        );
    }
}
