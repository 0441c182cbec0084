// Round controller: build edges, formulate, solve, settle balances

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::allocation::{AllocationGraph, build_edges};
use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::geography::LocationGraph;
use crate::history::{EdgeFlow, ParticipantSummary, RoundSnapshot};
use crate::participant::{Participant, ParticipantRecord};
use crate::report::{SolutionTable, model_description};
use crate::solver::{CapacitySide, FlowProgram, FlowSolution, FlowSolver, LpSolver};
use crate::types::{Distance, ParticipantId, Slots, truncate_flow};

/// Where the controller is within the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub enum RoundState {
    /// No candidate edges have been built yet
    Uninitialized,
    /// Edges exist (or are pending a rebuild); the current round is unsolved
    Built,
    /// The last round was solved and settled
    Solved,
}

/// Balance movement of one participant in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct BalanceUpdate {
    pub participant: ParticipantId,
    pub placed: Slots,
    pub received: Slots,
    pub buy_capacity: Slots,
    pub sell_capacity: Slots,
    pub balance_before: Slots,
    pub balance_after: Slots,
}

/// What `advance_round` did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct RoundOutcome {
    pub round: u64,
    pub edges: usize,
    pub total_flow: Slots,
    pub objective: f64,
    pub updates: Vec<BalanceUpdate>,
}

/// The ad exchange: participants, geography and the round state machine.
///
/// Participants live in an arena keyed by their stable id. Candidate edges
/// are rebuilt lazily whenever the participant set or geography changes;
/// the LP is rebuilt from scratch every round.
#[derive(Debug, Clone)]
pub struct Exchange<S: FlowSolver = LpSolver> {
    config: ExchangeConfig,
    locations: LocationGraph,
    participants: BTreeMap<ParticipantId, Participant>,
    edges: AllocationGraph,
    edges_stale: bool,
    program: FlowProgram,
    solution: Option<FlowSolution>,
    state: RoundState,
    round: u64,
    solver: S,
}

impl Exchange<LpSolver> {
    pub fn new(locations: LocationGraph, config: ExchangeConfig) -> Result<Self> {
        Self::with_solver(locations, config, LpSolver)
    }
}

impl<S: FlowSolver> Exchange<S> {
    pub fn with_solver(locations: LocationGraph, config: ExchangeConfig, solver: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            locations,
            participants: BTreeMap::new(),
            edges: AllocationGraph::default(),
            edges_stale: true,
            program: FlowProgram::default(),
            solution: None,
            state: RoundState::Uninitialized,
            round: 0,
            solver,
        })
    }

    // === Accessors ===

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn locations(&self) -> &LocationGraph {
        &self.locations
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Number of rounds completed
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Candidate edges as of the last build
    pub fn edges(&self) -> &AllocationGraph {
        &self.edges
    }

    /// The LP solved in the last round
    pub fn program(&self) -> &FlowProgram {
        &self.program
    }

    /// Resolved flows of the last round, if the current round is solved
    pub fn solution(&self) -> Option<&FlowSolution> {
        match self.state {
            RoundState::Solved => self.solution.as_ref(),
            _ => None,
        }
    }

    pub fn balances(&self) -> Vec<(ParticipantId, Slots)> {
        self.participants
            .values()
            .map(|p| (p.id(), p.balance()))
            .collect()
    }

    // === Topology ===

    fn topology_changed(&mut self) {
        self.edges_stale = true;
        if self.state == RoundState::Solved {
            self.state = RoundState::Built;
        }
        if !self.config.quiet {
            #[cfg(feature = "instrument")]
            tracing::debug!(round = self.round, "topology changed, edges will be rebuilt");
        }
    }

    pub fn add_location(&mut self, name: impl Into<String>) -> Result<()> {
        self.locations.add_location(name)?;
        self.topology_changed();
        Ok(())
    }

    pub fn add_route(&mut self, a: &str, b: &str, distance: Distance) -> Result<()> {
        self.locations.add_route(a, b, distance)?;
        self.topology_changed();
        Ok(())
    }

    pub fn add_participant(&mut self, participant: Participant) -> Result<ParticipantId> {
        if !self.locations.contains(participant.location()) {
            return Err(ExchangeError::UnknownLocation(
                participant.location().to_string(),
            ));
        }
        let id = participant.id();
        if self.participants.contains_key(&id) {
            return Err(ExchangeError::DuplicateParticipant(id));
        }
        self.participants.insert(id, participant);
        self.topology_changed();
        Ok(id)
    }

    pub fn add_record(&mut self, record: ParticipantRecord) -> Result<ParticipantId> {
        let participant = record.into_participant(&self.locations)?;
        self.add_participant(participant)
    }

    /// Add a batch of records. Nothing is added unless every record converts
    /// and no id repeats within the batch or the exchange.
    pub fn add_records(
        &mut self,
        records: impl IntoIterator<Item = ParticipantRecord>,
    ) -> Result<Vec<ParticipantId>> {
        let mut batch: BTreeMap<ParticipantId, Participant> = BTreeMap::new();
        for record in records {
            let participant = record.into_participant(&self.locations)?;
            let id = participant.id();
            if self.participants.contains_key(&id) || batch.contains_key(&id) {
                return Err(ExchangeError::DuplicateParticipant(id));
            }
            batch.insert(id, participant);
        }
        let ids: Vec<ParticipantId> = batch.keys().copied().collect();
        if !ids.is_empty() {
            self.participants.extend(batch);
            self.topology_changed();
        }
        Ok(ids)
    }

    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<Participant> {
        let removed = self
            .participants
            .remove(&id)
            .ok_or(ExchangeError::UnknownParticipant(id))?;
        self.topology_changed();
        Ok(removed)
    }

    /// Change a publisher's per-round capacity. Edge bounds depend on it.
    pub fn set_sell_capacity(&mut self, id: ParticipantId, capacity: Slots) -> Result<()> {
        self.participants
            .get_mut(&id)
            .ok_or(ExchangeError::UnknownParticipant(id))?
            .set_sell_capacity(capacity);
        self.topology_changed();
        Ok(())
    }

    // === Round ===

    /// Build candidate edges now rather than at the next round
    pub fn build(&mut self) -> Result<()> {
        self.edges = build_edges(&self.participants, &self.locations, &self.config)?;
        self.edges_stale = false;
        self.state = RoundState::Built;
        Ok(())
    }

    /// Run one full round: edges, constraints, solve, balance updates.
    ///
    /// Balances change only if every step succeeds.
    pub fn advance_round(&mut self) -> Result<RoundOutcome> {
        if self.edges_stale || self.state == RoundState::Uninitialized {
            self.build()?;
        }
        self.state = RoundState::Built;

        let round = self.round + 1;
        let program = FlowProgram::build(round, &self.edges, &self.participants);
        let solution = match self.solver.solve(&program) {
            Ok(solution) => solution,
            Err(e) => {
                #[cfg(feature = "instrument")]
                tracing::warn!(round = round, error = %e, "solve failed, balances untouched");
                return Err(e);
            }
        };

        let mut placed_by: BTreeMap<ParticipantId, Slots> = BTreeMap::new();
        let mut received_by: BTreeMap<ParticipantId, Slots> = BTreeMap::new();
        for (&(sender, receiver), &value) in &solution.flows {
            let slots = truncate_flow(value, self.config.flow_epsilon);
            *placed_by.entry(sender).or_insert(0) += slots;
            *received_by.entry(receiver).or_insert(0) += slots;

            #[cfg(feature = "instrument")]
            {
                if slots > 0 {
                    let edge = self.edges.get(sender, receiver);
                    tracing::info!(
                        target: instrument::targets::FLOW,
                        round = round,
                        sender = sender.0,
                        receiver = receiver.0,
                        flow = slots,
                        preferred = edge.is_some_and(|e| e.preferred),
                        distance = edge.and_then(|e| e.distance).map(i64::from).unwrap_or(-1),
                    );
                }
            }
        }

        let mut updates = Vec::with_capacity(self.participants.len());
        for participant in self.participants.values_mut() {
            let id = participant.id();
            let placed = placed_by.get(&id).copied().unwrap_or(0);
            let received = received_by.get(&id).copied().unwrap_or(0);
            let buy_capacity = participant.buy_capacity();
            let sell_capacity = participant.sell_capacity();
            let balance_before = participant.balance();

            participant.apply_buy_update(placed);
            participant.apply_sell_update(received);

            let update = BalanceUpdate {
                participant: id,
                placed,
                received,
                buy_capacity,
                sell_capacity,
                balance_before,
                balance_after: participant.balance(),
            };

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: instrument::targets::BALANCE,
                round = round,
                participant = id.0,
                placed = update.placed,
                received = update.received,
                buy_capacity = update.buy_capacity,
                sell_capacity = update.sell_capacity,
                balance_before = update.balance_before,
                balance_after = update.balance_after,
            );

            updates.push(update);
        }

        let total_flow: Slots = placed_by.values().sum();
        let outcome = RoundOutcome {
            round,
            edges: self.edges.len(),
            total_flow,
            objective: solution.objective,
            updates,
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: instrument::targets::ROUND,
            round = round,
            edges = outcome.edges as u64,
            total_flow = outcome.total_flow,
            objective = outcome.objective,
        );

        self.program = program;
        self.solution = Some(solution);
        self.state = RoundState::Solved;
        self.round = round;
        Ok(outcome)
    }

    // === Snapshots & reports ===

    /// Detached copy of the round's topology and resolved flows.
    ///
    /// After a solved round this reuses that round's solution. Otherwise the
    /// pending round is formulated and solved on the side; the controller is
    /// left untouched either way.
    pub fn snapshot(&self) -> Result<RoundSnapshot> {
        if let (RoundState::Solved, Some(solution)) = (self.state, &self.solution) {
            return Ok(self.capture(self.round, &self.edges, &self.program, solution));
        }

        let rebuilt;
        let edges = if self.edges_stale || self.state == RoundState::Uninitialized {
            rebuilt = build_edges(&self.participants, &self.locations, &self.config)?;
            &rebuilt
        } else {
            &self.edges
        };
        let round = self.round + 1;
        let program = FlowProgram::build(round, edges, &self.participants);
        let solution = self.solver.solve(&program)?;
        Ok(self.capture(round, edges, &program, &solution))
    }

    fn capture(
        &self,
        round: u64,
        edges: &AllocationGraph,
        program: &FlowProgram,
        solution: &FlowSolution,
    ) -> RoundSnapshot {
        let epsilon = self.config.flow_epsilon;
        let edges: Vec<EdgeFlow> = edges
            .edges()
            .map(|e| {
                let flow = solution.flow(e.sender, e.receiver);
                EdgeFlow {
                    sender: e.sender,
                    receiver: e.receiver,
                    weight: e.weight,
                    upper_bound: e.upper_bound,
                    preferred: e.preferred,
                    distance: e.distance,
                    flow,
                    slots: truncate_flow(flow, epsilon),
                }
            })
            .collect();

        let participants = self
            .participants
            .values()
            .map(|p| ParticipantSummary {
                id: p.id(),
                name: p.name().to_string(),
                category: p.category().to_string(),
                location: p.location().to_string(),
                publisher: p.is_publisher(),
                balance: p.balance(),
                placement_limit: program
                    .constraint_for(p.id(), CapacitySide::Placement)
                    .map(|c| c.rhs),
                publication_limit: program
                    .constraint_for(p.id(), CapacitySide::Publication)
                    .map(|c| c.rhs),
                preferred: p.preferred().iter().copied().collect(),
            })
            .collect();

        RoundSnapshot {
            round,
            participants,
            edges,
            objective: solution.objective,
        }
    }

    pub fn solution_table(&self) -> Result<SolutionTable> {
        Ok(self.snapshot()?.solution_table())
    }

    pub fn model_description(&self) -> String {
        model_description(&self.config)
    }
}
