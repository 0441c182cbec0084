use wasm_bindgen::prelude::*;

pub mod allocation;
pub mod config;
pub mod error;
pub mod exchange;
pub mod geography;
pub mod history;
pub mod participant;
pub mod report;
pub mod scenario;
pub mod solver;
pub mod types;

#[cfg(feature = "instrument")]
pub use instrument;

pub use allocation::{AllocationGraph, CandidateEdge, build_edges, distance_weight};
pub use config::ExchangeConfig;
pub use error::ExchangeError;
pub use exchange::{BalanceUpdate, Exchange, RoundOutcome, RoundState};
pub use geography::{LocationGraph, UNKNOWN_LOCATION};
pub use history::{EdgeFlow, History, ParticipantSummary, RoundSnapshot};
pub use participant::{Participant, ParticipantRecord, Role, parse_id_list};
pub use report::{PreferredFlows, SolutionTable, model_description};
pub use scenario::{MarketShape, random_market};
pub use solver::{CapacitySide, FlowProgram, FlowSolution, FlowSolver, LpSolver};
pub use types::{Distance, Flow, LocationId, ParticipantId, Slots};

// ============================================================================
// WASM API - Exchange
// ============================================================================

#[wasm_bindgen]
pub struct AdExchangeSim {
    exchange: Exchange,
    history: History,
}

fn parse_config(config_json: &str) -> Result<ExchangeConfig, JsError> {
    if config_json.trim().is_empty() {
        return Ok(ExchangeConfig::default());
    }
    Ok(ExchangeConfig::from_json(config_json)?)
}

#[wasm_bindgen]
impl AdExchangeSim {
    /// An exchange with only the unknown location. Empty config means defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<AdExchangeSim, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        Ok(Self {
            exchange: Exchange::new(LocationGraph::with_unknown_node(), parse_config(config_json)?)?,
            history: History::new(),
        })
    }

    /// An empty exchange over the harbor district map
    #[wasm_bindgen]
    pub fn with_harbor_district(config_json: &str) -> Result<AdExchangeSim, JsError> {
        console_error_panic_hook::set_once();

        Ok(Self {
            exchange: Exchange::new(LocationGraph::harbor_district(), parse_config(config_json)?)?,
            history: History::new(),
        })
    }

    /// A seeded random market over the harbor district map
    #[wasm_bindgen]
    pub fn with_random_market(seed: u64, shape: MarketShape) -> Result<AdExchangeSim, JsError> {
        console_error_panic_hook::set_once();

        Ok(Self {
            exchange: random_market(seed, &shape, ExchangeConfig::default())?,
            history: History::new(),
        })
    }

    #[wasm_bindgen]
    pub fn add_location(&mut self, name: &str) -> Result<(), JsError> {
        Ok(self.exchange.add_location(name)?)
    }

    #[wasm_bindgen]
    pub fn add_route(&mut self, a: &str, b: &str, distance: u32) -> Result<(), JsError> {
        Ok(self.exchange.add_route(a, b, distance)?)
    }

    /// Add one participant from a `ParticipantRecord` object
    #[wasm_bindgen]
    pub fn add_participant(&mut self, record: JsValue) -> Result<u32, JsError> {
        let record: ParticipantRecord = serde_wasm_bindgen::from_value(record)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(self.exchange.add_record(record)?.0)
    }

    /// Add participants from a JSON array of records, all or none
    #[wasm_bindgen]
    pub fn add_participants_json(&mut self, records_json: &str) -> Result<u32, JsError> {
        let records: Vec<ParticipantRecord> = serde_json::from_str(records_json)?;
        Ok(self.exchange.add_records(records)?.len() as u32)
    }

    /// Solve and settle one round, then record it in the history
    #[wasm_bindgen]
    pub fn advance_round(&mut self) -> Result<RoundOutcome, JsError> {
        let outcome = self.exchange.advance_round()?;
        self.history.save(&self.exchange)?;
        Ok(outcome)
    }

    #[wasm_bindgen]
    pub fn get_round(&self) -> u64 {
        self.exchange.round()
    }

    #[wasm_bindgen]
    pub fn get_snapshot(&self) -> Result<RoundSnapshot, JsError> {
        Ok(self.exchange.snapshot()?)
    }

    #[wasm_bindgen]
    pub fn get_solution_table(&self) -> Result<SolutionTable, JsError> {
        Ok(self.exchange.solution_table()?)
    }

    #[wasm_bindgen]
    pub fn get_total_flow_series(&self) -> Vec<i64> {
        self.history.total_flow_series().collect()
    }

    /// Rows of `[preferred, distance 0, distance 1, ...]` per round
    #[wasm_bindgen]
    pub fn get_detailed_flow_series(&self) -> Result<JsValue, JsError> {
        serde_wasm_bindgen::to_value(&self.history.detailed_flow_series())
            .map_err(|e| JsError::new(&e.to_string()))
    }

    #[wasm_bindgen]
    pub fn get_history_json(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string(&self.history)?)
    }

    #[wasm_bindgen]
    pub fn model_description(&self) -> String {
        self.exchange.model_description()
    }
}
