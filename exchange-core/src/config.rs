// Allocation policy knobs

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::{ExchangeError, Result};
use crate::types::Slots;

/// Policy constants for edge weights, edge caps and flow truncation.
///
/// `Default` is the historical policy: preferred edges weigh 2.0 and no
/// sender may take more than half of any publisher's slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Objective weight of an edge whose sender prefers the receiver
    pub preferred_weight: f64,
    /// Edge upper bound is `sell_capacity / edge_cap_divisor`
    pub edge_cap_divisor: Slots,
    /// Added to solver values before truncating to whole slots
    pub flow_epsilon: f64,
    /// Suppress per-round debug logging
    pub quiet: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            preferred_weight: 2.0,
            edge_cap_divisor: 2,
            flow_epsilon: 1e-7,
            quiet: false,
        }
    }
}

impl ExchangeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExchangeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.preferred_weight.is_finite() && self.preferred_weight > 0.0) {
            return Err(ExchangeError::InvalidConfig(format!(
                "preferred_weight must be positive, got {}",
                self.preferred_weight
            )));
        }
        if self.edge_cap_divisor <= 0 {
            return Err(ExchangeError::InvalidConfig(format!(
                "edge_cap_divisor must be positive, got {}",
                self.edge_cap_divisor
            )));
        }
        if !(0.0..0.5).contains(&self.flow_epsilon) {
            return Err(ExchangeError::InvalidConfig(format!(
                "flow_epsilon must lie in [0, 0.5), got {}",
                self.flow_epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ExchangeConfig::from_json(r#"{ "quiet": true }"#).unwrap();
        assert!(config.quiet);
        assert_eq!(config.preferred_weight, 2.0);
        assert_eq!(config.edge_cap_divisor, 2);
    }

    #[test]
    fn rejects_zero_divisor() {
        let err = ExchangeConfig::from_json(r#"{ "edge_cap_divisor": 0 }"#).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(ExchangeConfig::from_json("{ not json").is_err());
    }
}
