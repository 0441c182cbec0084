// Seeded random markets over the harbor district

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::exchange::Exchange;
use crate::geography::LocationGraph;
use crate::participant::Participant;
use crate::types::{ParticipantId, Slots};

/// Knobs for `random_market`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default)]
pub struct MarketShape {
    pub buyers: u32,
    pub publishers: u32,
    /// Business categories to draw from, one char each
    pub categories: String,
    pub max_quota: Slots,
    /// Upper bound on seller volume; sell capacity is twice the volume
    pub max_seller_volume: Slots,
    /// Chance that a participant prefers any given publisher
    pub preference_rate: f64,
    /// Chance that a publisher excludes any given participant
    pub exclusion_rate: f64,
}

impl Default for MarketShape {
    fn default() -> Self {
        Self {
            buyers: 6,
            publishers: 4,
            categories: "RFNS".into(),
            max_quota: 6,
            max_seller_volume: 4,
            preference_rate: 0.2,
            exclusion_rate: 0.1,
        }
    }
}

impl MarketShape {
    /// Rates must be finite; finite values outside `[0, 1]` are clamped when drawing.
    pub fn validate(&self) -> Result<()> {
        for (field, rate) in [
            ("preference_rate", self.preference_rate),
            ("exclusion_rate", self.exclusion_rate),
        ] {
            if !rate.is_finite() {
                return Err(ExchangeError::InvalidConfig(format!(
                    "{field} must be finite, got {rate}"
                )));
            }
        }
        if self.publishers.checked_add(self.buyers).is_none() {
            return Err(ExchangeError::InvalidConfig(
                "too many participants requested".into(),
            ));
        }
        Ok(())
    }
}

/// Build an exchange over `LocationGraph::harbor_district` populated from `shape`.
///
/// Ids run from 1: publishers first, then buyers. The same seed always
/// yields the same market.
pub fn random_market(seed: u64, shape: &MarketShape, config: ExchangeConfig) -> Result<Exchange> {
    shape.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let locations = LocationGraph::harbor_district();
    let names: Vec<String> = locations.names().map(str::to_string).collect();
    let categories: Vec<char> = match shape.categories.chars().collect::<Vec<_>>() {
        c if c.is_empty() => vec!['Z'],
        c => c,
    };
    let mut exchange = Exchange::new(locations, config)?;

    let publisher_ids: Vec<ParticipantId> = (1..=shape.publishers).map(ParticipantId).collect();
    let total = shape.publishers + shape.buyers;

    for raw in 1..=total {
        let id = ParticipantId(raw);
        let category = *categories.choose(&mut rng).unwrap_or(&'Z');
        let location = names.choose(&mut rng).cloned().unwrap_or_default();
        let quota = rng.random_range(0..=shape.max_quota.max(0));
        let preferred: Vec<ParticipantId> = publisher_ids
            .iter()
            .copied()
            .filter(|&p| p != id && rng.random_bool(shape.preference_rate.clamp(0.0, 1.0)))
            .collect();

        let participant = if raw <= shape.publishers {
            let volume = rng.random_range(1..=shape.max_seller_volume.max(1));
            let excluded: Vec<ParticipantId> = (1..=total)
                .map(ParticipantId)
                .filter(|&p| p != id && rng.random_bool(shape.exclusion_rate.clamp(0.0, 1.0)))
                .collect();
            Participant::publisher(id, format!("Publisher {raw}"), category, quota, volume * 2, location)
                .with_excluded(excluded)
        } else {
            Participant::buyer(id, format!("Advertiser {raw}"), category, quota, location)
        };
        exchange.add_participant(participant.with_preferred(preferred))?;
    }

    Ok(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_market() {
        let shape = MarketShape::default();
        let a = random_market(7, &shape, ExchangeConfig::default()).unwrap();
        let b = random_market(7, &shape, ExchangeConfig::default()).unwrap();
        let a: Vec<_> = a.participants().cloned().collect();
        let b: Vec<_> = b.participants().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_rates_rejected() {
        for shape in [
            MarketShape {
                preference_rate: f64::NAN,
                ..MarketShape::default()
            },
            MarketShape {
                exclusion_rate: f64::INFINITY,
                ..MarketShape::default()
            },
        ] {
            assert!(matches!(
                random_market(3, &shape, ExchangeConfig::default()),
                Err(ExchangeError::InvalidConfig(_))
            ));
        }

        let loud = MarketShape {
            preference_rate: 7.5,
            exclusion_rate: -1.0,
            ..MarketShape::default()
        };
        assert!(random_market(3, &loud, ExchangeConfig::default()).is_ok());
    }

    #[test]
    fn publishers_come_first() {
        let shape = MarketShape {
            buyers: 3,
            publishers: 2,
            ..MarketShape::default()
        };
        let exchange = random_market(1, &shape, ExchangeConfig::default()).unwrap();
        assert_eq!(exchange.len(), 5);
        let roles: Vec<bool> = exchange.participants().map(Participant::is_publisher).collect();
        assert_eq!(roles, vec![true, true, false, false, false]);
    }
}
