// Market participants: every participant places ads, publishers also carry them

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::{ExchangeError, Result};
use crate::geography::LocationGraph;
use crate::types::{ParticipantId, Slots, half_round_up};

// === ROLE ===

/// What a participant may do beyond placing ads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Places ads only; never receives any
    Buyer,
    /// Places ads and publishes up to `sell_capacity` ads from others per round
    Publisher {
        sell_capacity: Slots,
        excluded: BTreeSet<ParticipantId>,
    },
}

// === PARTICIPANT ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    id: ParticipantId,
    name: String,
    category: char,
    base_quota: Slots,
    balance: Slots,
    location: String,
    preferred: BTreeSet<ParticipantId>,
    role: Role,
}

impl Participant {
    /// A participant that only places ads
    pub fn buyer(
        id: ParticipantId,
        name: impl Into<String>,
        category: char,
        base_quota: Slots,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            base_quota,
            balance: 0,
            location: location.into(),
            preferred: BTreeSet::new(),
            role: Role::Buyer,
        }
    }

    /// A participant that places ads and publishes up to `sell_capacity` per round
    pub fn publisher(
        id: ParticipantId,
        name: impl Into<String>,
        category: char,
        base_quota: Slots,
        sell_capacity: Slots,
        location: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Publisher {
                sell_capacity: sell_capacity.max(0),
                excluded: BTreeSet::new(),
            },
            ..Self::buyer(id, name, category, base_quota, location)
        }
    }

    pub fn with_preferred(mut self, ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        self.preferred.extend(ids);
        self
    }

    /// Exclusions only mean something for publishers; buyers ignore them
    pub fn with_excluded(mut self, ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        if let Role::Publisher { excluded, .. } = &mut self.role {
            excluded.extend(ids);
        }
        self
    }

    /// Balance carried in from before the first round
    pub fn with_opening_balance(mut self, balance: Slots) -> Self {
        self.balance = balance;
        self
    }

    // === Accessors ===

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> char {
        self.category
    }

    pub fn base_quota(&self) -> Slots {
        self.base_quota
    }

    pub fn balance(&self) -> Slots {
        self.balance
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn preferred(&self) -> &BTreeSet<ParticipantId> {
        &self.preferred
    }

    pub fn is_publisher(&self) -> bool {
        matches!(self.role, Role::Publisher { .. })
    }

    // === Capabilities ===

    /// Whether this participant will publish ads from `sender`
    pub fn accepts(&self, sender: &Participant) -> bool {
        match &self.role {
            Role::Buyer => false,
            Role::Publisher { excluded, .. } => {
                !excluded.contains(&sender.id) && sender.category != self.category
            }
        }
    }

    pub fn prefers(&self, counterpart: &Participant) -> bool {
        self.preferred.contains(&counterpart.id)
    }

    /// Most ads this participant may place this round.
    /// Publishers earn half their publishing capacity as extra buying power.
    pub fn buy_capacity(&self) -> Slots {
        let own = self.base_quota + self.balance;
        match &self.role {
            Role::Buyer => own,
            Role::Publisher { sell_capacity, .. } => own + sell_capacity / 2,
        }
    }

    /// Most ads this participant may publish this round
    pub fn sell_capacity(&self) -> Slots {
        match &self.role {
            Role::Buyer => 0,
            Role::Publisher { sell_capacity, .. } => *sell_capacity,
        }
    }

    // === Round updates (exchange only) ===

    /// Placing fewer ads than the quota accrues credit, more accrues debt
    pub(crate) fn apply_buy_update(&mut self, placed: Slots) {
        self.balance += self.base_quota - placed;
    }

    /// Publishers earn one credit per two ads published, rounded up
    pub(crate) fn apply_sell_update(&mut self, received: Slots) {
        if let Role::Publisher { .. } = self.role {
            self.balance += half_round_up(received);
        }
    }

    pub(crate) fn set_sell_capacity(&mut self, capacity: Slots) {
        if let Role::Publisher { sell_capacity, .. } = &mut self.role {
            *sell_capacity = capacity.max(0);
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |set: &BTreeSet<ParticipantId>| {
            set.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "{}, {}, {}, {}, {} ads, {} ads/day, prefers publishers [{}]",
            self.id,
            self.name,
            self.category,
            self.location,
            self.balance,
            self.base_quota,
            ids(&self.preferred)
        )?;
        if let Role::Publisher {
            sell_capacity,
            excluded,
        } = &self.role
        {
            write!(
                f,
                ", {} receipts/day, excludes advertisers [{}]",
                sell_capacity,
                ids(excluded)
            )?;
        }
        Ok(())
    }
}

// === INPUT RECORDS ===

/// One row of participant input, as produced by an external tabular loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ParticipantRecord {
    pub id: u32,
    pub name: String,
    pub category: String,
    /// Ads published per day; present only for publishers
    #[serde(default)]
    pub seller_volume: Option<Slots>,
    /// Ad credits bought from the bank, the per-round quota
    #[serde(default)]
    pub purchased_credit: Option<Slots>,
    #[serde(default)]
    pub preferred: Vec<u32>,
    pub location: String,
    #[serde(default)]
    pub excluded: Vec<u32>,
}

impl ParticipantRecord {
    /// Validate the record against the location graph and build the participant.
    ///
    /// Each published slot is offered twice, so sell capacity is twice the
    /// seller volume.
    pub fn into_participant(self, locations: &LocationGraph) -> Result<Participant> {
        if !locations.contains(&self.location) {
            return Err(ExchangeError::UnknownLocation(self.location));
        }
        let mut chars = self.category.trim().chars();
        let category = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(ExchangeError::InvalidRecord {
                    id: self.id,
                    reason: format!("category must be one character, got '{}'", self.category),
                });
            }
        };
        let quota = self.purchased_credit.unwrap_or(0);
        if quota < 0 {
            return Err(ExchangeError::InvalidRecord {
                id: self.id,
                reason: format!("purchased credit must be non-negative, got {quota}"),
            });
        }
        let id = ParticipantId(self.id);
        let preferred = self.preferred.into_iter().map(ParticipantId);

        let participant = match self.seller_volume {
            Some(volume) if volume < 0 => {
                return Err(ExchangeError::InvalidRecord {
                    id: self.id,
                    reason: format!("seller volume must be non-negative, got {volume}"),
                });
            }
            Some(volume) => {
                Participant::publisher(id, self.name, category, quota, volume * 2, self.location)
                    .with_excluded(self.excluded.into_iter().map(ParticipantId))
            }
            None => Participant::buyer(id, self.name, category, quota, self.location),
        };
        Ok(participant.with_preferred(preferred))
    }
}

/// Parse a comma-separated id list such as `"3, 7,12"`. Blank input is empty.
pub fn parse_id_list(text: &str) -> std::result::Result<Vec<u32>, std::num::ParseIntError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buyer(id: u32, category: char) -> Participant {
        Participant::buyer(ParticipantId(id), format!("buyer{id}"), category, 5, "Canton")
    }

    fn publisher(id: u32, category: char, capacity: Slots) -> Participant {
        Participant::publisher(
            ParticipantId(id),
            format!("pub{id}"),
            category,
            0,
            capacity,
            "Canton",
        )
    }

    #[test]
    fn buyers_never_accept() {
        let b = buyer(1, 'A');
        let other = buyer(2, 'B');
        assert!(!b.accepts(&other));
        assert_eq!(b.sell_capacity(), 0);
    }

    #[test]
    fn publisher_rejects_excluded_and_same_category() {
        let p = publisher(1, 'A', 4).with_excluded([ParticipantId(3)]);
        assert!(p.accepts(&buyer(2, 'B')));
        assert!(!p.accepts(&buyer(3, 'B')), "excluded sender");
        assert!(!p.accepts(&buyer(4, 'A')), "same category");
    }

    #[test]
    fn buyer_ignores_exclusions() {
        let b = buyer(1, 'A').with_excluded([ParticipantId(2)]);
        assert_eq!(b.role(), &Role::Buyer);
    }

    #[test]
    fn publisher_buy_capacity_includes_half_sell_capacity() {
        let p = publisher(1, 'A', 4);
        assert_eq!(p.buy_capacity(), 2);
        let p = Participant::publisher(ParticipantId(1), "p", 'A', 3, 7, "Canton");
        assert_eq!(p.buy_capacity(), 3 + 3);
        assert_eq!(buyer(2, 'B').buy_capacity(), 5);
    }

    #[test]
    fn buy_update_then_sell_update() {
        let mut p = publisher(1, 'A', 4);
        p.apply_buy_update(0);
        p.apply_sell_update(3);
        assert_eq!(p.balance(), 2);

        let mut b = buyer(2, 'B');
        b.apply_buy_update(7);
        b.apply_sell_update(10);
        assert_eq!(b.balance(), -2, "sell update is a no-op for buyers");
    }

    #[test]
    fn prefers_by_id() {
        let b = buyer(1, 'A').with_preferred([ParticipantId(9)]);
        assert!(b.prefers(&publisher(9, 'B', 2)));
        assert!(!b.prefers(&publisher(8, 'B', 2)));
    }

    #[test]
    fn record_with_seller_volume_becomes_publisher() {
        let graph = LocationGraph::harbor_district();
        let record = ParticipantRecord {
            id: 4,
            name: "Harbor Times".into(),
            category: "N".into(),
            seller_volume: Some(3),
            purchased_credit: Some(2),
            preferred: vec![1, 2],
            location: "Fells Point".into(),
            excluded: vec![7],
        };
        let p = record.into_participant(&graph).unwrap();
        assert!(p.is_publisher());
        assert_eq!(p.sell_capacity(), 6);
        assert_eq!(p.base_quota(), 2);
        assert!(p.preferred().contains(&ParticipantId(2)));
        assert!(!p.accepts(&buyer(7, 'B')));
    }

    #[test]
    fn record_without_seller_volume_is_buyer() {
        let graph = LocationGraph::harbor_district();
        let record = ParticipantRecord {
            id: 1,
            name: "Crab Shack".into(),
            category: "R".into(),
            seller_volume: None,
            purchased_credit: None,
            preferred: vec![],
            location: "N/A".into(),
            excluded: vec![3],
        };
        let p = record.into_participant(&graph).unwrap();
        assert!(!p.is_publisher());
        assert_eq!(p.base_quota(), 0);
    }

    #[test]
    fn record_with_unknown_location_fails() {
        let graph = LocationGraph::harbor_district();
        let record = ParticipantRecord {
            id: 1,
            name: "Lost".into(),
            category: "R".into(),
            seller_volume: None,
            purchased_credit: Some(1),
            preferred: vec![],
            location: "Atlantis".into(),
            excluded: vec![],
        };
        assert_eq!(
            record.into_participant(&graph),
            Err(ExchangeError::UnknownLocation("Atlantis".into()))
        );
    }

    #[test]
    fn record_with_long_category_fails() {
        let graph = LocationGraph::harbor_district();
        let record = ParticipantRecord {
            id: 1,
            name: "Odd".into(),
            category: "RX".into(),
            seller_volume: None,
            purchased_credit: Some(1),
            preferred: vec![],
            location: "Canton".into(),
            excluded: vec![],
        };
        assert!(matches!(
            record.into_participant(&graph),
            Err(ExchangeError::InvalidRecord { id: 1, .. })
        ));
    }

    #[test]
    fn id_lists_parse() {
        assert_eq!(parse_id_list("3, 7,12").unwrap(), vec![3, 7, 12]);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(parse_id_list("1,x").is_err());
    }

    #[test]
    fn display_lists_publisher_terms() {
        let p = publisher(1, 'A', 4).with_excluded([ParticipantId(2)]);
        let text = p.to_string();
        assert!(text.contains("4 receipts/day"));
        assert!(text.contains("excludes advertisers [2]"));
    }
}
