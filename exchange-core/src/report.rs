// Read-only tabular views for the presentation layer

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::ExchangeConfig;
use crate::history::RoundSnapshot;
use crate::types::{ParticipantId, Slots};

/// Sender-by-receiver matrix of whole slots with row/column totals and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct SolutionTable {
    pub ids: Vec<ParticipantId>,
    pub names: Vec<String>,
    /// `cells[sender][receiver]`, `None` where no edge exists
    pub cells: Vec<Vec<Option<Slots>>>,
    /// Slots placed by each sender
    pub placed: Vec<Slots>,
    /// Placement constraint per sender, `None` without outgoing edges
    pub placement_limits: Vec<Option<Slots>>,
    /// Slots published by each receiver
    pub published: Vec<Slots>,
    /// Publication constraint per receiver, 0 without incoming edges
    pub publication_limits: Vec<Slots>,
    pub total_placed: Slots,
    pub total_placement_limit: Slots,
    pub total_publication_limit: Slots,
}

impl SolutionTable {
    /// Render as string rows: header, one row per sender, then the published
    /// and constraint rows. Missing edges show as `-`.
    pub fn rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.ids.len() + 3);

        let mut header = vec![String::new()];
        header.extend(self.names.iter().cloned());
        header.push("ads placed".into());
        header.push("constraint".into());
        rows.push(header);

        for (i, name) in self.names.iter().enumerate() {
            let mut row = vec![name.clone()];
            row.extend(self.cells[i].iter().map(|cell| match cell {
                Some(slots) => slots.to_string(),
                None => "-".into(),
            }));
            row.push(self.placed[i].to_string());
            row.push(self.placement_limits[i].unwrap_or(0).to_string());
            rows.push(row);
        }

        let mut published = vec!["ads published".to_string()];
        published.extend(self.published.iter().map(|s| s.to_string()));
        published.push(self.total_placed.to_string());
        published.push(self.total_placement_limit.to_string());
        rows.push(published);

        let mut limits = vec!["constraint".to_string()];
        limits.extend(self.publication_limits.iter().map(|s| s.to_string()));
        limits.push(self.total_publication_limit.to_string());
        limits.push(String::new());
        rows.push(limits);

        rows
    }
}

/// How much of one participant's flow went to each preferred counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct PreferredFlows {
    pub participant: ParticipantId,
    /// (counterpart, slots) in ascending counterpart order
    pub preferred: Vec<(ParticipantId, Slots)>,
    pub other: Slots,
}

impl RoundSnapshot {
    pub fn solution_table(&self) -> SolutionTable {
        let n = self.participants.len();
        let ids: Vec<ParticipantId> = self.participants.iter().map(|p| p.id).collect();
        let mut cells = vec![vec![None; n]; n];
        let mut placed = vec![0; n];
        let mut published = vec![0; n];

        for edge in &self.edges {
            let (Ok(row), Ok(col)) = (ids.binary_search(&edge.sender), ids.binary_search(&edge.receiver))
            else {
                continue;
            };
            cells[row][col] = Some(edge.slots);
            placed[row] += edge.slots;
            published[col] += edge.slots;
        }

        let placement_limits: Vec<Option<Slots>> =
            self.participants.iter().map(|p| p.placement_limit).collect();
        let publication_limits: Vec<Slots> = self
            .participants
            .iter()
            .map(|p| p.publication_limit.unwrap_or(0))
            .collect();

        SolutionTable {
            names: self.participants.iter().map(|p| p.name.clone()).collect(),
            total_placed: placed.iter().sum(),
            total_placement_limit: placement_limits.iter().flatten().sum(),
            total_publication_limit: publication_limits.iter().sum(),
            ids,
            cells,
            placed,
            placement_limits,
            published,
            publication_limits,
        }
    }

    /// Per participant: slots sent to each preferred counterpart, and the rest
    pub fn preferred_flow_details(&self) -> Vec<PreferredFlows> {
        self.participants
            .iter()
            .map(|p| {
                let preferred = p
                    .preferred
                    .iter()
                    .map(|&to| (to, self.edge(p.id, to).map(|e| e.slots).unwrap_or(0)))
                    .collect();
                let other = self
                    .edges
                    .iter()
                    .filter(|e| e.sender == p.id && !e.preferred)
                    .map(|e| e.slots)
                    .sum();
                PreferredFlows {
                    participant: p.id,
                    preferred,
                    other,
                }
            })
            .collect()
    }
}

/// Plain-language statement of the allocation policy
pub fn model_description(config: &ExchangeConfig) -> String {
    format!(
        "Preferred edges are given weight {}, other edges are weighted by the inverse of one plus \
         the distance between the advertiser and publisher. Each advertiser may run a negative \
         balance no larger than the advertisements it earns by publishing that day. Each \
         publisher accepts no more than 1/{} of its total ads from any one advertiser.",
        config.preferred_weight, config.edge_cap_divisor
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{EdgeFlow, ParticipantSummary};

    fn summary(id: u32, placement: Option<Slots>, publication: Option<Slots>, preferred: Vec<u32>) -> ParticipantSummary {
        ParticipantSummary {
            id: ParticipantId(id),
            name: format!("p{id}"),
            category: "A".into(),
            location: "Canton".into(),
            publisher: publication.is_some(),
            balance: 0,
            placement_limit: placement,
            publication_limit: publication,
            preferred: preferred.into_iter().map(ParticipantId).collect(),
        }
    }

    fn flow(sender: u32, receiver: u32, preferred: bool, slots: Slots) -> EdgeFlow {
        EdgeFlow {
            sender: ParticipantId(sender),
            receiver: ParticipantId(receiver),
            weight: if preferred { 2.0 } else { 1.0 },
            upper_bound: 5,
            preferred,
            distance: if preferred { None } else { Some(0) },
            flow: slots as f64,
            slots,
        }
    }

    fn sample() -> RoundSnapshot {
        RoundSnapshot {
            round: 1,
            participants: vec![
                summary(1, Some(5), None, vec![3]),
                summary(2, Some(2), Some(4), vec![]),
                summary(3, None, Some(6), vec![]),
            ],
            edges: vec![flow(1, 2, false, 2), flow(1, 3, true, 3), flow(2, 3, false, 1)],
            objective: 9.0,
        }
    }

    #[test]
    fn table_sums_rows_and_columns() {
        let table = sample().solution_table();
        assert_eq!(table.cells[0], vec![None, Some(2), Some(3)]);
        assert_eq!(table.placed, vec![5, 1, 0]);
        assert_eq!(table.published, vec![0, 2, 4]);
        assert_eq!(table.total_placed, 6);
        assert_eq!(table.total_placement_limit, 7);
        assert_eq!(table.publication_limits, vec![0, 4, 6]);
        assert_eq!(table.total_publication_limit, 10);
    }

    #[test]
    fn rendered_rows_mark_missing_edges() {
        let rows = sample().solution_table().rows();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0][1], "p1");
        assert_eq!(rows[1], vec!["p1", "-", "2", "3", "5", "5"]);
        assert_eq!(rows[4][0], "ads published");
        assert_eq!(rows[5][0], "constraint");
    }

    #[test]
    fn preferred_details_split_flow() {
        let details = sample().preferred_flow_details();
        assert_eq!(details[0].preferred, vec![(ParticipantId(3), 3)]);
        assert_eq!(details[0].other, 2);
        assert_eq!(details[1].other, 1);
        assert!(details[2].preferred.is_empty());
    }

    #[test]
    fn description_names_policy_constants() {
        let text = model_description(&ExchangeConfig::default());
        assert!(text.contains("weight 2"));
        assert!(text.contains("1/2"));
    }
}
