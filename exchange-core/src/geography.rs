// Market locations and the routes between them

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::error::{ExchangeError, Result};
use crate::types::{Distance, LocationId};

/// Name of the node standing in for participants without a fixed market
pub const UNKNOWN_LOCATION: &str = "N/A";

/// A node in the location graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
}

/// An undirected edge between two locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub a: LocationId,
    pub b: LocationId,
    pub distance: Distance,
    /// Added by `connect_unknown`; only walked when leaving from the unknown node
    #[serde(default)]
    pub hub_link: bool,
}

impl Route {
    /// The endpoint opposite `from`, if `from` is on this route
    pub fn other(&self, from: LocationId) -> Option<LocationId> {
        if self.a == from {
            Some(self.b)
        } else if self.b == from {
            Some(self.a)
        } else {
            None
        }
    }
}

/// Undirected weighted graph of market locations.
///
/// Distances are shortest-path lengths over all routes and are symmetric.
/// The unknown node sits at distance 0 from every location through hub links.
/// A path may start or end on a hub link but never cross the unknown node
/// through one, so the hub cannot collapse distances between real locations.
/// Ordinary routes touching the unknown node are walked like any other.
#[derive(Debug, Clone, Default)]
pub struct LocationGraph {
    locations: SlotMap<LocationId, Location>,
    by_name: HashMap<String, LocationId>,
    routes: Vec<Route>,
    adjacency: HashMap<LocationId, Vec<usize>>,
}

impl LocationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph holding only the unknown-location node
    pub fn with_unknown_node() -> Self {
        let mut graph = Self::new();
        graph.insert_location(UNKNOWN_LOCATION.to_string());
        graph
    }

    /// The waterfront map the exchange was first run on: five neighbourhoods
    /// joined by unit routes, plus the unknown node.
    pub fn harbor_district() -> Self {
        let mut graph = Self::with_unknown_node();
        let [canton, fells_point, harbor_east, fed_hill, dundalk] =
            ["Canton", "Fells Point", "Harbor East", "Fed Hill", "Dundalk"]
                .map(|name| graph.insert_location(name.to_string()));
        for (a, b) in [
            (dundalk, canton),
            (fells_point, canton),
            (fells_point, harbor_east),
            (fed_hill, harbor_east),
        ] {
            graph.push_route(a, b, 1, false);
        }
        graph.connect_unknown();
        graph
    }

    // === Construction ===

    /// Add a named location, returns its ID
    pub fn add_location(&mut self, name: impl Into<String>) -> Result<LocationId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(ExchangeError::DuplicateLocation(name));
        }
        Ok(self.insert_location(name))
    }

    fn insert_location(&mut self, name: String) -> LocationId {
        let id = self.locations.insert_with_key(|id| Location {
            id,
            name: name.clone(),
        });
        self.by_name.insert(name, id);
        id
    }

    /// Add a bidirectional route between two named locations
    pub fn add_route(&mut self, a: &str, b: &str, distance: Distance) -> Result<()> {
        let a = self.require(a)?;
        let b = self.require(b)?;
        self.push_route(a, b, distance, false);
        Ok(())
    }

    /// Join the unknown node to every other location at distance 0.
    /// Creates the unknown node if it is missing. Routes already present are not duplicated.
    pub fn connect_unknown(&mut self) {
        let hub = match self.by_name.get(UNKNOWN_LOCATION) {
            Some(&id) => id,
            None => self.insert_location(UNKNOWN_LOCATION.to_string()),
        };
        let targets: Vec<LocationId> = self
            .locations
            .keys()
            .filter(|&id| id != hub)
            .filter(|&id| !self.neighbours(hub).any(|(n, r)| n == id && r.hub_link))
            .collect();
        for id in targets {
            self.push_route(hub, id, 0, true);
        }
    }

    fn push_route(&mut self, a: LocationId, b: LocationId, distance: Distance, hub_link: bool) {
        let index = self.routes.len();
        self.routes.push(Route {
            a,
            b,
            distance,
            hub_link,
        });
        self.adjacency.entry(a).or_default().push(index);
        if a != b {
            self.adjacency.entry(b).or_default().push(index);
        }
    }

    // === Queries ===

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn id_of(&self, name: &str) -> Option<LocationId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: LocationId) -> Option<&str> {
        self.locations.get(id).map(|l| l.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Location names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.locations.values().map(|l| l.name.as_str())
    }

    fn is_unknown(&self, id: LocationId) -> bool {
        self.by_name.get(UNKNOWN_LOCATION) == Some(&id)
    }

    fn require(&self, name: &str) -> Result<LocationId> {
        self.id_of(name)
            .ok_or_else(|| ExchangeError::UnknownLocation(name.to_string()))
    }

    fn neighbours(&self, id: LocationId) -> impl Iterator<Item = (LocationId, &Route)> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |&i| {
                let route = &self.routes[i];
                route.other(id).map(|n| (n, route))
            })
    }

    /// Shortest distance from `from` to every reachable location (Dijkstra).
    ///
    /// Hub links are walked only as the first step out of the unknown node or
    /// as the last step into it.
    pub fn distances_from(&self, from: &str) -> Result<HashMap<LocationId, Distance>> {
        let source = self.require(from)?;
        let from_hub = self.is_unknown(source);
        let mut dist: HashMap<LocationId, Distance> = HashMap::new();
        let mut ends: HashMap<LocationId, Distance> = HashMap::new();
        let mut heap = BinaryHeap::new();
        dist.insert(source, 0);
        heap.push(Reverse((0, source)));

        while let Some(Reverse((d, node))) = heap.pop() {
            if dist.get(&node).is_some_and(|&best| d > best) {
                continue;
            }
            let at_hub = self.is_unknown(node);
            for (next, route) in self.neighbours(node) {
                let candidate = d.saturating_add(route.distance);
                if route.hub_link && !(from_hub && node == source) {
                    if !at_hub {
                        let end = ends.entry(next).or_insert(candidate);
                        *end = (*end).min(candidate);
                    }
                    continue;
                }
                if dist.get(&next).is_none_or(|&best| candidate < best) {
                    dist.insert(next, candidate);
                    heap.push(Reverse((candidate, next)));
                }
            }
        }
        for (id, d) in ends {
            let best = dist.entry(id).or_insert(d);
            *best = (*best).min(d);
        }
        Ok(dist)
    }

    /// Shortest-path distance between two named locations
    pub fn shortest_distance(&self, a: &str, b: &str) -> Result<Distance> {
        let target = self.require(b)?;
        let dist = self.distances_from(a)?;
        dist.get(&target)
            .copied()
            .ok_or_else(|| ExchangeError::NoRoute {
                from: a.to_string(),
                to: b.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> LocationGraph {
        let mut graph = LocationGraph::new();
        for name in ["A", "B", "C", "D"] {
            graph.add_location(name).unwrap();
        }
        graph.add_route("A", "B", 1).unwrap();
        graph.add_route("B", "C", 2).unwrap();
        graph.add_route("C", "D", 1).unwrap();
        graph.add_route("A", "D", 10).unwrap();
        graph
    }

    #[test]
    fn distance_uses_shortest_path_not_direct_route() {
        let graph = line_graph();
        assert_eq!(graph.shortest_distance("A", "D").unwrap(), 4);
        assert_eq!(graph.shortest_distance("A", "C").unwrap(), 3);
        assert_eq!(graph.shortest_distance("B", "B").unwrap(), 0);
    }

    #[test]
    fn distance_is_symmetric() {
        let graph = line_graph();
        for a in ["A", "B", "C", "D"] {
            for b in ["A", "B", "C", "D"] {
                assert_eq!(
                    graph.shortest_distance(a, b).unwrap(),
                    graph.shortest_distance(b, a).unwrap()
                );
            }
        }
    }

    #[test]
    fn unknown_endpoint_fails() {
        let graph = line_graph();
        assert_eq!(
            graph.shortest_distance("A", "Z"),
            Err(ExchangeError::UnknownLocation("Z".to_string()))
        );
        assert_eq!(
            graph.shortest_distance("Z", "A"),
            Err(ExchangeError::UnknownLocation("Z".to_string()))
        );
    }

    #[test]
    fn disconnected_locations_have_no_route() {
        let mut graph = line_graph();
        graph.add_location("Island").unwrap();
        assert!(matches!(
            graph.shortest_distance("A", "Island"),
            Err(ExchangeError::NoRoute { .. })
        ));
    }

    #[test]
    fn unknown_node_is_zero_from_everywhere() {
        let graph = LocationGraph::harbor_district();
        assert_eq!(graph.len(), 6);
        for name in ["Canton", "Fells Point", "Harbor East", "Fed Hill", "Dundalk"] {
            assert_eq!(graph.shortest_distance(UNKNOWN_LOCATION, name).unwrap(), 0);
        }
        // The hub is not a shortcut between real locations
        assert_eq!(graph.shortest_distance("Dundalk", "Fed Hill").unwrap(), 4);
        assert_eq!(graph.shortest_distance("Canton", "Harbor East").unwrap(), 2);
        assert_eq!(graph.shortest_distance("Fed Hill", UNKNOWN_LOCATION).unwrap(), 0);
    }

    #[test]
    fn ordinary_routes_through_unknown_node_are_walked() {
        let mut graph = LocationGraph::with_unknown_node();
        graph.add_location("A").unwrap();
        graph.add_location("B").unwrap();
        graph.add_route("A", UNKNOWN_LOCATION, 1).unwrap();
        graph.add_route(UNKNOWN_LOCATION, "B", 1).unwrap();
        assert_eq!(graph.shortest_distance("A", "B").unwrap(), 2);
        assert_eq!(graph.shortest_distance("B", "A").unwrap(), 2);
        assert_eq!(graph.shortest_distance("A", UNKNOWN_LOCATION).unwrap(), 1);

        // Hub links bring the unknown node to 0 without shortening A-B
        graph.add_location("C").unwrap();
        graph.connect_unknown();
        assert_eq!(graph.shortest_distance("A", UNKNOWN_LOCATION).unwrap(), 0);
        assert_eq!(graph.shortest_distance("A", "B").unwrap(), 2);
        assert_eq!(graph.shortest_distance(UNKNOWN_LOCATION, "C").unwrap(), 0);
        assert!(matches!(
            graph.shortest_distance("A", "C"),
            Err(ExchangeError::NoRoute { .. })
        ));
    }

    #[test]
    fn only_connect_unknown_adds_hub_links() {
        let graph = LocationGraph::harbor_district();
        let hub = graph.id_of(UNKNOWN_LOCATION).unwrap();
        for route in graph.routes() {
            let touches_hub = route.a == hub || route.b == hub;
            assert_eq!(route.hub_link, touches_hub);
        }
        assert_eq!(graph.routes().iter().filter(|r| r.hub_link).count(), 5);
    }

    #[test]
    fn duplicate_location_rejected() {
        let mut graph = line_graph();
        assert_eq!(
            graph.add_location("A"),
            Err(ExchangeError::DuplicateLocation("A".to_string()))
        );
    }

    #[test]
    fn connect_unknown_is_idempotent() {
        let mut graph = line_graph();
        graph.connect_unknown();
        let routes = graph.routes().len();
        graph.connect_unknown();
        assert_eq!(graph.routes().len(), routes);
    }
}
