// src/map.rs
//
// Lanelet map: the smallest drivable primitives and the graph between them.
//
// The map is read-only input. It answers the narrow set of queries the
// decision loop needs:
//   - which lanelets contain a position / a vehicle state
//   - successor / predecessor chains up to a lookahead distance
//   - shortest route between lanelets (successor + lane-change edges)

use crate::error::TopologyError;
use crate::geometry::{polygon_contains, polyline_length, Point};
use crate::types::LaneletId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::debug;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lanelet {
    pub id: LaneletId,
    /// Left boundary in driving direction
    pub left_bound: Vec<Point>,
    /// Right boundary in driving direction, same vertex count as the left one
    pub right_bound: Vec<Point>,
    #[serde(default)]
    pub predecessors: Vec<LaneletId>,
    #[serde(default)]
    pub successors: Vec<LaneletId>,
    #[serde(default)]
    pub adj_left: Option<LaneletId>,
    #[serde(default = "default_true")]
    pub adj_left_same_direction: bool,
    #[serde(default)]
    pub adj_right: Option<LaneletId>,
    #[serde(default = "default_true")]
    pub adj_right_same_direction: bool,
    /// Posted limit (m/s)
    #[serde(default)]
    pub speed_limit: Option<f64>,
}

impl Lanelet {
    pub fn center_line(&self) -> Vec<Point> {
        self.left_bound
            .iter()
            .zip(&self.right_bound)
            .map(|(l, r)| l.midpoint(*r))
            .collect()
    }

    pub fn length(&self) -> f64 {
        polyline_length(&self.center_line())
    }

    /// Left bound forward, right bound backward.
    pub fn polygon(&self) -> Vec<Point> {
        let mut polygon = self.left_bound.clone();
        polygon.extend(self.right_bound.iter().rev());
        polygon
    }

    pub fn contains(&self, p: Point) -> bool {
        polygon_contains(&self.polygon(), p)
    }

    /// Driving direction of the centre-line segment closest to `p`.
    pub fn direction_near(&self, p: Point) -> Point {
        let center = self.center_line();
        let segment = center
            .windows(2)
            .min_by(|a, b| {
                let da = a[0].midpoint(a[1]).distance(p);
                let db = b[0].midpoint(b[1]).distance(p);
                da.total_cmp(&db)
            })
            .map(|w| w[1].sub(w[0]))
            .unwrap_or(Point::new(1.0, 0.0));
        segment.scale(1.0 / segment.norm().max(1e-12))
    }

    fn validate(&self) -> Result<(), TopologyError> {
        if self.left_bound.len() < 2 || self.right_bound.len() < 2 {
            return Err(TopologyError::InvalidLanelet {
                id: self.id,
                reason: "bounds need at least two vertices".to_string(),
            });
        }
        if self.left_bound.len() != self.right_bound.len() {
            return Err(TopologyError::InvalidLanelet {
                id: self.id,
                reason: format!(
                    "left bound has {} vertices, right bound {}",
                    self.left_bound.len(),
                    self.right_bound.len()
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Lanelet>", into = "Vec<Lanelet>")]
pub struct LaneletMap {
    lanelets: BTreeMap<LaneletId, Lanelet>,
}

impl TryFrom<Vec<Lanelet>> for LaneletMap {
    type Error = TopologyError;

    fn try_from(lanelets: Vec<Lanelet>) -> Result<Self, Self::Error> {
        LaneletMap::new(lanelets)
    }
}

impl From<LaneletMap> for Vec<Lanelet> {
    fn from(map: LaneletMap) -> Self {
        map.lanelets.into_values().collect()
    }
}

impl LaneletMap {
    /// Builds the map and checks geometry and every id reference.
    pub fn new(lanelets: Vec<Lanelet>) -> Result<Self, TopologyError> {
        let mut by_id = BTreeMap::new();
        for lanelet in lanelets {
            lanelet.validate()?;
            let id = lanelet.id;
            if by_id.insert(id, lanelet).is_some() {
                return Err(TopologyError::InvalidLanelet {
                    id,
                    reason: "duplicate id".to_string(),
                });
            }
        }

        for lanelet in by_id.values() {
            let references = lanelet
                .predecessors
                .iter()
                .chain(&lanelet.successors)
                .chain(lanelet.adj_left.iter())
                .chain(lanelet.adj_right.iter());
            for id in references {
                if !by_id.contains_key(id) {
                    return Err(TopologyError::UnknownLanelet(*id));
                }
            }
        }

        Ok(Self { lanelets: by_id })
    }

    pub fn get(&self, id: LaneletId) -> Option<&Lanelet> {
        self.lanelets.get(&id)
    }

    pub fn lanelet(&self, id: LaneletId) -> Result<&Lanelet, TopologyError> {
        self.lanelets
            .get(&id)
            .ok_or(TopologyError::UnknownLanelet(id))
    }

    pub fn lanelets(&self) -> impl Iterator<Item = &Lanelet> {
        self.lanelets.values()
    }

    pub fn len(&self) -> usize {
        self.lanelets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanelets.is_empty()
    }

    /// All lanelets whose polygon contains `p`, in id order.
    pub fn find_lanelets_by_position(&self, p: Point) -> Vec<LaneletId> {
        self.lanelets
            .values()
            .filter(|l| l.contains(p))
            .map(|l| l.id)
            .collect()
    }

    /// Containing lanelet whose driving direction agrees best with the
    /// heading. Off the map, the lanelet with the nearest centre line.
    pub fn find_most_likely_lanelet(&self, p: Point, orientation: f64) -> Option<LaneletId> {
        let heading = Point::heading(orientation);
        let contained = self
            .find_lanelets_by_position(p)
            .into_iter()
            .filter_map(|id| self.get(id))
            .max_by(|a, b| {
                let da = a.direction_near(p).dot(heading);
                let db = b.direction_near(p).dot(heading);
                da.total_cmp(&db)
            })
            .map(|l| l.id);
        if contained.is_some() {
            return contained;
        }
        self.lanelets
            .values()
            .min_by(|a, b| {
                let da = distance_to_polyline(&a.center_line(), p);
                let db = distance_to_polyline(&b.center_line(), p);
                da.total_cmp(&db)
            })
            .map(|l| l.id)
    }

    /// Every successor chain starting at `start`, each cut once it covers
    /// `lookahead` metres. Branches produce one chain each.
    pub fn merge_successors(&self, start: LaneletId, lookahead: f64) -> Vec<Vec<LaneletId>> {
        self.merge_chains(start, lookahead, |l| &l.successors)
    }

    /// Same as `merge_successors`, walking predecessors.
    pub fn merge_predecessors(&self, start: LaneletId, lookahead: f64) -> Vec<Vec<LaneletId>> {
        self.merge_chains(start, lookahead, |l| &l.predecessors)
    }

    fn merge_chains<'a, F>(&'a self, start: LaneletId, lookahead: f64, next: F) -> Vec<Vec<LaneletId>>
    where
        F: Fn(&'a Lanelet) -> &'a Vec<LaneletId>,
    {
        let mut chains = Vec::new();
        let Some(first) = self.get(start) else {
            return chains;
        };
        // (chain, covered length)
        let mut stack = vec![(vec![start], first.length())];

        while let Some((chain, covered)) = stack.pop() {
            let tail = chain[chain.len() - 1];
            let followers: Vec<LaneletId> = self
                .get(tail)
                .map(|l| {
                    next(l)
                        .iter()
                        .copied()
                        .filter(|id| !chain.contains(id))
                        .collect()
                })
                .unwrap_or_default();

            if covered >= lookahead || followers.is_empty() {
                chains.push(chain);
                continue;
            }
            // reversed so the first follower is expanded first
            for id in followers.into_iter().rev() {
                let extra = self.get(id).map(|l| l.length()).unwrap_or(0.0);
                let mut extended = chain.clone();
                extended.push(id);
                stack.push((extended, covered + extra));
            }
        }
        chains
    }

    /// Dijkstra over successor edges (cost: length of the lanelet being left)
    /// and same-direction adjacency edges (cost: `lane_change_cost`).
    /// An empty goal set returns the start lanelet alone.
    pub fn plan_route(
        &self,
        start: LaneletId,
        goals: &[LaneletId],
        lane_change_cost: f64,
    ) -> Option<Vec<LaneletId>> {
        self.get(start)?;
        if goals.is_empty() {
            return Some(vec![start]);
        }
        let goals: HashSet<LaneletId> = goals.iter().copied().collect();

        let mut best: HashMap<LaneletId, f64> = HashMap::new();
        let mut previous: HashMap<LaneletId, LaneletId> = HashMap::new();
        let mut heap = BinaryHeap::new();
        best.insert(start, 0.0);
        heap.push(Frontier { cost: 0.0, id: start });

        while let Some(Frontier { cost, id }) = heap.pop() {
            if goals.contains(&id) {
                let mut route = vec![id];
                let mut cursor = id;
                while let Some(&prev) = previous.get(&cursor) {
                    route.push(prev);
                    cursor = prev;
                }
                route.reverse();
                debug!("Route {:?} found with cost {:.1}", route, cost);
                return Some(route);
            }
            if cost > best.get(&id).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            let Some(lanelet) = self.get(id) else {
                continue;
            };

            let travel = lanelet.length();
            let mut edges: Vec<(LaneletId, f64)> =
                lanelet.successors.iter().map(|s| (*s, travel)).collect();
            if let (Some(adj), true) = (lanelet.adj_left, lanelet.adj_left_same_direction) {
                edges.push((adj, lane_change_cost));
            }
            if let (Some(adj), true) = (lanelet.adj_right, lanelet.adj_right_same_direction) {
                edges.push((adj, lane_change_cost));
            }

            for (next, step_cost) in edges {
                let candidate = cost + step_cost;
                if candidate < best.get(&next).copied().unwrap_or(f64::INFINITY) {
                    best.insert(next, candidate);
                    previous.insert(next, id);
                    heap.push(Frontier {
                        cost: candidate,
                        id: next,
                    });
                }
            }
        }
        None
    }
}

fn distance_to_polyline(points: &[Point], p: Point) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let ab = w[1].sub(w[0]);
            let len_sq = ab.dot(ab);
            let t = if len_sq > 0.0 {
                (p.sub(w[0]).dot(ab) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            p.distance(w[0].add(ab.scale(t)))
        })
        .fold(f64::INFINITY, f64::min)
}

#[derive(Debug, PartialEq)]
struct Frontier {
    cost: f64,
    id: LaneletId,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    // min-heap on cost, ties by id
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{straight_lanelet, two_lane_highway};

    #[test]
    fn test_rejects_dangling_reference() {
        let mut lanelet = straight_lanelet(1, 0.0, 100.0, 0.0);
        lanelet.successors = vec![42];
        match LaneletMap::new(vec![lanelet]) {
            Err(TopologyError::UnknownLanelet(42)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_mismatched_bounds() {
        let mut lanelet = straight_lanelet(1, 0.0, 100.0, 0.0);
        lanelet.right_bound.push(Point::new(150.0, 0.0));
        assert!(matches!(
            LaneletMap::new(vec![lanelet]),
            Err(TopologyError::InvalidLanelet { id: 1, .. })
        ));
    }

    #[test]
    fn test_position_queries() {
        let map = two_lane_highway();
        assert_eq!(map.find_lanelets_by_position(Point::new(50.0, 1.75)), vec![1]);
        assert_eq!(map.find_lanelets_by_position(Point::new(250.0, 5.25)), vec![4]);
        assert!(map.find_lanelets_by_position(Point::new(50.0, 20.0)).is_empty());
        assert_eq!(map.find_most_likely_lanelet(Point::new(50.0, 5.0), 0.0), Some(3));
        // off the map: nearest centre line
        assert_eq!(map.find_most_likely_lanelet(Point::new(50.0, 50.0), 0.0), Some(3));
        assert_eq!(LaneletMap::default().find_most_likely_lanelet(Point::new(0.0, 0.0), 0.0), None);
    }

    #[test]
    fn test_merge_successors_respects_lookahead() {
        let map = two_lane_highway();
        assert_eq!(map.merge_successors(1, 300.0), vec![vec![1, 2]]);
        assert_eq!(map.merge_successors(1, 150.0), vec![vec![1]]);
        assert_eq!(map.merge_predecessors(2, 500.0), vec![vec![2, 1]]);
    }

    #[test]
    fn test_merge_successors_branches() {
        let mut a = straight_lanelet(1, 0.0, 100.0, 0.0);
        a.successors = vec![2, 3];
        let mut b = straight_lanelet(2, 100.0, 200.0, 0.0);
        b.predecessors = vec![1];
        let mut c = straight_lanelet(3, 100.0, 200.0, -3.5);
        c.predecessors = vec![1];
        let map = LaneletMap::new(vec![a, b, c]).unwrap();
        assert_eq!(map.merge_successors(1, 1000.0), vec![vec![1, 2], vec![1, 3]]);
    }

    #[test]
    fn test_plan_route_prefers_staying_in_lane() {
        let map = two_lane_highway();
        assert_eq!(map.plan_route(1, &[2], 10.0), Some(vec![1, 2]));
        assert_eq!(map.plan_route(1, &[3], 10.0), Some(vec![1, 3]));
        assert_eq!(map.plan_route(1, &[], 10.0), Some(vec![1]));
        assert_eq!(map.plan_route(2, &[1], 10.0), None);
    }

    #[test]
    fn test_serde_round_trip_through_vec() {
        let map = two_lane_highway();
        let yaml = serde_yaml::to_string(&map).unwrap();
        let back: LaneletMap = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, map);
    }
}
