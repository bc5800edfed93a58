// src/road_network.rs
//
// Lane-level view of the lanelet map around the ego vehicle.
//
// Lanes live in an arena (`RoadNetwork::lanes`) and refer to each other by
// `LaneId`, so left/right adjacency can point both ways without ownership
// cycles. Left/right are always expressed in the ego driving frame: for a
// lane that runs against the ego direction the lanelet-level sides swap.

use crate::actions::{LateralAction, LongitudinalAction};
use crate::error::TopologyError;
use crate::geometry::Point;
use crate::map::LaneletMap;
use crate::scenario::State;
use crate::types::LaneletId;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LaneId(pub usize);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane#{}", self.0)
    }
}

/// Ordered chain of contiguous lanelets, ordered in the direction the
/// lane was merged (successors for regular lanes, predecessors for
/// reversed ones).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lane {
    pub id: LaneId,
    pub lanelet_ids: Vec<LaneletId>,
    /// Runs against the ego driving direction
    pub reversed: bool,
    pub left_adjacent: Vec<LaneId>,
    pub right_adjacent: Vec<LaneId>,
}

impl Lane {
    pub fn contains(&self, lanelet: LaneletId) -> bool {
        self.lanelet_ids.contains(&lanelet)
    }

    pub fn contains_all(&self, lanelets: &[LaneletId]) -> bool {
        lanelets.iter().all(|id| self.contains(*id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoadNetwork {
    lanes: Vec<Lane>,
}

impl RoadNetwork {
    /// Builds the lanes passing through `position`.
    ///
    /// Seeds are the predecessors of every lanelet containing the position
    /// and of its same-direction neighbours; with `consider_reversed`, the
    /// successors of opposite-direction neighbours as well. A lanelet with
    /// nothing upstream seeds itself. Each seed is merged into one lane per
    /// branch, up to `lookahead` metres.
    pub fn build(
        map: &LaneletMap,
        position: Point,
        consider_reversed: bool,
        lookahead: f64,
    ) -> Result<Self, TopologyError> {
        let initial = map.find_lanelets_by_position(position);
        if initial.is_empty() {
            return Err(TopologyError::OffMap {
                x: position.x,
                y: position.y,
            });
        }

        let mut same_direction: Vec<LaneletId> = Vec::new();
        let mut reversed: Vec<LaneletId> = Vec::new();

        for id in initial {
            let lanelet = map.lanelet(id)?;
            same_direction.extend(upstream_or_self(map, id, false)?);

            let neighbours = [
                (lanelet.adj_left, lanelet.adj_left_same_direction),
                (lanelet.adj_right, lanelet.adj_right_same_direction),
            ];
            for (adj, same) in neighbours {
                let Some(adj) = adj else { continue };
                if same {
                    same_direction.extend(upstream_or_self(map, adj, false)?);
                } else if consider_reversed {
                    reversed.extend(upstream_or_self(map, adj, true)?);
                }
            }
        }

        let mut chains: Vec<(Vec<LaneletId>, bool)> = Vec::new();
        let mut seen: HashSet<(Vec<LaneletId>, bool)> = HashSet::new();
        let merged = same_direction
            .iter()
            .flat_map(|id| map.merge_successors(*id, lookahead).into_iter().map(|c| (c, false)))
            .chain(
                reversed
                    .iter()
                    .flat_map(|id| map.merge_predecessors(*id, lookahead).into_iter().map(|c| (c, true))),
            );
        for entry in merged {
            if seen.insert(entry.clone()) {
                chains.push(entry);
            }
        }

        let mut lanes: Vec<Lane> = chains
            .into_iter()
            .enumerate()
            .map(|(i, (lanelet_ids, reversed))| Lane {
                id: LaneId(i),
                lanelet_ids,
                reversed,
                left_adjacent: Vec::new(),
                right_adjacent: Vec::new(),
            })
            .collect();
        link_adjacent_lanes(map, &mut lanes)?;

        debug!(
            "Road network with {} lanes built at ({:.1}, {:.1})",
            lanes.len(),
            position.x,
            position.y
        );
        Ok(Self { lanes })
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id.0)
    }

    /// The lane containing every id in `ids`. When several lanes qualify
    /// (e.g. a branching road), the one built first wins; the build order
    /// follows the map's id order, so the pick is stable for a given map.
    pub fn get_unique_lane_by_lanelet_ids(&self, ids: &[LaneletId]) -> Option<LaneId> {
        let matching: Vec<&Lane> = self
            .lanes
            .iter()
            .filter(|lane| lane.contains_all(ids))
            .collect();

        match matching.as_slice() {
            [] => None,
            [only] => Some(only.id),
            [first, ..] => {
                warn!(
                    "⚠️  {} lanes contain lanelets {:?}, using {}",
                    matching.len(),
                    ids,
                    first.id
                );
                Some(first.id)
            }
        }
    }
}

/// Predecessors (or successors, walking against the lanelet direction) of
/// `id`, or `id` itself when there are none.
fn upstream_or_self(
    map: &LaneletMap,
    id: LaneletId,
    against_direction: bool,
) -> Result<Vec<LaneletId>, TopologyError> {
    let lanelet = map.lanelet(id)?;
    let upstream = if against_direction {
        &lanelet.successors
    } else {
        &lanelet.predecessors
    };
    if upstream.is_empty() {
        Ok(vec![id])
    } else {
        Ok(upstream.clone())
    }
}

fn link_adjacent_lanes(map: &LaneletMap, lanes: &mut [Lane]) -> Result<(), TopologyError> {
    let mut links: Vec<(Vec<LaneId>, Vec<LaneId>)> = Vec::with_capacity(lanes.len());

    for lane in lanes.iter() {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for id in &lane.lanelet_ids {
            let lanelet = map.lanelet(*id)?;
            let (left_ref, right_ref) = if lane.reversed {
                (lanelet.adj_right, lanelet.adj_left)
            } else {
                (lanelet.adj_left, lanelet.adj_right)
            };
            for (reference, side) in [(left_ref, &mut left), (right_ref, &mut right)] {
                let Some(reference) = reference else { continue };
                for other in lanes.iter() {
                    if other.id != lane.id && other.contains(reference) && !side.contains(&other.id) {
                        side.push(other.id);
                    }
                }
            }
        }
        links.push((left, right));
    }

    for (lane, (left, right)) in lanes.iter_mut().zip(links) {
        lane.left_adjacent = left;
        lane.right_adjacent = right;
    }
    Ok(())
}

// ============================================================================
// EGO-CENTERED VIEW
// ============================================================================

/// The ego lane plus its neighbours, derived once per decision cycle.
///
/// Every lane in `lane_left_adjacent` (`lane_right_adjacent`) is one
/// CHANGE_LEFT (CHANGE_RIGHT) away from `lane`.
#[derive(Debug, Clone, PartialEq)]
pub struct EgoLaneNetwork {
    pub lane: Lane,
    pub lane_left_adjacent: Option<Vec<Lane>>,
    pub lane_right_adjacent: Option<Vec<Lane>>,
    pub lanes_incoming: Vec<Lane>,
}

impl EgoLaneNetwork {
    /// Resolves the ego lane from the shortest route towards `goals`. When
    /// no single lane holds the whole route (e.g. it includes a lane
    /// change), the lanelet most likely holding the ego state is used.
    pub fn from_route(
        network: &RoadNetwork,
        map: &LaneletMap,
        state: &State,
        goals: &[LaneletId],
        lane_change_cost: f64,
    ) -> Result<Self, TopologyError> {
        let start = map
            .find_most_likely_lanelet(state.position, state.orientation)
            .ok_or(TopologyError::OffMap {
                x: state.position.x,
                y: state.position.y,
            })?;

        let route = map
            .plan_route(start, goals, lane_change_cost)
            .unwrap_or_else(|| {
                warn!("No route from lanelet {} to goals {:?}", start, goals);
                vec![start]
            });

        let lane = network
            .get_unique_lane_by_lanelet_ids(&route)
            .or_else(|| {
                debug!("Route {:?} spans several lanes, using lanelet {}", route, start);
                network.get_unique_lane_by_lanelet_ids(&[start])
            })
            .ok_or(TopologyError::EgoLaneNotFound)?;

        Self::around(network, lane)
    }

    /// Resolves the lane from the state alone. Used to label other
    /// vehicles, which have no route.
    pub fn from_position(
        network: &RoadNetwork,
        map: &LaneletMap,
        state: &State,
    ) -> Result<Self, TopologyError> {
        let start = map
            .find_most_likely_lanelet(state.position, state.orientation)
            .ok_or(TopologyError::OffMap {
                x: state.position.x,
                y: state.position.y,
            })?;
        let lane = network
            .get_unique_lane_by_lanelet_ids(&[start])
            .ok_or(TopologyError::EgoLaneNotFound)?;
        Self::around(network, lane)
    }

    fn around(network: &RoadNetwork, lane_id: LaneId) -> Result<Self, TopologyError> {
        let lane = network
            .lane(lane_id)
            .cloned()
            .ok_or(TopologyError::EgoLaneNotFound)?;

        let resolve = |ids: &[LaneId]| -> Option<Vec<Lane>> {
            let lanes: Vec<Lane> = ids.iter().filter_map(|id| network.lane(*id).cloned()).collect();
            (!lanes.is_empty()).then_some(lanes)
        };
        let lane_left_adjacent = resolve(&lane.left_adjacent);
        let lane_right_adjacent = resolve(&lane.right_adjacent);

        // lanes that start elsewhere and join the ego lane further down
        let lanes_incoming = network
            .lanes()
            .iter()
            .filter(|other| other.id != lane.id && !other.reversed)
            .filter(|other| other.lanelet_ids.iter().any(|id| lane.contains(*id)))
            .filter(|other| other.lanelet_ids.first().is_some_and(|f| !lane.contains(*f)))
            .cloned()
            .collect();

        Ok(Self {
            lane,
            lane_left_adjacent,
            lane_right_adjacent,
            lanes_incoming,
        })
    }

    /// Every lanelet id of every lane on the given side.
    pub fn adjacent_lanelet_ids(&self, lateral: LateralAction) -> Option<Vec<LaneletId>> {
        let lanes = match lateral {
            LateralAction::ChangeLeft => self.lane_left_adjacent.as_ref()?,
            LateralAction::ChangeRight => self.lane_right_adjacent.as_ref()?,
            _ => return None,
        };
        let mut ids = Vec::new();
        for lane in lanes {
            for id in &lane.lanelet_ids {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        Some(ids)
    }

    pub fn has_adjacent_lanes(&self) -> bool {
        self.lane_left_adjacent.is_some() || self.lane_right_adjacent.is_some()
    }

    /// Lateral actions the lane layout permits; FOLLOW_LANE always first.
    pub fn lateral_actions(&self) -> Vec<LateralAction> {
        let mut actions = vec![LateralAction::FollowLane];
        if self.lane_left_adjacent.is_some() {
            actions.push(LateralAction::ChangeLeft);
        }
        if self.lane_right_adjacent.is_some() {
            actions.push(LateralAction::ChangeRight);
        }
        actions
    }

    /// Longitudinal actions feasible at speed `v`: no acceleration at the
    /// speed cap, no deceleration at standstill.
    pub fn longitudinal_actions(&self, v: f64, v_max: f64, v_err: f64) -> Vec<LongitudinalAction> {
        LongitudinalAction::ALL
            .into_iter()
            .filter(|a| match a {
                LongitudinalAction::Accelerate => v < v_max - v_err,
                LongitudinalAction::Decelerate => v > v_err,
                _ => true,
            })
            .collect()
    }
}
