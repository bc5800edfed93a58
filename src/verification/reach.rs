// src/verification/reach.rs
//
// Request/response contract between the verifier and a reachability
// engine, plus the lane corridor both sides agree on.
//
// The corridor measures every lane along one reference path (the ego lane
// centre line), so a position interval in the left lane and one in the ego
// lane are directly comparable. The ego lane is always corridor lane 0.

use super::prediction::PredictedOccupancy;
use super::translator::Specification;
use crate::error::TopologyError;
use crate::geometry::{Interval, Point, Projection, ReferencePath};
use crate::map::LaneletMap;
use crate::road_network::{EgoLaneNetwork, Lane};
use crate::types::{EgoBounds, LaneletId};

#[derive(Debug, Clone, PartialEq)]
pub struct CorridorLane {
    /// 0 = ego lane, +1 left neighbour, -1 right neighbour
    pub lateral_index: i32,
    pub lanelet_ids: Vec<LaneletId>,
    pub reversed: bool,
    /// Extent along the reference path
    pub s_range: Interval,
}

impl CorridorLane {
    pub fn touches(&self, lanelets: &[LaneletId]) -> bool {
        lanelets.iter().any(|id| self.lanelet_ids.contains(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Corridor {
    reference: ReferencePath,
    lanes: Vec<CorridorLane>,
}

impl Corridor {
    pub fn new(map: &LaneletMap, lanes: &EgoLaneNetwork) -> Result<Self, TopologyError> {
        let mut centre = Vec::new();
        for id in &lanes.lane.lanelet_ids {
            centre.extend(map.lanelet(*id)?.center_line());
        }
        let first = lanes.lane.lanelet_ids.first().copied().unwrap_or_default();
        let reference = ReferencePath::new(centre).ok_or_else(|| TopologyError::InvalidLanelet {
            id: first,
            reason: "ego lane has a degenerate centre line".to_string(),
        })?;

        let mut corridor_lanes = vec![corridor_lane(map, &reference, &lanes.lane, 0)?];
        for (side, index) in [(&lanes.lane_left_adjacent, 1), (&lanes.lane_right_adjacent, -1)] {
            for lane in side.iter().flatten() {
                corridor_lanes.push(corridor_lane(map, &reference, lane, index)?);
            }
        }

        Ok(Self {
            reference,
            lanes: corridor_lanes,
        })
    }

    pub fn reference(&self) -> &ReferencePath {
        &self.reference
    }

    pub fn lanes(&self) -> &[CorridorLane] {
        &self.lanes
    }

    pub fn project(&self, p: Point) -> Projection {
        self.reference.project(p)
    }
}

fn corridor_lane(
    map: &LaneletMap,
    reference: &ReferencePath,
    lane: &Lane,
    lateral_index: i32,
) -> Result<CorridorLane, TopologyError> {
    let mut s_range = Interval::new(f64::INFINITY, f64::NEG_INFINITY);
    for id in &lane.lanelet_ids {
        for p in map.lanelet(*id)?.center_line() {
            s_range = s_range.hull(&Interval::point(reference.project(p).s));
        }
    }
    Ok(CorridorLane {
        lateral_index,
        lanelet_ids: lane.lanelet_ids.clone(),
        reversed: lane.reversed,
        s_range,
    })
}

/// One convex piece of the ego reachable set: a lane, a position interval
/// of the vehicle centre and a velocity interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachCell {
    pub lane: usize,
    pub s: Interval,
    pub v: Interval,
    /// Entered an eventually-globally target region and may not leave it
    pub committed: bool,
    /// Steps spent in `lane` since the last lane change
    pub dwell: usize,
}

impl ReachCell {
    pub fn area(&self) -> f64 {
        self.s.length() * self.v.length()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReachableSets {
    layers: Vec<Vec<ReachCell>>,
}

impl ReachableSets {
    pub fn new(layers: Vec<Vec<ReachCell>>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: Vec<ReachCell>) {
        self.layers.push(layer);
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, step: usize) -> Option<&[ReachCell]> {
        self.layers.get(step).map(Vec::as_slice)
    }

    /// Missing layers count as empty.
    pub fn is_empty_at(&self, step: usize) -> bool {
        self.layer(step).map_or(true, |cells| cells.is_empty())
    }

    /// Position-velocity area of a layer.
    pub fn area_at(&self, step: usize) -> f64 {
        self.layer(step)
            .map(|cells| cells.iter().map(ReachCell::area).sum())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct ReachRequest<'a> {
    pub corridor: &'a Corridor,
    /// Ego centre along the reference path
    pub initial_s: f64,
    pub initial_v: f64,
    pub ego_length: f64,
    /// Per-action bounds (already overlaid)
    pub bounds: &'a EgoBounds,
    pub specification: &'a Specification,
    pub occupancies: &'a [PredictedOccupancy],
    pub dt: f64,
    pub horizon: usize,
    pub v_err: f64,
    pub lane_width: f64,
    pub reaction_time: f64,
    /// Braking capability assumed for the ego in the safe-distance formula
    pub ego_braking: f64,
    /// Braking assumed for the vehicle ahead
    pub other_braking: f64,
}

pub trait ReachabilityEngine {
    /// Layers 0..=horizon; may stop early once a layer is empty.
    fn compute_reachable_sets(&mut self, request: &ReachRequest<'_>) -> anyhow::Result<ReachableSets>;
}
