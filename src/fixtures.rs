// src/fixtures.rs
//
// Shared test scenes. Straight highway along +x, lanes 3.5 m wide:
//
//   y 7.0 ┌──────── 3 ────────┬──────── 4 ────────┐  left lane
//   y 3.5 ├──────── 1 ────────┼──────── 2 ────────┤  ego lane
//   y 0.0 └───────────────────┴───────────────────┘
//         x 0                 200                 400

use crate::geometry::Point;
use crate::map::{Lanelet, LaneletMap};
use crate::scenario::{EgoVehicle, Obstacle, ObstacleType, Scenario, State};
use crate::types::{LaneletId, ObstacleId};

pub const LANE_WIDTH: f64 = 3.5;

/// Straight lanelet from `x0` to `x1` whose right bound lies at `y_right`.
pub fn straight_lanelet(id: LaneletId, x0: f64, x1: f64, y_right: f64) -> Lanelet {
    Lanelet {
        id,
        left_bound: vec![
            Point::new(x0, y_right + LANE_WIDTH),
            Point::new(x1, y_right + LANE_WIDTH),
        ],
        right_bound: vec![Point::new(x0, y_right), Point::new(x1, y_right)],
        predecessors: Vec::new(),
        successors: Vec::new(),
        adj_left: None,
        adj_left_same_direction: true,
        adj_right: None,
        adj_right_same_direction: true,
        speed_limit: None,
    }
}

pub fn two_lane_lanelets() -> Vec<Lanelet> {
    let mut l1 = straight_lanelet(1, 0.0, 200.0, 0.0);
    let mut l2 = straight_lanelet(2, 200.0, 400.0, 0.0);
    let mut l3 = straight_lanelet(3, 0.0, 200.0, LANE_WIDTH);
    let mut l4 = straight_lanelet(4, 200.0, 400.0, LANE_WIDTH);

    l1.successors = vec![2];
    l2.predecessors = vec![1];
    l3.successors = vec![4];
    l4.predecessors = vec![3];

    l1.adj_left = Some(3);
    l3.adj_right = Some(1);
    l2.adj_left = Some(4);
    l4.adj_right = Some(2);

    vec![l1, l2, l3, l4]
}

pub fn two_lane_highway() -> LaneletMap {
    LaneletMap::new(two_lane_lanelets()).unwrap()
}

pub fn single_lane_road() -> LaneletMap {
    let mut l1 = straight_lanelet(1, 0.0, 200.0, 0.0);
    let mut l2 = straight_lanelet(2, 200.0, 400.0, 0.0);
    l1.successors = vec![2];
    l2.predecessors = vec![1];
    LaneletMap::new(vec![l1, l2]).unwrap()
}

pub fn state_at(x: f64, y: f64, velocity: f64) -> State {
    State {
        position: Point::new(x, y),
        velocity,
        orientation: 0.0,
        acceleration: 0.0,
        time_step: 0,
    }
}

pub fn car(id: ObstacleId, x: f64, y: f64, velocity: f64) -> Obstacle {
    Obstacle {
        id,
        obstacle_type: ObstacleType::Car,
        length: 5.0,
        width: 2.0,
        initial_state: state_at(x, y, velocity),
        trajectory: Vec::new(),
    }
}

/// Ego in the right lane at x = 50 doing 20 m/s.
pub fn highway_scenario(obstacles: Vec<Obstacle>) -> Scenario {
    Scenario {
        id: "TEST_Highway-1".to_string(),
        dt: 0.1,
        map: two_lane_highway(),
        obstacles,
        ego: EgoVehicle {
            initial_state: state_at(50.0, 1.75, 20.0),
            length: 5.0,
            width: 2.0,
        },
        goal_lanelets: Vec::new(),
    }
}

/// Slower car 60 m ahead in the ego lane, left lane free.
pub fn slower_leader_scenario() -> Scenario {
    highway_scenario(vec![car(10, 110.0, 1.75, 15.0)])
}

/// Slower leader plus a bumper-to-bumper column in the left lane
/// travelling at ego speed, covering every reachable gap.
pub fn blocked_left_lane_scenario() -> Scenario {
    let mut obstacles = vec![car(10, 110.0, 1.75, 15.0)];
    for i in 0..60 {
        obstacles.push(car(100 + i as ObstacleId, -50.0 + 6.0 * i as f64, 5.25, 20.0));
    }
    highway_scenario(obstacles)
}
