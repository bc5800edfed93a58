// src/labeler.rs
//
// Ground-truth action labels for recorded vehicles.
//
//   Trajectory: read the action off the recorded trajectory
//   ReachSet:   put the vehicle in the ego seat, verify every feasible
//               action and keep the safe one with the largest final
//               reachable area

use crate::actions::{Action, LateralAction, LongitudinalAction};
use crate::decider::{ActionVerifier, VerificationStatus};
use crate::map::LaneletMap;
use crate::road_network::{EgoLaneNetwork, RoadNetwork};
use crate::scenario::{EgoVehicle, Obstacle, Scenario};
use crate::types::{Config, LaneletId};
use crate::verification::{
    IntervalReachEngine, ReachabilityEngine, SafetyVerifier, VerificationConfiguration,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Label of a vehicle whose behaviour fits no action.
pub const UNLABELED: Action = Action::new(LongitudinalAction::Unknown, LateralAction::Unknown);

fn obstacle_lanes(
    scenario: &Scenario,
    obstacle: &Obstacle,
    lookahead: f64,
    consider_reversed: bool,
) -> Result<EgoLaneNetwork> {
    let state = &obstacle.initial_state;
    let network = RoadNetwork::build(&scenario.map, state.position, consider_reversed, lookahead)
        .with_context(|| format!("No road network around obstacle {}", obstacle.id))?;
    EgoLaneNetwork::from_position(&network, &scenario.map, state)
        .with_context(|| format!("No lane for obstacle {}", obstacle.id))
}

// ============================================================================
// TRAJECTORY LABELER
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrajectoryLabeler {
    pub a_lim: f64,
    pub v_err: f64,
    pub lookahead: f64,
    pub consider_reversed: bool,
}

impl TrajectoryLabeler {
    pub fn from_config(config: &Config) -> Self {
        Self {
            a_lim: config.decision.a_lim,
            v_err: config.decision.v_err,
            lookahead: config.verification.lookahead,
            consider_reversed: config.verification.consider_reversed,
        }
    }

    pub fn label(&self, obstacle: &Obstacle, scenario: &Scenario) -> Result<Action> {
        let lanes = obstacle_lanes(scenario, obstacle, self.lookahead, self.consider_reversed)?;
        let action = Action::new(
            self.longitudinal_label(obstacle, scenario.dt),
            self.lateral_label(obstacle, &scenario.map, &lanes),
        );
        debug!("Trajectory label of obstacle {}: {}", obstacle.id, action);
        Ok(action)
    }

    /// STOP if the vehicle ends at standstill, otherwise the mean
    /// acceleration against `a_lim`.
    pub fn longitudinal_label(&self, obstacle: &Obstacle, dt: f64) -> LongitudinalAction {
        let velocities: Vec<f64> = obstacle.states().map(|s| s.velocity).collect();
        let last = velocities.last().copied().unwrap_or(obstacle.initial_state.velocity);
        if last.abs() <= self.v_err {
            return LongitudinalAction::Stop;
        }

        let mean = if velocities.len() < 2 {
            obstacle.initial_state.acceleration
        } else {
            let total: f64 = velocities.windows(2).map(|w| (w[1] - w[0]) / dt).sum();
            total / (velocities.len() - 1) as f64
        };

        if mean > self.a_lim {
            LongitudinalAction::Accelerate
        } else if mean < -self.a_lim {
            LongitudinalAction::Decelerate
        } else if mean.abs() < self.a_lim {
            LongitudinalAction::Keep
        } else {
            LongitudinalAction::Unknown
        }
    }

    /// FOLLOW_LANE if every visited lanelet belongs to the vehicle's lane,
    /// otherwise the side of the final lanelet.
    pub fn lateral_label(&self, obstacle: &Obstacle, map: &LaneletMap, lanes: &EgoLaneNetwork) -> LateralAction {
        let visited: Vec<LaneletId> = obstacle
            .states()
            .filter_map(|s| map.find_most_likely_lanelet(s.position, s.orientation))
            .collect();
        let Some(last) = visited.last() else {
            return LateralAction::Unknown;
        };

        if visited.iter().all(|id| lanes.lane.contains(*id)) {
            return LateralAction::FollowLane;
        }
        for side in [LateralAction::ChangeLeft, LateralAction::ChangeRight] {
            if lanes
                .adjacent_lanelet_ids(side)
                .is_some_and(|ids| ids.contains(last))
            {
                return side;
            }
        }
        LateralAction::Unknown
    }
}

// ============================================================================
// REACHABLE-SET LABELER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReachSetLabeler<E = IntervalReachEngine> {
    base: VerificationConfiguration,
    engine: E,
}

impl<E: ReachabilityEngine + Clone> ReachSetLabeler<E> {
    pub fn new(base: VerificationConfiguration, engine: E) -> Self {
        Self { base, engine }
    }

    pub fn label(&self, obstacle: &Obstacle, scenario: &Scenario) -> Result<Action> {
        let settings = &self.base.settings;
        let lanes = obstacle_lanes(scenario, obstacle, settings.lookahead, settings.consider_reversed)?;

        let v = obstacle.initial_state.velocity;
        let mut candidates = Vec::new();
        for lateral in lanes.lateral_actions() {
            for longitudinal in lanes.longitudinal_actions(v, self.base.ego.v_lon_max, self.base.v_err) {
                candidates.push(Action::new(longitudinal, lateral));
            }
        }

        let seat = Arc::new(in_ego_seat(scenario, obstacle));
        let mut verifier = SafetyVerifier::new(self.base.clone(), seat, lanes, self.engine.clone())?;
        let horizon = self.base.horizon;

        let mut best: Option<(Action, f64)> = None;
        for action in candidates {
            match verifier.verify(&action) {
                Ok(VerificationStatus::Safe) => {}
                Ok(VerificationStatus::Unsafe) => continue,
                Err(e) => {
                    debug!("Obstacle {}: skipping {}: {:#}", obstacle.id, action, e);
                    continue;
                }
            }
            let area = verifier
                .last_reachable_sets()
                .map_or(0.0, |sets| sets.area_at(horizon));
            if best.map_or(true, |(_, a)| area > a) {
                best = Some((action, area));
            }
        }

        let label = best.map_or(UNLABELED, |(action, _)| action);
        info!("Reachable-set label of obstacle {}: {}", obstacle.id, label);
        Ok(label)
    }
}

/// Copy of `scenario` with `obstacle` driving the ego vehicle.
fn in_ego_seat(scenario: &Scenario, obstacle: &Obstacle) -> Scenario {
    Scenario {
        obstacles: scenario
            .obstacles
            .iter()
            .filter(|o| o.id != obstacle.id)
            .cloned()
            .collect(),
        ego: EgoVehicle {
            initial_state: obstacle.initial_state,
            length: obstacle.length,
            width: obstacle.width,
        },
        ..scenario.clone()
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

pub enum Labeler<E = IntervalReachEngine> {
    Trajectory(TrajectoryLabeler),
    ReachSet(ReachSetLabeler<E>),
}

impl<E: ReachabilityEngine + Clone> Labeler<E> {
    pub fn label(&self, obstacle: &Obstacle, scenario: &Scenario) -> Result<Action> {
        match self {
            Self::Trajectory(labeler) => labeler.label(obstacle, scenario),
            Self::ReachSet(labeler) => labeler.label(obstacle, scenario),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Trajectory(_) => "trajectory",
            Self::ReachSet(_) => "reach_set",
        }
    }
}
