// src/verification/rules.rs
//
// Traffic rules checked alongside every action.
//
//   R_G1 safe distance     → G (SafeDistance_V<leader>) in most-likely mode,
//                            a phantom leader braking at full force in
//                            set-based mode
//   R_G2 no abrupt braking → deceleration floor on the ego bounds
//   R_G3 speed limit       → cap on the ego velocity

use super::prediction::PredictionMode;
use super::translator::{Formula, Prop};
use crate::geometry::Point;
use crate::road_network::Lane;
use crate::scenario::{Obstacle, Scenario, State};
use crate::types::{ObstacleId, VerificationSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Id given to the synthetic worst-case leader.
pub const PHANTOM_OBSTACLE_ID: ObstacleId = 85748;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficRule {
    SafeDistance,
    NoAbruptBraking,
    SpeedLimit,
}

impl TrafficRule {
    pub fn id(&self) -> &'static str {
        match self {
            Self::SafeDistance => "R_G1",
            Self::NoAbruptBraking => "R_G2",
            Self::SpeedLimit => "R_G3",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SafeDistance => "The distance to a vehicle ahead must generally be large enough that one can stop safely even if that vehicle brakes suddenly.",
            Self::NoAbruptBraking => "The ego vehicle is not allowed to brake abruptly without reason.",
            Self::SpeedLimit => "The ego vehicle must not exceed the speed limit.",
        }
    }
}

/// Everything the rules contribute to one verification call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTranslation {
    pub clauses: Vec<Formula>,
    pub phantom: Option<Obstacle>,
    /// Strongest admissible deceleration (negative)
    pub a_lon_min_floor: Option<f64>,
    pub v_lon_max_cap: Option<f64>,
}

pub struct RuleContext<'a> {
    pub scenario: &'a Scenario,
    pub ego_lane: &'a Lane,
    pub ego: &'a State,
    pub settings: &'a VerificationSettings,
    /// Worst-case braking of other vehicles (negative)
    pub a_brake: f64,
    /// Step size and length of synthetic trajectories
    pub dt: f64,
    pub horizon: usize,
}

pub fn translate_rules(rules: &[TrafficRule], ctx: &RuleContext<'_>) -> RuleTranslation {
    let mut out = RuleTranslation::default();

    for rule in rules {
        match rule {
            TrafficRule::SafeDistance => {
                let Some(leader) = preceding_vehicle(ctx.scenario, ctx.ego_lane, ctx.ego) else {
                    debug!("{}: no vehicle ahead in the ego lane", rule.id());
                    continue;
                };
                match ctx.settings.prediction_mode {
                    PredictionMode::MostLikely => {
                        out.clauses
                            .push(Formula::Globally(Prop::SafeDistance(leader.id)));
                    }
                    PredictionMode::SetBased => {
                        out.phantom = Some(phantom_leader(leader, ctx.a_brake, ctx.dt, ctx.horizon));
                    }
                }
            }
            TrafficRule::NoAbruptBraking => {
                out.a_lon_min_floor = Some(ctx.settings.abrupt_braking_limit);
            }
            TrafficRule::SpeedLimit => {
                out.v_lon_max_cap = ctx.scenario.speed_limit(&ctx.ego_lane.lanelet_ids);
            }
        }
    }
    out
}

/// Closest vehicle in the ego lane that lies ahead of the ego, i.e. whose
/// relative position has a positive component along the ego heading.
pub fn preceding_vehicle<'s>(scenario: &'s Scenario, lane: &Lane, ego: &State) -> Option<&'s Obstacle> {
    let heading = ego.heading();
    scenario
        .vehicles()
        .filter(|o| {
            let state = &o.initial_state;
            scenario
                .map
                .find_lanelets_by_position(state.position)
                .iter()
                .any(|id| lane.contains(*id))
        })
        .filter(|o| heading.dot(o.initial_state.position.sub(ego.position)) > 0.0)
        .min_by(|a, b| {
            let da = a.initial_state.position.distance(ego.position);
            let db = b.initial_state.position.distance(ego.position);
            da.total_cmp(&db)
        })
}

/// Copy of `leader` that brakes at `a_brake` from the first step until it
/// stands still.
pub fn phantom_leader(leader: &Obstacle, a_brake: f64, dt: f64, horizon: usize) -> Obstacle {
    let start = leader.initial_state;
    let heading: Point = start.heading();
    let mut trajectory = Vec::with_capacity(horizon);
    let (mut position, mut velocity) = (start.position, start.velocity);

    for k in 1..=horizon {
        let next_velocity = (velocity + a_brake * dt).max(0.0);
        position = position.add(heading.scale(0.5 * (velocity + next_velocity) * dt));
        velocity = next_velocity;
        trajectory.push(State {
            position,
            velocity,
            acceleration: if velocity > 0.0 { a_brake } else { 0.0 },
            time_step: start.time_step + k,
            ..start
        });
    }

    Obstacle {
        id: PHANTOM_OBSTACLE_ID,
        obstacle_type: leader.obstacle_type,
        length: leader.length,
        width: leader.width,
        initial_state: start,
        trajectory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{car, highway_scenario};
    use crate::road_network::{EgoLaneNetwork, RoadNetwork};

    fn ego_lane(scenario: &Scenario) -> Lane {
        let state = scenario.ego.initial_state;
        let network = RoadNetwork::build(&scenario.map, state.position, true, 300.0).unwrap();
        EgoLaneNetwork::from_route(&network, &scenario.map, &state, &[], 10.0)
            .unwrap()
            .lane
    }

    fn context<'a>(
        scenario: &'a Scenario,
        lane: &'a Lane,
        settings: &'a VerificationSettings,
    ) -> RuleContext<'a> {
        RuleContext {
            scenario,
            ego_lane: lane,
            ego: &scenario.ego.initial_state,
            settings,
            a_brake: -8.0,
            dt: 0.1,
            horizon: 30,
        }
    }

    #[test]
    fn test_preceding_vehicle_ignores_rear_and_other_lane() {
        let scenario = highway_scenario(vec![
            car(1, 30.0, 1.75, 20.0),
            car(2, 120.0, 1.75, 20.0),
            car(3, 80.0, 5.25, 20.0),
            car(4, 90.0, 1.75, 20.0),
        ]);
        let lane = ego_lane(&scenario);
        let leader = preceding_vehicle(&scenario, &lane, &scenario.ego.initial_state).unwrap();
        assert_eq!(leader.id, 4);
    }

    #[test]
    fn test_safe_distance_clause_in_most_likely_mode() {
        let scenario = highway_scenario(vec![car(10, 110.0, 1.75, 15.0)]);
        let lane = ego_lane(&scenario);
        let settings = VerificationSettings::default();
        let out = translate_rules(&[TrafficRule::SafeDistance], &context(&scenario, &lane, &settings));
        assert_eq!(out.clauses, vec![Formula::Globally(Prop::SafeDistance(10))]);
        assert!(out.phantom.is_none());
    }

    #[test]
    fn test_phantom_leader_in_set_based_mode() {
        let scenario = highway_scenario(vec![car(10, 110.0, 1.75, 15.0)]);
        let lane = ego_lane(&scenario);
        let settings = VerificationSettings {
            prediction_mode: PredictionMode::SetBased,
            ..Default::default()
        };
        let out = translate_rules(&[TrafficRule::SafeDistance], &context(&scenario, &lane, &settings));
        assert!(out.clauses.is_empty());
        let phantom = out.phantom.unwrap();
        assert_eq!(phantom.id, PHANTOM_OBSTACLE_ID);
        assert_eq!(phantom.trajectory.len(), 30);
        let last = phantom.trajectory.last().unwrap();
        assert_eq!(last.velocity, 0.0);
        // stopping distance 15^2 / 16 ≈ 14.06 m, discretised
        assert!(last.position.x > 110.0 + 13.0 && last.position.x < 110.0 + 15.5);
    }

    #[test]
    fn test_bound_rules() {
        let mut scenario = highway_scenario(Vec::new());
        for id in [1, 2] {
            let mut lanelets: Vec<_> = scenario.map.lanelets().cloned().collect();
            if let Some(l) = lanelets.iter_mut().find(|l| l.id == id) {
                l.speed_limit = Some(if id == 1 { 27.0 } else { 33.0 });
            }
            scenario.map = crate::map::LaneletMap::new(lanelets).unwrap();
        }
        let lane = ego_lane(&scenario);
        let settings = VerificationSettings::default();
        let out = translate_rules(
            &[TrafficRule::NoAbruptBraking, TrafficRule::SpeedLimit],
            &context(&scenario, &lane, &settings),
        );
        assert_eq!(out.a_lon_min_floor, Some(-4.0));
        assert_eq!(out.v_lon_max_cap, Some(27.0));
    }

    #[test]
    fn test_rule_text() {
        assert_eq!(TrafficRule::SafeDistance.id(), "R_G1");
        assert!(TrafficRule::SpeedLimit.description().contains("speed limit"));
        let rule: TrafficRule = serde_yaml::from_str("no_abrupt_braking").unwrap();
        assert_eq!(rule, TrafficRule::NoAbruptBraking);
    }
}
