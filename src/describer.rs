// src/describer.rs
//
// Natural-language scene rendering for the ranking oracle plus the JSON
// schema its answer must follow. The feasible action lists come from the
// ego lane network, so the schema never offers a lane change towards a
// side without a lane.

use crate::actions::{Action, LateralAction, LongitudinalAction};
use crate::geometry::Point;
use crate::oracle::ranking_slot_names;
use crate::road_network::EgoLaneNetwork;
use crate::scenario::{Obstacle, Scenario};
use crate::types::Config;
use crate::verification::rules::TrafficRule;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Write;
use std::sync::Arc;

pub const SCHEMA_TITLE: &str = "HighLevelDrivingDecision";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableActions {
    pub lateral: Vec<LateralAction>,
    pub longitudinal: Vec<LongitudinalAction>,
}

impl AvailableActions {
    pub fn combinations(&self) -> usize {
        self.lateral.len() * self.longitudinal.len()
    }
}

pub trait SceneDescription {
    fn system_prompt(&self) -> String;
    /// `past_actions` oldest first.
    fn user_prompt(&self, past_actions: &[Action]) -> String;
    /// Response schema requiring `k` ranked slots.
    fn schema(&self, k: usize) -> Value;
    fn available_actions(&self) -> AvailableActions;
}

/// Where an obstacle is relative to the ego vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bearing {
    InFront,
    Left,
    Behind,
    Right,
}

impl Bearing {
    /// Quadrant of `target` in the frame of a vehicle at `origin` heading
    /// along `heading` (unit vector).
    pub fn of(origin: Point, heading: Point, target: Point) -> Self {
        let rel = target.sub(origin);
        let lon = heading.dot(rel);
        let lat = heading.cross(rel);
        if lon.abs() >= lat.abs() {
            if lon >= 0.0 {
                Self::InFront
            } else {
                Self::Behind
            }
        } else if lat > 0.0 {
            Self::Left
        } else {
            Self::Right
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFront => "in front of",
            Self::Left => "left of",
            Self::Behind => "behind",
            Self::Right => "right of",
        }
    }
}

pub struct SceneDescriber {
    scenario: Arc<Scenario>,
    lanes: EgoLaneNetwork,
    traffic_rules: Vec<TrafficRule>,
    role: Option<String>,
    goal: Option<String>,
    v_max: f64,
    v_err: f64,
}

impl SceneDescriber {
    pub fn new(scenario: Arc<Scenario>, lanes: EgoLaneNetwork, config: &Config) -> Self {
        Self {
            scenario,
            lanes,
            traffic_rules: config.verification.traffic_rules.clone(),
            role: config.decision.role.clone(),
            goal: config.decision.goal.clone(),
            v_max: config.vehicle.ego.v_lon_max,
            v_err: config.decision.v_err,
        }
    }

    pub fn lanes(&self) -> &EgoLaneNetwork {
        &self.lanes
    }

    fn speed_limit(&self) -> Option<f64> {
        self.scenario.speed_limit(&self.lanes.lane.lanelet_ids)
    }

    fn describe_ego(&self) -> String {
        let ego = &self.scenario.ego.initial_state;
        let mut out = format!(
            "You are driving a vehicle {:.1} m long and {:.1} m wide in a lane made of lanelets {:?}.",
            self.scenario.ego.length,
            self.scenario.ego.width,
            self.lanes.lane.lanelet_ids
        );
        for (side, lanes) in [
            ("left", &self.lanes.lane_left_adjacent),
            ("right", &self.lanes.lane_right_adjacent),
        ] {
            match lanes {
                Some(lanes) if lanes.iter().any(|l| l.reversed) => {
                    let _ = write!(out, " To your {} there is a lane with oncoming traffic.", side);
                }
                Some(_) => {
                    let _ = write!(out, " To your {} there is a lane in your direction.", side);
                }
                None => {
                    let _ = write!(out, " There is no lane to your {}.", side);
                }
            }
        }
        if !self.lanes.lanes_incoming.is_empty() {
            let _ = write!(
                out,
                " {} lane(s) merge into yours further ahead.",
                self.lanes.lanes_incoming.len()
            );
        }
        let _ = write!(
            out,
            "\nYour velocity is {:.1} m/s and your acceleration is {:.1} m/s².",
            ego.velocity, ego.acceleration
        );
        out
    }

    fn relative_lane(&self, obstacle: &Obstacle) -> &'static str {
        let lanelets = self
            .scenario
            .map
            .find_lanelets_by_position(obstacle.initial_state.position);
        let on = |lanes: &Option<Vec<crate::road_network::Lane>>| {
            lanes
                .iter()
                .flatten()
                .any(|lane| lanelets.iter().any(|id| lane.contains(*id)))
        };

        if lanelets.iter().any(|id| self.lanes.lane.contains(*id)) {
            "in your lane"
        } else if on(&self.lanes.lane_left_adjacent) {
            "in the lane to your left"
        } else if on(&self.lanes.lane_right_adjacent) {
            "in the lane to your right"
        } else if self
            .lanes
            .lanes_incoming
            .iter()
            .any(|lane| lanelets.iter().any(|id| lane.contains(*id)))
        {
            "on a lane merging into yours"
        } else {
            "outside your lanes"
        }
    }

    fn describe_obstacles(&self) -> String {
        let ego = &self.scenario.ego.initial_state;
        let mut obstacles: Vec<&Obstacle> = self.scenario.obstacles.iter().collect();
        obstacles.sort_by(|a, b| {
            let da = a.initial_state.position.distance(ego.position);
            let db = b.initial_state.position.distance(ego.position);
            da.total_cmp(&db)
        });
        if obstacles.is_empty() {
            return "There are no obstacles around you.".to_string();
        }

        let mut out = String::from("Obstacles around you:");
        for obstacle in obstacles {
            let state = &obstacle.initial_state;
            let bearing = Bearing::of(ego.position, ego.heading(), state.position);
            let _ = write!(
                out,
                "\n  - {} {} ({:.1} m x {:.1} m): driving {}, {} you at a distance of {:.1} meters, velocity {:.1} m/s, acceleration {:.1} m/s².",
                obstacle.obstacle_type.as_str(),
                obstacle.id,
                obstacle.length,
                obstacle.width,
                self.relative_lane(obstacle),
                bearing.as_str(),
                state.position.distance(ego.position),
                state.velocity,
                state.acceleration
            );
        }
        out
    }

    fn describe_rules(&self) -> Option<String> {
        let mut out = String::new();
        if !self.traffic_rules.is_empty() {
            out.push_str("You must obey these traffic rules:");
            for rule in &self.traffic_rules {
                let _ = write!(out, "\n  - {}: {}", rule.id(), rule.description());
            }
        }
        if let Some(limit) = self.speed_limit() {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "The maximum speed is {:.1} m/s.", limit);
        }
        (!out.is_empty()).then_some(out)
    }

    fn describe_actions(&self) -> String {
        let available = self.available_actions();
        let mut out = format!(
            "Observe the environment first and reason about it. Then rank the {} possible combinations of:\nLongitudinal actions:",
            available.combinations()
        );
        for action in &available.longitudinal {
            let _ = write!(out, "\n    - {}", action);
        }
        out.push_str("\nLateral actions:");
        for action in &available.lateral {
            let _ = write!(out, "\n    - {}", action);
        }
        out
    }
}

impl SceneDescription for SceneDescriber {
    fn system_prompt(&self) -> String {
        let mut out = String::from("You are driving a car and need to make a high-level driving decision.\n");
        for line in [&self.role, &self.goal].into_iter().flatten() {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.describe_actions());
        out
    }

    fn user_prompt(&self, past_actions: &[Action]) -> String {
        let mut parts = vec![self.describe_ego()];
        parts.extend(self.describe_rules());
        parts.push(self.describe_obstacles());
        if !past_actions.is_empty() {
            let mut history = String::from("Your previous actions, oldest first:");
            for action in past_actions {
                let _ = write!(history, "\n  - {}", action);
            }
            parts.push(history);
        }
        format!("Here is an overview of your environment:\n{}\n", parts.join("\n"))
    }

    fn schema(&self, k: usize) -> Value {
        let available = self.available_actions();
        let lateral: Vec<&str> = available.lateral.iter().map(LateralAction::as_str).collect();
        let longitudinal: Vec<&str> = available
            .longitudinal
            .iter()
            .map(LongitudinalAction::as_str)
            .collect();

        let slots = ranking_slot_names(k);
        let properties: Map<String, Value> = slots
            .iter()
            .map(|slot| (slot.clone(), json!({ "$ref": "#/$defs/Action" })))
            .collect();

        json!({
            "title": SCHEMA_TITLE,
            "type": "object",
            "$defs": {
                "Action": {
                    "title": "Action",
                    "type": "object",
                    "properties": {
                        "lateral_action": enum_property(&lateral),
                        "longitudinal_action": enum_property(&longitudinal),
                    },
                    "required": ["lateral_action", "longitudinal_action"],
                    "additionalProperties": false,
                }
            },
            "properties": properties,
            "required": slots,
            "additionalProperties": false,
        })
    }

    fn available_actions(&self) -> AvailableActions {
        let v = self.scenario.ego.initial_state.velocity;
        let v_max = match self.speed_limit() {
            Some(limit) if self.traffic_rules.contains(&TrafficRule::SpeedLimit) => {
                self.v_max.min(limit)
            }
            _ => self.v_max,
        };
        AvailableActions {
            lateral: self.lanes.lateral_actions(),
            longitudinal: self.lanes.longitudinal_actions(v, v_max, self.v_err),
        }
    }
}

/// String property restricted to `values`; a single value is also pinned
/// with `const`.
fn enum_property(values: &[&str]) -> Value {
    let mut property = json!({ "type": "string", "enum": values });
    if let [only] = values {
        property["const"] = json!(only);
    }
    property
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{car, highway_scenario, single_lane_road, slower_leader_scenario, state_at};
    use crate::road_network::RoadNetwork;

    fn describer(scenario: Scenario, config: &Config) -> SceneDescriber {
        let state = scenario.ego.initial_state;
        let network = RoadNetwork::build(&scenario.map, state.position, true, 300.0).unwrap();
        let lanes = EgoLaneNetwork::from_route(&network, &scenario.map, &state, &[], 10.0).unwrap();
        SceneDescriber::new(Arc::new(scenario), lanes, config)
    }

    #[test]
    fn test_highway_offers_left_but_not_right() {
        let d = describer(slower_leader_scenario(), &Config::default());
        let available = d.available_actions();
        assert_eq!(
            available.lateral,
            vec![LateralAction::FollowLane, LateralAction::ChangeLeft]
        );
        assert!(!available.lateral.contains(&LateralAction::ChangeRight));
        assert_eq!(available.longitudinal, LongitudinalAction::ALL.to_vec());
    }

    #[test]
    fn test_standstill_cannot_decelerate() {
        let mut scenario = highway_scenario(Vec::new());
        scenario.ego.initial_state = state_at(50.0, 1.75, 0.0);
        let d = describer(scenario, &Config::default());
        let longitudinal = d.available_actions().longitudinal;
        assert!(!longitudinal.contains(&LongitudinalAction::Decelerate));
        assert!(longitudinal.contains(&LongitudinalAction::Accelerate));
    }

    #[test]
    fn test_schema_shape() {
        let d = describer(slower_leader_scenario(), &Config::default());
        let schema = d.schema(2);
        assert_eq!(schema["title"], "HighLevelDrivingDecision");
        assert_eq!(
            schema["required"],
            json!(["best_combination", "second_best_combination"])
        );
        assert_eq!(
            schema["properties"]["best_combination"]["$ref"],
            "#/$defs/Action"
        );
        let lateral = &schema["$defs"]["Action"]["properties"]["lateral_action"];
        assert_eq!(lateral["enum"], json!(["follow_lane", "left"]));
        assert!(lateral.get("const").is_none());
    }

    #[test]
    fn test_single_value_is_pinned() {
        let mut scenario = highway_scenario(Vec::new());
        scenario.map = single_lane_road();
        let d = describer(scenario, &Config::default());
        let lateral = &d.schema(1)["$defs"]["Action"]["properties"]["lateral_action"];
        assert_eq!(lateral["enum"], json!(["follow_lane"]));
        assert_eq!(lateral["const"], "follow_lane");
    }

    #[test]
    fn test_user_prompt_mentions_obstacles_and_history() {
        let scenario = highway_scenario(vec![car(10, 110.0, 1.75, 15.0), car(11, 30.0, 5.25, 22.0)]);
        let d = describer(scenario, &Config::default());
        let prompt = d.user_prompt(&[Action::FAIL_SAFE]);

        assert!(prompt.starts_with("Here is an overview of your environment:"));
        assert!(prompt.contains("car 10 (5.0 m x 2.0 m): driving in your lane, in front of you at a distance of 60.0 meters"));
        assert!(prompt.contains("car 11 (5.0 m x 2.0 m): driving in the lane to your left, behind you"));
        assert!(prompt.contains("You are driving a vehicle 5.0 m long and 2.0 m wide"));
        assert!(prompt.contains("There is no lane to your right."));
        assert!(prompt.contains("  - (decelerate, follow_lane)"));
    }

    #[test]
    fn test_rules_and_speed_limit_in_prompt() {
        let mut config = Config::default();
        config.verification.traffic_rules = vec![TrafficRule::SafeDistance, TrafficRule::SpeedLimit];
        let mut scenario = slower_leader_scenario();
        let lanelets = scenario
            .map
            .lanelets()
            .cloned()
            .map(|mut l| {
                l.speed_limit = Some(20.0);
                l
            })
            .collect();
        scenario.map = crate::map::LaneletMap::new(lanelets).unwrap();

        let d = describer(scenario, &config);
        let prompt = d.user_prompt(&[]);
        assert!(prompt.contains("R_G1"));
        assert!(prompt.contains("The maximum speed is 20.0 m/s."));
        // ego already drives at the limit
        assert!(!d.available_actions().longitudinal.contains(&LongitudinalAction::Accelerate));
    }

    #[test]
    fn test_system_prompt_lists_actions() {
        let mut config = Config::default();
        config.decision.role = Some("You drive a delivery van.".to_string());
        let d = describer(slower_leader_scenario(), &config);
        let prompt = d.system_prompt();
        assert!(prompt.contains("You drive a delivery van.\n"));
        assert!(prompt.contains("rank the 8 possible combinations"));
        assert!(prompt.contains("Longitudinal actions:\n    - accelerate\n"));
        assert!(prompt.ends_with("Lateral actions:\n    - follow_lane\n    - left"));
    }

    #[test]
    fn test_bearing_quadrants() {
        let o = Point::new(0.0, 0.0);
        let h = Point::new(1.0, 0.0);
        assert_eq!(Bearing::of(o, h, Point::new(10.0, 2.0)), Bearing::InFront);
        assert_eq!(Bearing::of(o, h, Point::new(1.0, 5.0)), Bearing::Left);
        assert_eq!(Bearing::of(o, h, Point::new(-10.0, 0.0)), Bearing::Behind);
        assert_eq!(Bearing::of(o, h, Point::new(0.0, -3.0)), Bearing::Right);
    }
}
