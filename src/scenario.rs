// src/scenario.rs
//
// Scene snapshot consumed read-only by the decision loop: lanelet map,
// dynamic obstacles with their kinematic states, and the ego vehicle.

use crate::geometry::Point;
use crate::map::LaneletMap;
use crate::types::{LaneletId, ObstacleId};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub position: Point,
    /// Longitudinal speed (m/s)
    pub velocity: f64,
    /// Heading (rad)
    pub orientation: f64,
    #[serde(default)]
    pub acceleration: f64,
    #[serde(default)]
    pub time_step: usize,
}

impl State {
    pub fn heading(&self) -> Point {
        Point::heading(self.orientation)
    }

    /// Constant-velocity extrapolation by `steps` steps of `dt`.
    pub fn extrapolate(&self, steps: usize, dt: f64) -> State {
        State {
            time_step: self.time_step + steps,
            ..self.advance(steps as f64 * dt)
        }
    }

    /// Constant-velocity extrapolation by `t` seconds. The time step is kept.
    pub fn advance(&self, t: f64) -> State {
        State {
            position: self.position.add(self.heading().scale(self.velocity * t)),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleType {
    #[default]
    Car,
    Truck,
    Bus,
    Motorcycle,
    Bicycle,
    Pedestrian,
    Unknown,
}

impl ObstacleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Truck => "truck",
            Self::Bus => "bus",
            Self::Motorcycle => "motorcycle",
            Self::Bicycle => "bicycle",
            Self::Pedestrian => "pedestrian",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(
            self,
            Self::Car | Self::Truck | Self::Bus | Self::Motorcycle | Self::Bicycle
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    #[serde(default)]
    pub obstacle_type: ObstacleType,
    pub length: f64,
    pub width: f64,
    pub initial_state: State,
    /// Recorded future states, ordered by time step
    #[serde(default)]
    pub trajectory: Vec<State>,
}

impl Obstacle {
    /// State `step` steps after the initial one. Beyond the recording the
    /// last known state is extrapolated at constant velocity.
    pub fn state_at(&self, step: usize, dt: f64) -> State {
        if step == 0 {
            return self.initial_state;
        }
        let target = self.initial_state.time_step + step;
        if let Some(state) = self.trajectory.iter().find(|s| s.time_step == target) {
            return *state;
        }
        let last = self
            .trajectory
            .iter()
            .filter(|s| s.time_step < target)
            .max_by_key(|s| s.time_step)
            .copied()
            .unwrap_or(self.initial_state);
        last.extrapolate(target - last.time_step, dt)
    }

    /// State `t` seconds after the initial one, for a trajectory recorded
    /// every `recording_dt` seconds. Between two recorded states position
    /// and speed are interpolated linearly.
    pub fn state_at_time(&self, t: f64, recording_dt: f64) -> State {
        if t <= 0.0 {
            return self.initial_state;
        }
        if !(recording_dt > 0.0) {
            return self.initial_state.advance(t);
        }

        let steps = t / recording_dt;
        let nearest = steps.round();
        if (steps - nearest).abs() < 1e-6 {
            return self.state_at(nearest as usize, recording_dt);
        }

        let before = self.state_at(steps.floor() as usize, recording_dt);
        let after = self.state_at(steps.floor() as usize + 1, recording_dt);
        let w = steps.fract();
        State {
            position: before.position.add(after.position.sub(before.position).scale(w)),
            velocity: before.velocity + (after.velocity - before.velocity) * w,
            ..before
        }
    }

    /// Initial state followed by the recorded ones.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        std::iter::once(&self.initial_state).chain(self.trajectory.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgoVehicle {
    pub initial_state: State,
    pub length: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    /// Step size of the recorded trajectories (s)
    pub dt: f64,
    pub map: LaneletMap,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    pub ego: EgoVehicle,
    /// Planning goal; empty means "keep driving"
    #[serde(default)]
    pub goal_lanelets: Vec<LaneletId>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        if !(scenario.dt > 0.0) {
            bail!("Scenario {} has non-positive dt {}", scenario.id, scenario.dt);
        }
        Ok(scenario)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles
            .iter()
            .filter(|o| o.obstacle_type.is_vehicle())
    }

    /// Lowest posted limit over the given lanelets.
    pub fn speed_limit(&self, lanelets: &[LaneletId]) -> Option<f64> {
        lanelets
            .iter()
            .filter_map(|id| self.map.get(*id))
            .filter_map(|l| l.speed_limit)
            .reduce(f64::min)
    }
}
