// src/verification/prediction.rs
//
// Occupancy of other traffic over the horizon, expressed along the ego
// reference path: per step, the lanelets an obstacle touches plus its
// longitudinal extent `s` and speed `v` along the path.
//
// MostLikely: the recorded (or constant-velocity) trajectory, one interval
//             of vehicle length per step.
// SetBased:   the same trajectory inflated by ±a_max·t²/2 in position and
//             ±a_max·t in speed, so any behaviour within the acceleration
//             bound stays inside the predicted set.

use crate::geometry::{Interval, ReferencePath};
use crate::map::LaneletMap;
use crate::scenario::Obstacle;
use crate::types::{LaneletId, ObstacleId};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    #[default]
    MostLikely,
    SetBased,
}

impl PredictionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MostLikely => "most_likely",
            Self::SetBased => "set_based",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyStep {
    pub lanelets: Vec<LaneletId>,
    pub s: Interval,
    pub v: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictedOccupancy {
    pub obstacle_id: ObstacleId,
    /// Index = time step, 0 ..= horizon
    pub steps: Vec<OccupancyStep>,
}

impl PredictedOccupancy {
    pub fn at(&self, step: usize) -> Option<&OccupancyStep> {
        self.steps.get(step)
    }
}

pub struct OccupancyPredictor<'a> {
    map: &'a LaneletMap,
    reference: &'a ReferencePath,
    mode: PredictionMode,
    dt: f64,
    /// Step size of the recorded trajectories
    recording_dt: f64,
    horizon: usize,
    a_max: f64,
}

impl<'a> OccupancyPredictor<'a> {
    pub fn new(
        map: &'a LaneletMap,
        reference: &'a ReferencePath,
        mode: PredictionMode,
        dt: f64,
        recording_dt: f64,
        horizon: usize,
        a_max: f64,
    ) -> Self {
        Self {
            map,
            reference,
            mode,
            dt,
            recording_dt,
            horizon,
            a_max,
        }
    }

    pub fn predict(&self, obstacle: &Obstacle) -> PredictedOccupancy {
        let half_length = obstacle.length * 0.5;
        let steps = (0..=self.horizon)
            .map(|k| {
                let t = k as f64 * self.dt;
                let state = obstacle.state_at_time(t, self.recording_dt);
                let projection = self.reference.project(state.position);
                let along = state.heading().dot(self.reference.tangent_at(projection.s));
                let mut s = Interval::new(projection.s - half_length, projection.s + half_length);
                let mut v = Interval::point(state.velocity * along);

                if self.mode == PredictionMode::SetBased {
                    s = s.inflate(0.5 * self.a_max * t * t);
                    v = v.inflate(self.a_max * t);
                }

                OccupancyStep {
                    lanelets: self.map.find_lanelets_by_position(state.position),
                    s,
                    v,
                }
            })
            .collect();

        PredictedOccupancy {
            obstacle_id: obstacle.id,
            steps,
        }
    }

    pub fn predict_all<'o>(&self, obstacles: impl IntoIterator<Item = &'o Obstacle>) -> Vec<PredictedOccupancy> {
        let predictions: Vec<PredictedOccupancy> =
            obstacles.into_iter().map(|o| self.predict(o)).collect();
        debug!(
            "Predicted {} obstacles over {} steps ({})",
            predictions.len(),
            self.horizon,
            self.mode.as_str()
        );
        predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{car, two_lane_highway};
    use crate::geometry::Point;

    fn reference() -> ReferencePath {
        ReferencePath::new(vec![Point::new(0.0, 1.75), Point::new(400.0, 1.75)]).unwrap()
    }

    #[test]
    fn test_most_likely_follows_constant_velocity() {
        let map = two_lane_highway();
        let reference = reference();
        let predictor = OccupancyPredictor::new(&map, &reference, PredictionMode::MostLikely, 0.1, 0.1, 30, 3.0);
        let occupancy = predictor.predict(&car(10, 110.0, 1.75, 15.0));

        assert_eq!(occupancy.steps.len(), 31);
        let first = occupancy.at(0).unwrap();
        assert_eq!(first.lanelets, vec![1]);
        assert!((first.s.lo - 107.5).abs() < 1e-9);
        let last = occupancy.at(30).unwrap();
        assert!((last.s.lo - 152.5).abs() < 1e-9);
        assert_eq!(last.v, Interval::point(15.0));
    }

    #[test]
    fn test_set_based_grows_with_time() {
        let map = two_lane_highway();
        let reference = reference();
        let predictor = OccupancyPredictor::new(&map, &reference, PredictionMode::SetBased, 0.1, 0.1, 30, 3.0);
        let occupancy = predictor.predict(&car(10, 110.0, 5.25, 15.0));

        assert_eq!(occupancy.at(0).unwrap().s.length(), 5.0);
        let last = occupancy.at(30).unwrap();
        // 0.5 * 3 * 3^2 on each side
        assert!((last.s.length() - (5.0 + 27.0)).abs() < 1e-9);
        assert!((last.v.lo - 6.0).abs() < 1e-9);
        assert!((last.v.hi - 24.0).abs() < 1e-9);
        assert_eq!(last.lanelets, vec![3]);
    }

    #[test]
    fn test_recording_rate_differs_from_step_size() {
        let map = two_lane_highway();
        let reference = reference();
        // 25 Hz recording over the first second at a constant 20 m/s
        let mut leader = car(10, 110.0, 1.75, 20.0);
        leader.trajectory = (1..=25)
            .map(|k| leader.initial_state.extrapolate(k, 0.04))
            .collect();

        let predictor = OccupancyPredictor::new(&map, &reference, PredictionMode::MostLikely, 0.1, 0.04, 30, 3.0);
        let occupancy = predictor.predict(&leader);

        let centre = |step: usize| occupancy.at(step).unwrap().s.lo + 2.5;
        assert!((centre(5) - 120.0).abs() < 1e-6);
        assert!((centre(30) - 170.0).abs() < 1e-6, "leader at {:.2}", centre(30));
    }

    #[test]
    fn test_off_map_obstacle_touches_no_lanelet() {
        let map = two_lane_highway();
        let reference = reference();
        let predictor = OccupancyPredictor::new(&map, &reference, PredictionMode::MostLikely, 0.1, 0.1, 2, 3.0);
        let occupancy = predictor.predict(&car(1, -30.0, 1.75, 0.0));
        assert!(occupancy.steps.iter().all(|s| s.lanelets.is_empty()));
    }
}
