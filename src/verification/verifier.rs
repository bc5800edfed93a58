// src/verification/verifier.rs
//
// Safety verifier state machine:
//
//   Idle ──verify()──▶ Reset ──overlay ready──▶ Computing ──▶ Safe | Unsafe
//
// Reset clones the immutable base configuration into a per-call overlay and
// writes the action's bounds and clauses into it; the overlay is dropped
// when the call returns. Computing is fail-closed: an engine error, too few
// layers or an empty layer at the horizon all end in Unsafe.

use super::interval_engine::IntervalReachEngine;
use super::prediction::OccupancyPredictor;
use super::reach::{Corridor, ReachRequest, ReachabilityEngine, ReachableSets};
use super::rules::{translate_rules, RuleContext};
use super::translator::{translate, Formula, Specification};
use crate::actions::Action;
use crate::decider::{ActionVerifier, VerificationStatus};
use crate::error::TopologyError;
use crate::road_network::EgoLaneNetwork;
use crate::scenario::{Obstacle, Scenario};
use crate::types::{Config, EgoBounds, OtherVehicleBounds, VerificationSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierState {
    Idle,
    Reset,
    Computing,
    Safe,
    Unsafe,
}

impl VerifierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Reset => "RESET",
            Self::Computing => "COMPUTING",
            Self::Safe => "SAFE",
            Self::Unsafe => "UNSAFE",
        }
    }
}

/// Everything a verification call reads. The verifier keeps one as its
/// base and derives a fresh overlay from it for every action.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfiguration {
    pub ego: EgoBounds,
    pub other: OtherVehicleBounds,
    pub horizon: usize,
    pub dt: f64,
    pub a_lim: f64,
    pub v_err: f64,
    pub settings: VerificationSettings,
    /// Clauses checked for every action (parsed `activated_rules`)
    pub specification: Specification,
    /// Braking capability used in the safe-distance formula
    pub ego_braking: f64,
}

impl VerificationConfiguration {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut specification = Specification::default();
        for rule in &config.verification.activated_rules {
            let formula: Formula = rule
                .parse()
                .with_context(|| format!("Invalid activated rule '{}'", rule))?;
            specification.push(formula);
        }
        Ok(Self {
            ego: config.vehicle.ego.clone(),
            other: config.vehicle.other.clone(),
            horizon: config.decision.horizon,
            dt: config.decision.dt,
            a_lim: config.decision.a_lim,
            v_err: config.decision.v_err,
            settings: config.verification.clone(),
            specification,
            ego_braking: config.vehicle.ego.a_lon_min,
        })
    }
}

pub struct SafetyVerifier<E = IntervalReachEngine> {
    base: VerificationConfiguration,
    scenario: Arc<Scenario>,
    lanes: EgoLaneNetwork,
    corridor: Corridor,
    engine: E,
    state: VerifierState,
    last_sets: Option<ReachableSets>,
}

impl<E: ReachabilityEngine> SafetyVerifier<E> {
    pub fn new(
        base: VerificationConfiguration,
        scenario: Arc<Scenario>,
        lanes: EgoLaneNetwork,
        engine: E,
    ) -> Result<Self, TopologyError> {
        let corridor = Corridor::new(&scenario.map, &lanes)?;
        Ok(Self {
            base,
            scenario,
            lanes,
            corridor,
            engine,
            state: VerifierState::Idle,
            last_sets: None,
        })
    }

    pub fn state(&self) -> VerifierState {
        self.state
    }

    pub fn base(&self) -> &VerificationConfiguration {
        &self.base
    }

    pub fn lanes(&self) -> &EgoLaneNetwork {
        &self.lanes
    }

    /// Sets of the most recent call that reached the engine.
    pub fn last_reachable_sets(&self) -> Option<&ReachableSets> {
        self.last_sets.as_ref()
    }

    fn transition(&mut self, next: VerifierState) {
        debug!("Verifier: {} → {}", self.state.as_str(), next.as_str());
        self.state = next;
    }

    /// Per-call configuration for `action` plus any synthetic obstacles the
    /// traffic rules ask for. The base is left untouched.
    pub fn overlay_for(&self, action: &Action) -> Result<(VerificationConfiguration, Vec<Obstacle>)> {
        let base = &self.base;
        let mut overlay = base.clone();

        let translation = translate(action, &self.lanes, &base.ego, base.a_lim)?;
        overlay.ego.a_lon_min = translation.a_lon_min;
        overlay.ego.a_lon_max = translation.a_lon_max;
        overlay.specification.extend(translation.clauses);

        // the phantom is read back at the recording rate, so it is built at it
        let recording_dt = self.scenario.dt;
        let recorded_steps = (base.horizon as f64 * base.dt / recording_dt - 1e-9).ceil().max(0.0) as usize;
        let ego_state = self.scenario.ego.initial_state;
        let rules = translate_rules(
            &base.settings.traffic_rules,
            &RuleContext {
                scenario: &self.scenario,
                ego_lane: &self.lanes.lane,
                ego: &ego_state,
                settings: &base.settings,
                a_brake: base.other.a_brake,
                dt: recording_dt,
                horizon: recorded_steps,
            },
        );
        overlay.specification.extend(rules.clauses);
        if let Some(floor) = rules.a_lon_min_floor {
            overlay.ego.a_lon_min = overlay.ego.a_lon_min.max(floor);
            overlay.ego_braking = base.ego_braking.max(floor);
        }
        if let Some(cap) = rules.v_lon_max_cap {
            overlay.ego.v_lon_max = overlay.ego.v_lon_max.min(cap);
        }

        Ok((overlay, rules.phantom.into_iter().collect()))
    }

    fn run(&mut self, action: &Action) -> Result<VerificationStatus> {
        self.transition(VerifierState::Reset);
        let (overlay, phantoms) = match self.overlay_for(action) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.transition(VerifierState::Idle);
                return Err(e.context(format!("cannot verify {}", action)));
            }
        };

        let predictor = OccupancyPredictor::new(
            &self.scenario.map,
            self.corridor.reference(),
            overlay.settings.prediction_mode,
            overlay.dt,
            self.scenario.dt,
            overlay.horizon,
            overlay.other.a_max,
        );
        let occupancies = predictor.predict_all(self.scenario.vehicles().chain(phantoms.iter()));

        let ego = self.scenario.ego.initial_state;
        let request = ReachRequest {
            corridor: &self.corridor,
            initial_s: self.corridor.project(ego.position).s,
            initial_v: ego.velocity,
            ego_length: self.scenario.ego.length,
            bounds: &overlay.ego,
            specification: &overlay.specification,
            occupancies: &occupancies,
            dt: overlay.dt,
            horizon: overlay.horizon,
            v_err: overlay.v_err,
            lane_width: overlay.settings.lane_width,
            reaction_time: overlay.settings.reaction_time,
            ego_braking: overlay.ego_braking,
            other_braking: overlay.other.a_brake,
        };

        self.state = VerifierState::Computing;
        debug!("Verifier: RESET → COMPUTING {} with {}", action, overlay.specification);
        let sets = match self.engine.compute_reachable_sets(&request) {
            Ok(sets) => sets,
            Err(e) => {
                error!("❌ Reachability computation failed for {}: {:#}", action, e);
                self.last_sets = None;
                self.transition(VerifierState::Unsafe);
                return Ok(VerificationStatus::Unsafe);
            }
        };

        let h = overlay.horizon;
        let status = if sets.num_layers() < h + 1 {
            debug!("{}: only {} of {} layers computed", action, sets.num_layers(), h + 1);
            VerificationStatus::Unsafe
        } else if sets.is_empty_at(h) {
            VerificationStatus::Unsafe
        } else {
            VerificationStatus::Safe
        };
        self.last_sets = Some(sets);

        self.transition(match status {
            VerificationStatus::Safe => VerifierState::Safe,
            VerificationStatus::Unsafe => VerifierState::Unsafe,
        });
        info!("Verified {} → {}", action, status.as_str());
        Ok(status)
    }
}

impl<E: ReachabilityEngine> ActionVerifier for SafetyVerifier<E> {
    fn verify(&mut self, action: &Action) -> Result<VerificationStatus> {
        self.run(action)
    }
}
