// src/types.rs
//
// Shared identifiers and the configuration tree loaded from config.yaml.
// Every section falls back to its Default so a partial file is enough.

use crate::verification::prediction::PredictionMode;
use crate::verification::rules::TrafficRule;
use serde::{Deserialize, Serialize};

pub type LaneletId = u64;
pub type ObstacleId = u64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub decision: DecisionConfig,
    pub oracle: OracleConfig,
    pub vehicle: VehicleConfig,
    pub verification: VerificationSettings,
    pub logging: LoggingConfig,
    /// Scenario file consumed by the binary
    pub scenario_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Number of ranked candidates requested from the oracle
    pub k: usize,
    /// Acceleration threshold separating accelerate / keep / decelerate (m/s²)
    pub a_lim: f64,
    /// Verification horizon in discrete steps
    pub horizon: usize,
    /// Step size (s)
    pub dt: f64,
    /// Velocity below which the vehicle counts as standing still (m/s)
    pub v_err: f64,
    /// How many past actions are mentioned in the scene description
    pub history_len: usize,
    pub role: Option<String>,
    pub goal: Option<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            k: 3,
            a_lim: 1.0,
            horizon: 30,
            dt: 0.1,
            v_err: 0.1,
            history_len: 5,
            role: None,
            goal: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible chat completions endpoint
    pub url: String,
    pub model: String,
    /// Environment variable holding the API key (may be unset for local servers)
    pub api_key_env: String,
    pub temperature: f64,
    /// Request-level timeout of the HTTP client
    pub timeout_secs: u64,
    /// Attempts for transient decode/connection errors
    pub retry_limit: u32,
    /// If set, the oracle call is abandoned after this wall-clock deadline
    pub hard_deadline_secs: Option<u64>,
    /// If set, every prompt/response pair is written here as JSON
    pub transcript_dir: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4.1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.6,
            timeout_secs: 30,
            retry_limit: 1,
            hard_deadline_secs: None,
            transcript_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub ego: EgoBounds,
    pub other: OtherVehicleBounds,
}

/// Dynamic bounds of the ego vehicle. The verifier overwrites the
/// longitudinal acceleration/velocity fields per action on a copy.
/// Vehicle dimensions come from the scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgoBounds {
    pub v_lon_min: f64,
    pub v_lon_max: f64,
    pub a_lon_min: f64,
    pub a_lon_max: f64,
    pub v_lat_min: f64,
    pub v_lat_max: f64,
    pub a_lat_min: f64,
    pub a_lat_max: f64,
}

impl Default for EgoBounds {
    fn default() -> Self {
        Self {
            v_lon_min: 0.0,
            v_lon_max: 40.0,
            a_lon_min: -8.0,
            a_lon_max: 3.0,
            v_lat_min: -2.0,
            v_lat_max: 2.0,
            a_lat_min: -4.0,
            a_lat_max: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtherVehicleBounds {
    /// Magnitude used to inflate set-based occupancy predictions (m/s²)
    pub a_max: f64,
    /// Worst-case braking of a leading vehicle (m/s², negative)
    pub a_brake: f64,
}

impl Default for OtherVehicleBounds {
    fn default() -> Self {
        Self {
            a_max: 3.0,
            a_brake: -8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    pub prediction_mode: PredictionMode,
    pub traffic_rules: Vec<TrafficRule>,
    /// Extra formulas in LTL text form, conjoined with every check
    pub activated_rules: Vec<String>,
    /// Nominal lane width used for the lane-change duration (m)
    pub lane_width: f64,
    /// Lane merging lookahead (m)
    pub lookahead: f64,
    pub consider_reversed: bool,
    /// Route planner cost of one lane change (m equivalent)
    pub lane_change_cost: f64,
    /// Reaction time in the safe-distance formula (s)
    pub reaction_time: f64,
    /// Strongest deceleration allowed when abrupt braking is prohibited (m/s²)
    pub abrupt_braking_limit: f64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            prediction_mode: PredictionMode::MostLikely,
            traffic_rules: Vec::new(),
            activated_rules: Vec::new(),
            lane_width: 3.5,
            lookahead: 300.0,
            consider_reversed: true,
            lane_change_cost: 10.0,
            reaction_time: 0.3,
            abrupt_braking_limit: -4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "maneuver_decider=info".to_string(),
        }
    }
}
