// src/actions.rs
//
// Closed action vocabulary. A decision is always a (longitudinal, lateral)
// pair; the wire values below are what the ranking oracle sees and returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongitudinalAction {
    Accelerate,
    Decelerate,
    Keep,
    Stop,
    Unknown,
}

impl LongitudinalAction {
    pub const ALL: [LongitudinalAction; 4] = [
        LongitudinalAction::Accelerate,
        LongitudinalAction::Decelerate,
        LongitudinalAction::Keep,
        LongitudinalAction::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerate => "accelerate",
            Self::Decelerate => "decelerate",
            Self::Keep => "keep",
            Self::Stop => "stop",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LongitudinalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LongitudinalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accelerate" => Ok(Self::Accelerate),
            "decelerate" => Ok(Self::Decelerate),
            "keep" => Ok(Self::Keep),
            "stop" => Ok(Self::Stop),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown longitudinal action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LateralAction {
    #[serde(rename = "left")]
    ChangeLeft,
    #[serde(rename = "right")]
    ChangeRight,
    #[serde(rename = "follow_lane")]
    FollowLane,
    #[serde(rename = "unknown")]
    Unknown,
}

impl LateralAction {
    pub const ALL: [LateralAction; 3] = [
        LateralAction::FollowLane,
        LateralAction::ChangeLeft,
        LateralAction::ChangeRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeLeft => "left",
            Self::ChangeRight => "right",
            Self::FollowLane => "follow_lane",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LateralAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LateralAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left" | "change_left" => Ok(Self::ChangeLeft),
            "right" | "change_right" => Ok(Self::ChangeRight),
            "follow_lane" => Ok(Self::FollowLane),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown lateral action '{}'", other)),
        }
    }
}

/// Atomic decision unit. Never mutated once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Action {
    pub longitudinal: LongitudinalAction,
    pub lateral: LateralAction,
}

impl Action {
    /// Fail-safe maneuver: slow down and stay in lane.
    pub const FAIL_SAFE: Action = Action {
        longitudinal: LongitudinalAction::Decelerate,
        lateral: LateralAction::FollowLane,
    };

    pub const fn new(longitudinal: LongitudinalAction, lateral: LateralAction) -> Self {
        Self {
            longitudinal,
            lateral,
        }
    }

    pub fn is_known(&self) -> bool {
        self.longitudinal != LongitudinalAction::Unknown && self.lateral != LateralAction::Unknown
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.longitudinal, self.lateral)
    }
}

impl From<(LongitudinalAction, LateralAction)> for Action {
    fn from((longitudinal, lateral): (LongitudinalAction, LateralAction)) -> Self {
        Self::new(longitudinal, lateral)
    }
}
