// src/error.rs
//
// Typed errors at the module boundaries. Application plumbing uses anyhow.

use crate::actions::{Action, LateralAction};
use crate::types::LaneletId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("lanelet {0} does not exist in the map")]
    UnknownLanelet(LaneletId),
    #[error("lanelet {id} is malformed: {reason}")]
    InvalidLanelet { id: LaneletId, reason: String },
    #[error("position ({x:.2}, {y:.2}) is not on any lanelet")]
    OffMap { x: f64, y: f64 },
    #[error("no lane of the road network contains the ego vehicle")]
    EgoLaneNotFound,
}

/// Raised when an action cannot be expressed for the current lane layout.
/// A lateral action without a lane on that side means the feasible-action
/// set offered to the oracle was wrong.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no {side} adjacent lane for action {action}")]
    MissingAdjacentLane {
        side: &'static str,
        action: LateralAction,
    },
    #[error("action {0} has no specification mapping")]
    Unsupported(Action),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("oracle did not answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed oracle output: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Connection and decode failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Malformed(_))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RankingParseError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing ranking slot '{0}'")]
    MissingSlot(String),
    #[error("slot '{slot}' holds an invalid action: {reason}")]
    InvalidAction { slot: String, reason: String },
    #[error("expected {expected} ranked actions, parsed {found}")]
    TooFew { expected: usize, found: usize },
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot parse formula '{input}': {reason}")]
pub struct FormulaParseError {
    pub input: String,
    pub reason: String,
}
