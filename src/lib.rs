// src/lib.rs
//
// High-level maneuver decisions: a language model ranks candidate
// (longitudinal, lateral) actions and reachability analysis picks the
// first one that stays safe over the horizon.
//
//   scenario/map ─→ road_network ─→ describer ─→ oracle ─→ decider
//                          │                                  │
//                          └────────→ verification ←──────────┘

pub mod actions;
pub mod config;
pub mod decider;
pub mod describer;
pub mod error;
pub mod geometry;
pub mod labeler;
pub mod llm_client;
pub mod map;
pub mod oracle;
pub mod road_network;
pub mod scenario;
pub mod types;
pub mod verification;

#[cfg(test)]
mod fixtures;

pub use actions::{Action, LateralAction, LongitudinalAction};
pub use decider::{ActionVerifier, Decider, Decision, VerificationStatus};
pub use types::Config;
