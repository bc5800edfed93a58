// src/verification/mod.rs
//
// Formal safety check of a single candidate action.
//
// Flow per candidate:
//   Action ─→ translator ──┐
//   TrafficRule ─→ rules ──┼→ VerificationConfiguration overlay ─→ ReachRequest
//   Obstacles ─→ prediction┘                                          │
//                                   ReachabilityEngine (interval_engine)
//                                                                     │
//                                  SAFE iff layer h is non-empty  ←───┘
//
// Orchestrated by verifier::SafetyVerifier.

pub mod interval_engine;
pub mod prediction;
pub mod reach;
pub mod rules;
pub mod translator;
pub mod verifier;

pub use interval_engine::IntervalReachEngine;
pub use prediction::{OccupancyPredictor, PredictedOccupancy, PredictionMode};
pub use reach::{Corridor, ReachRequest, ReachabilityEngine, ReachableSets};
pub use rules::TrafficRule;
pub use translator::{Formula, Prop, Specification};
pub use verifier::{SafetyVerifier, VerificationConfiguration, VerifierState};
