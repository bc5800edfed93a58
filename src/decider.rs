// src/decider.rs
//
// One decision cycle:
//
//   SceneDescription ──prompts/schema──▶ RankingOracle ──JSON──▶ parse_ranking
//          │                                                       │
//          │                     k ranked actions (best first)     ▼
//          └──────────────────────────────────────────────▶ ActionVerifier
//                                                                  │
//                                       first SAFE candidate wins ─┘
//
// Oracle failures and unparsable answers both fall back to k copies of the
// fail-safe action with the fixed 30 s inference sentinel. If no candidate
// verifies, the fail-safe action is returned with index k.

use crate::actions::Action;
use crate::describer::SceneDescription;
use crate::oracle::{parse_ranking, RankingOracle, RankingRequest};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Inference duration reported when the oracle could not be used.
pub const FALLBACK_INFERENCE_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Safe,
    Unsafe,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Unsafe => "UNSAFE",
        }
    }

    pub fn is_safe(&self) -> bool {
        *self == Self::Safe
    }
}

/// Safety check for one candidate. An `Err` means the candidate could not
/// be checked at all (e.g. a violated precondition).
pub trait ActionVerifier {
    fn verify(&mut self, action: &Action) -> Result<VerificationStatus>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Oracle ranking, best first
    pub ranking: Vec<Action>,
    /// Index of the chosen candidate; `ranking.len()` when none was safe
    pub verified_index: usize,
    /// Seconds spent waiting for the oracle
    pub inference_duration: f64,
    /// Seconds spent parsing the ranking and verifying candidates
    pub verification_duration: f64,
}

impl Decision {
    pub fn is_fail_safe(&self) -> bool {
        self.verified_index >= self.ranking.len()
    }

    pub fn action(&self) -> Action {
        self.ranking
            .get(self.verified_index)
            .copied()
            .unwrap_or(Action::FAIL_SAFE)
    }
}

pub struct Decider<S, O, V> {
    describer: S,
    oracle: O,
    verifier: V,
    k: usize,
    history: VecDeque<Action>,
    history_len: usize,
}

impl<S, O, V> Decider<S, O, V>
where
    S: SceneDescription,
    O: RankingOracle,
    V: ActionVerifier,
{
    pub fn new(describer: S, oracle: O, verifier: V, k: usize, history_len: usize) -> Self {
        Self {
            describer,
            oracle,
            verifier,
            k,
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Actions taken in earlier cycles, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Action> {
        self.history.iter()
    }

    /// Runs one cycle with the decider's own history and records the
    /// chosen action.
    pub fn step(&mut self) -> Decision {
        let past: Vec<Action> = self.history.iter().copied().collect();
        let decision = self.decide(&past);
        self.record(decision.action());
        decision
    }

    fn record(&mut self, action: Action) {
        if self.history_len == 0 {
            return;
        }
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(action);
    }

    /// Never fails: worst case is the fail-safe action with index `k`.
    pub fn decide(&mut self, past_actions: &[Action]) -> Decision {
        let started = Instant::now();
        let response = self.query_oracle(past_actions);
        let mut inference_duration = started.elapsed().as_secs_f64();

        let started = Instant::now();
        let ranking = match response.and_then(|r| self.parse(&r)) {
            Some(ranking) => ranking,
            None => {
                inference_duration = FALLBACK_INFERENCE_SECS;
                vec![Action::FAIL_SAFE; self.k]
            }
        };
        let verified_index = self.first_safe(&ranking);
        let verification_duration = started.elapsed().as_secs_f64();

        let decision = Decision {
            ranking,
            verified_index,
            inference_duration,
            verification_duration,
        };
        if decision.is_fail_safe() {
            warn!(
                "⚠️ No candidate verified safe, falling back to {}",
                Action::FAIL_SAFE
            );
        } else {
            info!(
                "✅ Decided {} (rank {} of {}) | inference {:.2}s | verification {:.2}s",
                decision.action(),
                verified_index,
                decision.ranking.len(),
                inference_duration,
                verification_duration
            );
        }
        decision
    }

    /// `None` when the oracle failed; the caller falls back.
    fn query_oracle(&self, past_actions: &[Action]) -> Option<Value> {
        let request = RankingRequest {
            system_prompt: self.describer.system_prompt(),
            user_prompt: self.describer.user_prompt(past_actions),
            schema: self.describer.schema(self.k),
        };
        match self.oracle.rank(&request) {
            Ok(response) => Some(response),
            Err(e) => {
                error!("❌ Ranking oracle failed: {}", e);
                None
            }
        }
    }

    fn parse(&self, response: &Value) -> Option<Vec<Action>> {
        match parse_ranking(response, self.k) {
            Ok(ranking) => {
                debug!("Oracle ranking: {:?}", ranking);
                Some(ranking)
            }
            Err(e) => {
                warn!("⚠️ Unusable oracle ranking ({}), using fail-safe ranking", e);
                None
            }
        }
    }

    fn first_safe(&mut self, ranking: &[Action]) -> usize {
        for (index, action) in ranking.iter().enumerate() {
            match self.verifier.verify(action) {
                Ok(VerificationStatus::Safe) => return index,
                Ok(VerificationStatus::Unsafe) => {
                    debug!("Candidate {} {} is unsafe", index, action);
                }
                Err(e) => {
                    warn!("⚠️ Skipping candidate {} {}: {:#}", index, action, e);
                }
            }
        }
        ranking.len()
    }
}
