// src/oracle.rs
//
// Ranking oracle contract and the response parser.
//
// The oracle receives the scene text plus a JSON schema and answers with
// one object per ordinal slot:
//
//   { "best_combination":        { "lateral_action": "left", "longitudinal_action": "accelerate" },
//     "second_best_combination": { ... }, ... }

use crate::actions::{Action, LateralAction, LongitudinalAction};
use crate::error::{OracleError, RankingParseError};
use serde::Serialize;
use serde_json::Value;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub schema: Value,
}

pub trait RankingOracle {
    fn rank(&self, request: &RankingRequest) -> Result<Value, OracleError>;
}

impl<T: RankingOracle + ?Sized> RankingOracle for Box<T> {
    fn rank(&self, request: &RankingRequest) -> Result<Value, OracleError> {
        (**self).rank(request)
    }
}

// ============================================================================
// SLOTS
// ============================================================================

const ORDINALS: [&str; 10] = [
    "best",
    "second_best",
    "third_best",
    "fourth_best",
    "fifth_best",
    "sixth_best",
    "seventh_best",
    "eighth_best",
    "ninth_best",
    "tenth_best",
];

/// Field names of the first `k` ranking slots, best first.
pub fn ranking_slot_names(k: usize) -> Vec<String> {
    (0..k)
        .map(|i| match ORDINALS.get(i) {
            Some(ordinal) => format!("{}_combination", ordinal),
            None => format!("{}th_best_combination", i + 1),
        })
        .collect()
}

/// Reads exactly `k` ranked actions from an oracle response.
///
/// Besides the ordinal slots, an `action_ranking` array of pairs is
/// accepted; it must hold at least `k` entries.
pub fn parse_ranking(value: &Value, k: usize) -> Result<Vec<Action>, RankingParseError> {
    let object = value.as_object().ok_or(RankingParseError::NotAnObject)?;

    if let Some(list) = object.get("action_ranking").and_then(Value::as_array) {
        if list.len() < k {
            return Err(RankingParseError::TooFew {
                expected: k,
                found: list.len(),
            });
        }
        return list
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, entry)| parse_pair(&format!("action_ranking[{}]", i), entry))
            .collect();
    }

    ranking_slot_names(k)
        .into_iter()
        .map(|slot| {
            let entry = object
                .get(&slot)
                .ok_or_else(|| RankingParseError::MissingSlot(slot.clone()))?;
            parse_pair(&slot, entry)
        })
        .collect()
}

fn parse_pair(slot: &str, entry: &Value) -> Result<Action, RankingParseError> {
    let invalid = |reason: String| RankingParseError::InvalidAction {
        slot: slot.to_string(),
        reason,
    };
    let field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("missing string field '{}'", name)))
    };

    let lateral: LateralAction = field("lateral_action")?.parse().map_err(invalid)?;
    let longitudinal: LongitudinalAction = field("longitudinal_action")?.parse().map_err(invalid)?;
    let action = Action::new(longitudinal, lateral);
    if !action.is_known() {
        return Err(invalid(format!("{} is not a concrete maneuver", action)));
    }
    Ok(action)
}

// ============================================================================
// HARD DEADLINE
// ============================================================================

/// Runs the wrapped oracle on a worker thread and gives up after
/// `deadline`. A late worker is detached; its answer is discarded.
pub struct DeadlineOracle<O> {
    inner: Arc<O>,
    deadline: Duration,
}

impl<O> DeadlineOracle<O> {
    pub fn new(inner: O, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            deadline,
        }
    }
}

impl<O: RankingOracle + Send + Sync + 'static> RankingOracle for DeadlineOracle<O> {
    fn rank(&self, request: &RankingRequest) -> Result<Value, OracleError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        thread::spawn(move || {
            // the receiver may already be gone after a timeout
            let _ = tx.send(inner.rank(&request));
        });

        match rx.recv_timeout(self.deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("⚠️ Oracle exceeded hard deadline of {:?}", self.deadline);
                Err(OracleError::Timeout(self.deadline))
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Oracle worker exited without answering");
                Err(OracleError::Connection("oracle worker exited without a response".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(lat: &str, lon: &str) -> Value {
        json!({ "lateral_action": lat, "longitudinal_action": lon })
    }

    fn request() -> RankingRequest {
        RankingRequest {
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            schema: json!({}),
        }
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(
            ranking_slot_names(3),
            vec![
                "best_combination",
                "second_best_combination",
                "third_best_combination"
            ]
        );
        assert_eq!(ranking_slot_names(12)[11], "12th_best_combination");
        assert!(ranking_slot_names(0).is_empty());
    }

    #[test]
    fn test_parse_ordinal_slots_in_order() {
        let value = json!({
            "second_best_combination": pair("follow_lane", "keep"),
            "best_combination": pair("left", "accelerate"),
            "third_best_combination": pair("follow_lane", "decelerate"),
        });
        let ranking = parse_ranking(&value, 3).unwrap();
        assert_eq!(
            ranking,
            vec![
                Action::new(LongitudinalAction::Accelerate, LateralAction::ChangeLeft),
                Action::new(LongitudinalAction::Keep, LateralAction::FollowLane),
                Action::FAIL_SAFE,
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_ranking(&json!([1, 2]), 1), Err(RankingParseError::NotAnObject));

        let value = json!({ "best_combination": pair("left", "keep") });
        assert_eq!(
            parse_ranking(&value, 2),
            Err(RankingParseError::MissingSlot("second_best_combination".to_string()))
        );

        let value = json!({ "best_combination": pair("diagonal", "keep") });
        assert!(matches!(
            parse_ranking(&value, 1),
            Err(RankingParseError::InvalidAction { .. })
        ));

        let value = json!({ "best_combination": pair("unknown", "keep") });
        assert!(matches!(
            parse_ranking(&value, 1),
            Err(RankingParseError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_parse_ranking_array() {
        let value = json!({ "action_ranking": [pair("right", "stop"), pair("follow_lane", "keep")] });
        assert_eq!(
            parse_ranking(&value, 3),
            Err(RankingParseError::TooFew {
                expected: 3,
                found: 2
            })
        );
        let ranking = parse_ranking(&value, 1).unwrap();
        assert_eq!(
            ranking,
            vec![Action::new(LongitudinalAction::Stop, LateralAction::ChangeRight)]
        );
    }

    struct Sleepy(Duration);

    impl RankingOracle for Sleepy {
        fn rank(&self, _request: &RankingRequest) -> Result<Value, OracleError> {
            thread::sleep(self.0);
            Ok(json!({ "done": true }))
        }
    }

    #[test]
    fn test_deadline_oracle_times_out() {
        let oracle = DeadlineOracle::new(Sleepy(Duration::from_millis(500)), Duration::from_millis(20));
        assert!(matches!(oracle.rank(&request()), Err(OracleError::Timeout(_))));
    }

    #[test]
    fn test_deadline_oracle_passes_answer_through() {
        let oracle = DeadlineOracle::new(Sleepy(Duration::ZERO), Duration::from_secs(5));
        assert_eq!(oracle.rank(&request()).unwrap(), json!({ "done": true }));
    }
}
