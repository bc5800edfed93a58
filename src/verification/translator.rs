// src/verification/translator.rs
//
// Action → temporal-logic clauses + longitudinal acceleration bounds.
//
//   ACCELERATE   a ∈ [a_lim, a_max]          (no clause)
//   DECELERATE   a ∈ [a_min, -a_lim]         (no clause)
//   KEEP         a ∈ [-a_lim, a_lim]         (no clause)
//   STOP         FG (InStandstill)
//   CHANGE_LEFT  FG (InLanelet_a | InLanelet_b | ...)   left lanes
//   CHANGE_RIGHT FG (...)                               right lanes
//   FOLLOW_LANE  G (...) over the ego lane, or `true` without neighbours

use crate::actions::{Action, LateralAction, LongitudinalAction};
use crate::error::{FormulaParseError, TranslateError};
use crate::road_network::EgoLaneNetwork;
use crate::types::{EgoBounds, LaneletId, ObstacleId};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FORMULAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prop {
    /// Disjunction of lanelet memberships
    InLanelets(Vec<LaneletId>),
    InStandstill,
    SafeDistance(ObstacleId),
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::InLanelets(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| format!("InLanelet_{}", id)).collect();
                f.write_str(&parts.join(" | "))
            }
            Prop::InStandstill => f.write_str("InStandstill"),
            Prop::SafeDistance(id) => write!(f, "SafeDistance_V{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    True,
    /// Must hold at every step
    Globally(Prop),
    /// Must hold from some step on until the horizon
    EventuallyGlobally(Prop),
}

impl Formula {
    /// Formula text without the `LTL` keyword.
    pub fn body(&self) -> String {
        match self {
            Formula::True => "true".to_string(),
            Formula::Globally(p) => format!("G ({})", p),
            Formula::EventuallyGlobally(p) => format!("FG ({})", p),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LTL {}", self.body())
    }
}

impl FromStr for Formula {
    type Err = FormulaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| FormulaParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let text = s.trim();
        let text = text.strip_prefix("LTL").map(str::trim_start).unwrap_or(text);

        if text == "true" {
            return Ok(Formula::True);
        }
        if let Some(rest) = text.strip_prefix("FG") {
            return parse_prop(rest)
                .map(Formula::EventuallyGlobally)
                .map_err(|r| fail(&r));
        }
        if let Some(rest) = text.strip_prefix('G') {
            return parse_prop(rest).map(Formula::Globally).map_err(|r| fail(&r));
        }
        Err(fail("expected 'true', 'G (...)' or 'FG (...)'"))
    }
}

fn parse_prop(text: &str) -> Result<Prop, String> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| "proposition must be parenthesised".to_string())?
        .trim();

    if inner == "InStandstill" {
        return Ok(Prop::InStandstill);
    }
    if let Some(id) = inner.strip_prefix("SafeDistance_V") {
        return id
            .parse()
            .map(Prop::SafeDistance)
            .map_err(|_| format!("bad obstacle id '{}'", id));
    }

    let mut ids = Vec::new();
    for atom in inner.split('|') {
        let atom = atom.trim();
        let id = atom
            .strip_prefix("InLanelet_")
            .ok_or_else(|| format!("unknown proposition '{}'", atom))?;
        ids.push(id.parse().map_err(|_| format!("bad lanelet id '{}'", id))?);
    }
    Ok(Prop::InLanelets(ids))
}

/// Conjunction of every clause checked in one verification call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Specification {
    clauses: Vec<Formula>,
}

impl Specification {
    pub fn new(clauses: Vec<Formula>) -> Self {
        let mut spec = Self::default();
        spec.extend(clauses);
        spec
    }

    /// Adds a clause; `true` is the neutral element and is dropped.
    pub fn push(&mut self, clause: Formula) {
        if clause != Formula::True && !self.clauses.contains(&clause) {
            self.clauses.push(clause);
        }
    }

    pub fn extend(&mut self, clauses: impl IntoIterator<Item = Formula>) {
        for clause in clauses {
            self.push(clause);
        }
    }

    pub fn clauses(&self) -> &[Formula] {
        &self.clauses
    }

    pub fn is_trivial(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Lanelet sets the ego must stay in at every step.
    pub fn always_in(&self) -> impl Iterator<Item = &[LaneletId]> {
        self.clauses.iter().filter_map(|c| match c {
            Formula::Globally(Prop::InLanelets(ids)) => Some(ids.as_slice()),
            _ => None,
        })
    }

    /// Lanelet sets the ego must eventually settle in.
    pub fn eventually_in(&self) -> impl Iterator<Item = &[LaneletId]> {
        self.clauses.iter().filter_map(|c| match c {
            Formula::EventuallyGlobally(Prop::InLanelets(ids)) => Some(ids.as_slice()),
            _ => None,
        })
    }

    pub fn requires_standstill(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Formula::EventuallyGlobally(Prop::InStandstill)))
    }

    pub fn safe_distance_to(&self) -> impl Iterator<Item = ObstacleId> + '_ {
        self.clauses.iter().filter_map(|c| match c {
            Formula::Globally(Prop::SafeDistance(id)) => Some(*id),
            _ => None,
        })
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("LTL true");
        }
        let bodies: Vec<String> = self.clauses.iter().map(Formula::body).collect();
        write!(f, "LTL {}", bodies.join(" & "))
    }
}

// ============================================================================
// ACTION TRANSLATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub clauses: Vec<Formula>,
    pub a_lon_min: f64,
    pub a_lon_max: f64,
}

/// Translates one action pair. `defaults` supplies the physical
/// acceleration limits the longitudinal bounds are cut from.
pub fn translate(
    action: &Action,
    lanes: &EgoLaneNetwork,
    defaults: &EgoBounds,
    a_lim: f64,
) -> Result<Translation, TranslateError> {
    let (a_lon_min, a_lon_max, mut clauses) = match action.longitudinal {
        LongitudinalAction::Accelerate => (a_lim, defaults.a_lon_max, Vec::new()),
        LongitudinalAction::Decelerate => (defaults.a_lon_min, -a_lim, Vec::new()),
        LongitudinalAction::Keep => (-a_lim, a_lim, Vec::new()),
        LongitudinalAction::Stop => (
            defaults.a_lon_min,
            defaults.a_lon_max,
            vec![Formula::EventuallyGlobally(Prop::InStandstill)],
        ),
        LongitudinalAction::Unknown => return Err(TranslateError::Unsupported(*action)),
    };

    clauses.push(translate_lateral(action, lanes)?);

    Ok(Translation {
        clauses,
        a_lon_min,
        a_lon_max,
    })
}

fn translate_lateral(action: &Action, lanes: &EgoLaneNetwork) -> Result<Formula, TranslateError> {
    match action.lateral {
        LateralAction::ChangeLeft | LateralAction::ChangeRight => {
            let side = if action.lateral == LateralAction::ChangeLeft {
                "left"
            } else {
                "right"
            };
            let ids = lanes
                .adjacent_lanelet_ids(action.lateral)
                .filter(|ids| !ids.is_empty())
                .ok_or(TranslateError::MissingAdjacentLane {
                    side,
                    action: action.lateral,
                })?;
            Ok(Formula::EventuallyGlobally(Prop::InLanelets(ids)))
        }
        // single-lane roads have no region to stay inside of
        LateralAction::FollowLane if !lanes.has_adjacent_lanes() => Ok(Formula::True),
        LateralAction::FollowLane => Ok(Formula::Globally(Prop::InLanelets(
            lanes.lane.lanelet_ids.clone(),
        ))),
        LateralAction::Unknown => Err(TranslateError::Unsupported(*action)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{single_lane_road, state_at, two_lane_highway};
    use crate::geometry::Point;
    use crate::road_network::RoadNetwork;

    fn highway_lanes() -> EgoLaneNetwork {
        let map = two_lane_highway();
        let network = RoadNetwork::build(&map, Point::new(50.0, 1.75), true, 300.0).unwrap();
        EgoLaneNetwork::from_route(&network, &map, &state_at(50.0, 1.75, 20.0), &[], 10.0).unwrap()
    }

    fn single_lane() -> EgoLaneNetwork {
        let map = single_lane_road();
        let network = RoadNetwork::build(&map, Point::new(50.0, 1.75), true, 300.0).unwrap();
        EgoLaneNetwork::from_position(&network, &map, &state_at(50.0, 1.75, 20.0)).unwrap()
    }

    fn action(lon: LongitudinalAction, lat: LateralAction) -> Action {
        Action::new(lon, lat)
    }

    #[test]
    fn test_longitudinal_bounds() {
        let lanes = highway_lanes();
        let ego = EgoBounds::default();

        let t = translate(&action(LongitudinalAction::Accelerate, LateralAction::FollowLane), &lanes, &ego, 1.0).unwrap();
        assert_eq!((t.a_lon_min, t.a_lon_max), (1.0, 3.0));

        let t = translate(&action(LongitudinalAction::Decelerate, LateralAction::FollowLane), &lanes, &ego, 1.0).unwrap();
        assert_eq!((t.a_lon_min, t.a_lon_max), (-8.0, -1.0));

        let t = translate(&action(LongitudinalAction::Keep, LateralAction::FollowLane), &lanes, &ego, 1.0).unwrap();
        assert_eq!((t.a_lon_min, t.a_lon_max), (-1.0, 1.0));
    }

    #[test]
    fn test_stop_adds_standstill_clause() {
        let t = translate(
            &action(LongitudinalAction::Stop, LateralAction::FollowLane),
            &highway_lanes(),
            &EgoBounds::default(),
            1.0,
        )
        .unwrap();
        assert_eq!(t.clauses[0].to_string(), "LTL FG (InStandstill)");
        assert_eq!(t.clauses[1].to_string(), "LTL G (InLanelet_1 | InLanelet_2)");
    }

    #[test]
    fn test_change_left_lists_every_left_lanelet() {
        let t = translate(
            &action(LongitudinalAction::Keep, LateralAction::ChangeLeft),
            &highway_lanes(),
            &EgoBounds::default(),
            1.0,
        )
        .unwrap();
        assert_eq!(t.clauses, vec![Formula::EventuallyGlobally(Prop::InLanelets(vec![3, 4]))]);
    }

    #[test]
    fn test_change_without_neighbour_is_precondition_error() {
        let lanes = highway_lanes();
        assert!(lanes.lane_right_adjacent.is_none());
        let err = translate(
            &action(LongitudinalAction::Keep, LateralAction::ChangeRight),
            &lanes,
            &EgoBounds::default(),
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, TranslateError::MissingAdjacentLane { side: "right", .. }));

        let err = translate(
            &action(LongitudinalAction::Keep, LateralAction::ChangeLeft),
            &single_lane(),
            &EgoBounds::default(),
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, TranslateError::MissingAdjacentLane { side: "left", .. }));
    }

    #[test]
    fn test_follow_lane_on_single_lane_is_vacuous() {
        let t = translate(
            &action(LongitudinalAction::Keep, LateralAction::FollowLane),
            &single_lane(),
            &EgoBounds::default(),
            1.0,
        )
        .unwrap();
        assert_eq!(t.clauses, vec![Formula::True]);
    }

    #[test]
    fn test_unknown_components_rejected() {
        let lanes = highway_lanes();
        let ego = EgoBounds::default();
        assert!(matches!(
            translate(&action(LongitudinalAction::Unknown, LateralAction::FollowLane), &lanes, &ego, 1.0),
            Err(TranslateError::Unsupported(_))
        ));
        assert!(matches!(
            translate(&action(LongitudinalAction::Keep, LateralAction::Unknown), &lanes, &ego, 1.0),
            Err(TranslateError::Unsupported(_))
        ));
    }

    #[test]
    fn test_formula_text_parses_back() {
        for text in [
            "LTL true",
            "LTL G (InLanelet_1 | InLanelet_2)",
            "LTL FG (InStandstill)",
            "LTL G (SafeDistance_V12)",
        ] {
            let formula: Formula = text.parse().unwrap();
            assert_eq!(formula.to_string(), text);
        }
        assert_eq!(
            "FG(InLanelet_7)".parse::<Formula>(),
            Ok(Formula::EventuallyGlobally(Prop::InLanelets(vec![7])))
        );
        assert!("LTL X (Foo)".parse::<Formula>().is_err());
        assert!("G InStandstill".parse::<Formula>().is_err());
        assert!("G (InLanelet_x)".parse::<Formula>().is_err());
    }

    #[test]
    fn test_specification_conjunction() {
        let mut spec = Specification::default();
        assert_eq!(spec.to_string(), "LTL true");
        spec.push(Formula::True);
        assert!(spec.is_trivial());

        spec.push(Formula::Globally(Prop::SafeDistance(5)));
        spec.push(Formula::EventuallyGlobally(Prop::InLanelets(vec![3])));
        spec.push(Formula::Globally(Prop::SafeDistance(5)));
        assert_eq!(spec.to_string(), "LTL G (SafeDistance_V5) & FG (InLanelet_3)");
        assert_eq!(spec.safe_distance_to().collect::<Vec<_>>(), vec![5]);
        assert_eq!(spec.eventually_in().count(), 1);
        assert!(!spec.requires_standstill());
    }
}
