// src/main.rs
//
// Runs one decision cycle for the scenario named in the configuration and
// prints the decision as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use maneuver_decider::describer::SceneDescriber;
use maneuver_decider::llm_client::HttpRankingOracle;
use maneuver_decider::oracle::{DeadlineOracle, RankingOracle};
use maneuver_decider::road_network::{EgoLaneNetwork, RoadNetwork};
use maneuver_decider::scenario::Scenario;
use maneuver_decider::verification::{IntervalReachEngine, SafetyVerifier, VerificationConfiguration};
use maneuver_decider::{Config, Decider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "maneuver-decider")]
#[command(version, about = "Rank maneuvers with a language model and keep the first one that verifies safe", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Scenario file (defaults to `scenario_path` from the configuration)
    scenario: Option<PathBuf>,

    /// Number of ranked candidates (overrides `decision.k`)
    #[arg(short, long)]
    k: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(k) = args.k {
        config.decision.k = k;
        config.validate()?;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Maneuver decider starting");
    info!("✓ Configuration loaded from {}", args.config.display());

    let scenario_path = args
        .scenario
        .or_else(|| config.scenario_path.as_ref().map(PathBuf::from))
        .context("No scenario given: pass a path or set scenario_path")?;
    let scenario = Arc::new(Scenario::load(&scenario_path)?);
    info!(
        "✓ Scenario {} loaded: {} lanelets, {} obstacles",
        scenario.id,
        scenario.map.len(),
        scenario.obstacles.len()
    );

    let settings = &config.verification;
    let ego = scenario.ego.initial_state;
    let network = RoadNetwork::build(
        &scenario.map,
        ego.position,
        settings.consider_reversed,
        settings.lookahead,
    )?;
    let lanes = EgoLaneNetwork::from_route(
        &network,
        &scenario.map,
        &ego,
        &scenario.goal_lanelets,
        settings.lane_change_cost,
    )?;
    info!(
        "✓ Ego lane {:?} | left: {} | right: {}",
        lanes.lane.lanelet_ids,
        lanes.lane_left_adjacent.is_some(),
        lanes.lane_right_adjacent.is_some()
    );

    let describer = SceneDescriber::new(Arc::clone(&scenario), lanes.clone(), &config);

    let http = HttpRankingOracle::new(&config.oracle)?;
    let oracle: Box<dyn RankingOracle> = match config.oracle.hard_deadline_secs {
        Some(secs) => Box::new(DeadlineOracle::new(http, Duration::from_secs(secs))),
        None => Box::new(http),
    };

    let base = VerificationConfiguration::from_config(&config)?;
    let verifier = SafetyVerifier::new(base, Arc::clone(&scenario), lanes, IntervalReachEngine::default())?;

    let mut decider = Decider::new(
        describer,
        oracle,
        verifier,
        config.decision.k,
        config.decision.history_len,
    );
    let decision = decider.step();

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults_and_overrides() {
        let args = Args::try_parse_from(["maneuver-decider"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.yaml"));
        assert!(args.scenario.is_none());

        let args = Args::try_parse_from(["maneuver-decider", "cfg.yaml", "scen.yaml", "-k", "3"]).unwrap();
        assert_eq!(args.scenario, Some(PathBuf::from("scen.yaml")));
        assert_eq!(args.k, Some(3));
    }

    #[test]
    fn test_stray_arguments_are_rejected() {
        assert!(Args::try_parse_from(["maneuver-decider", "cfg.yaml", "scen.yaml", "extra"]).is_err());
        assert!(Args::try_parse_from(["maneuver-decider", "cfg.yaml", "--verbose"]).is_err());
    }
}
