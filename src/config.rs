use crate::types::{Config, EgoBounds};
use crate::verification::translator::Formula;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.decision;
        if d.k == 0 {
            bail!("decision.k must be at least 1");
        }
        if d.horizon == 0 {
            bail!("decision.horizon must be at least 1");
        }
        if !(d.dt > 0.0) {
            bail!("decision.dt must be positive, got {}", d.dt);
        }
        if d.a_lim < 0.0 {
            bail!("decision.a_lim must not be negative, got {}", d.a_lim);
        }
        validate_ego_bounds(&self.vehicle.ego)?;
        if self.vehicle.other.a_brake > 0.0 {
            bail!("vehicle.other.a_brake must be a deceleration (<= 0)");
        }
        for rule in &self.verification.activated_rules {
            rule.parse::<Formula>()
                .with_context(|| format!("Invalid activated rule '{}'", rule))?;
        }
        Ok(())
    }
}

fn validate_ego_bounds(ego: &EgoBounds) -> Result<()> {
    let pairs = [
        ("v_lon", ego.v_lon_min, ego.v_lon_max),
        ("a_lon", ego.a_lon_min, ego.a_lon_max),
        ("v_lat", ego.v_lat_min, ego.v_lat_max),
        ("a_lat", ego.a_lat_min, ego.a_lat_max),
    ];
    for (name, min, max) in pairs {
        if min > max {
            bail!("vehicle.ego.{name}_min ({min}) exceeds {name}_max ({max})");
        }
    }
    if ego.a_lat_max <= 0.0 {
        bail!("vehicle.ego.a_lat_max must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::prediction::PredictionMode;
    use crate::verification::rules::TrafficRule;
    use std::io::Write;

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "decision:\n  k: 2\nverification:\n  prediction_mode: set_based\n  traffic_rules: [safe_distance, speed_limit]\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.decision.k, 2);
        assert_eq!(config.decision.horizon, 30);
        assert_eq!(config.decision.a_lim, 1.0);
        assert_eq!(config.verification.prediction_mode, PredictionMode::SetBased);
        assert_eq!(
            config.verification.traffic_rules,
            vec![TrafficRule::SafeDistance, TrafficRule::SpeedLimit]
        );
        assert_eq!(config.oracle.retry_limit, 1);
    }

    #[test]
    fn test_rejects_zero_k() {
        let mut config = Config::default();
        config.decision.k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.vehicle.ego.a_lon_min = 4.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("a_lon_min"), "{}", err);
    }

    #[test]
    fn test_rejects_unparseable_activated_rule() {
        let mut config = Config::default();
        config.verification.activated_rules = vec!["LTL X (Foo)".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/config.yaml"));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.decision.k, 3);
        assert_eq!(config.oracle.hard_deadline_secs, Some(60));
        assert_eq!(config.scenario_path.as_deref(), Some("scenarios/highway.yaml"));
    }
}
