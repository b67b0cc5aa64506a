//! Harness configuration via `isolation-harness.toml`
//!
//! Every field has a default, so an empty file (or no file at all) runs
//! the full matrix: three isolation levels, five anomalies, three
//! repetitions per cell, Alice = Bob = 100.

use std::path::Path;

use harness_core::IsolationLevel;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fixture::Fixture;
use crate::scenarios::{Anomaly, ScenarioParams};

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "isolation-harness.toml";

/// Matrix run configuration
///
/// # Example
///
/// ```toml
/// levels = ["read-committed", "serializable"]
/// anomalies = ["lost-update", "write-skew"]
/// repetitions = 5
///
/// [fixture]
/// alice = 100
/// bob = 100
///
/// [scenario]
/// lost_update_first_delta = 50
/// lost_update_second_delta = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Isolation levels to characterize, in report order
    #[serde(default = "default_levels")]
    pub levels: Vec<IsolationLevel>,
    /// Anomalies to provoke at each level, in report order
    #[serde(default = "default_anomalies")]
    pub anomalies: Vec<Anomaly>,
    /// Runs per cell; every run starts from a freshly reset fixture
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Seed balances
    #[serde(default)]
    pub fixture: Fixture,
    /// Values and predicates the scenarios use
    #[serde(default)]
    pub scenario: ScenarioParams,
}

fn default_levels() -> Vec<IsolationLevel> {
    IsolationLevel::ALL.to_vec()
}

fn default_anomalies() -> Vec<Anomaly> {
    Anomaly::ALL.to_vec()
}

fn default_repetitions() -> u32 {
    3
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            anomalies: default_anomalies(),
            repetitions: default_repetitions(),
            fixture: Fixture::default(),
            scenario: ScenarioParams::default(),
        }
    }
}

impl HarnessConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Isolation harness configuration
#
# Isolation levels to characterize:
#   "read-committed", "repeatable-read" (alias "snapshot"), "serializable"
levels = ["read-committed", "repeatable-read", "serializable"]

# Anomalies to provoke at each level:
#   "dirty-read", "non-repeatable-read", "phantom-read", "lost-update", "write-skew"
anomalies = ["dirty-read", "non-repeatable-read", "phantom-read", "lost-update", "write-skew"]

# Runs per (level, anomaly) cell. Each run resets the fixture first;
# a cell whose runs disagree is reported as inconsistent.
repetitions = 3

# Seed balances written before every run
[fixture]
alice = 100
bob = 100

# Scenario parameters
[scenario]
primary = "Alice"
secondary = "Bob"
dirty_value = 150
committed_value = 150
phantom_value = -100
phantom_predicate = { op = "less_than", bound = 0 }
lost_update_first_delta = 50
lost_update_second_delta = 100
write_skew_delta = 50
"#
    }

    /// Parse and validate config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(true)` if the file was created.
    pub fn write_default_if_missing(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reject configs the runner cannot execute meaningfully
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::Invalid("levels must not be empty".into()));
        }
        if self.anomalies.is_empty() {
            return Err(ConfigError::Invalid("anomalies must not be empty".into()));
        }
        if self.repetitions == 0 {
            return Err(ConfigError::Invalid(
                "repetitions must be at least 1".into(),
            ));
        }
        self.scenario.validate().map_err(ConfigError::Invalid)?;

        let names = [self.scenario.primary.as_str(), self.scenario.secondary.as_str()];
        for name in names {
            if !self.fixture.entities().iter().any(|e| e.name == name) {
                return Err(ConfigError::Invalid(format!(
                    "scenario row '{}' is not seeded by the fixture",
                    name
                )));
            }
        }
        self.check_seed_against_scenario()
    }

    /// Seeds must leave every verdict decidable: the primary row starts at
    /// neither written value, and the phantom range starts empty.
    fn check_seed_against_scenario(&self) -> Result<(), ConfigError> {
        let scenario = &self.scenario;
        let seed = self.fixture.entities();
        let primary = seed
            .iter()
            .find(|e| e.name == scenario.primary)
            .map(|e| e.value);

        if primary == Some(scenario.dirty_value) {
            return Err(ConfigError::Invalid(format!(
                "dirty_value {} equals the seeded balance of '{}'",
                scenario.dirty_value, scenario.primary
            )));
        }
        if primary == Some(scenario.committed_value) {
            return Err(ConfigError::Invalid(format!(
                "committed_value {} equals the seeded balance of '{}'",
                scenario.committed_value, scenario.primary
            )));
        }
        if let Some(row) = seed
            .iter()
            .find(|e| scenario.phantom_predicate.matches(e.value))
        {
            return Err(ConfigError::Invalid(format!(
                "seeded row '{}' = {} already satisfies '{}'",
                row.name, row.value, scenario.phantom_predicate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::Predicate;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_default() {
        let config = HarnessConfig::from_toml_str(HarnessConfig::default_toml()).unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config.levels.len(), 3);
        assert_eq!(config.anomalies.len(), 5);
        assert_eq!(config.repetitions, 3);
        assert_eq!(config.fixture, Fixture::default());
    }

    #[test]
    fn test_partial_config() {
        let config = HarnessConfig::from_toml_str(
            r#"
levels = ["snapshot"]
anomalies = ["write-skew"]

[scenario]
phantom_predicate = { op = "at_most", bound = -1 }
"#,
        )
        .unwrap();
        assert_eq!(config.levels, vec![IsolationLevel::RepeatableRead]);
        assert_eq!(config.anomalies, vec![Anomaly::WriteSkew]);
        assert_eq!(config.scenario.phantom_predicate, Predicate::AtMost(-1));
        assert_eq!(config.scenario.write_skew_delta, 50);
    }

    #[test]
    fn test_rejects_zero_repetitions() {
        let err = HarnessConfig::from_toml_str("repetitions = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_empty_levels() {
        assert!(matches!(
            HarnessConfig::from_toml_str("levels = []"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_level() {
        assert!(matches!(
            HarnessConfig::from_toml_str(r#"levels = ["chaos"]"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_unseeded_scenario_row() {
        let err = HarnessConfig::from_toml_str(
            r#"
[scenario]
primary = "Carol"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Carol"));
    }

    #[test]
    fn test_rejects_seed_equal_to_dirty_value() {
        let err = HarnessConfig::from_toml_str(
            "[fixture]\nalice = 150\n\n[scenario]\ncommitted_value = 175",
        )
        .unwrap_err();
        assert!(err.to_string().contains("dirty_value"), "{}", err);
    }

    #[test]
    fn test_rejects_seed_equal_to_committed_value() {
        let err = HarnessConfig::from_toml_str(
            "[fixture]\nalice = 175\n\n[scenario]\ncommitted_value = 175",
        )
        .unwrap_err();
        assert!(err.to_string().contains("committed_value"), "{}", err);
    }

    #[test]
    fn test_rejects_seed_inside_phantom_range() {
        let err = HarnessConfig::from_toml_str("[fixture]\nbob = -5").unwrap_err();
        assert!(err.to_string().contains("'Bob' = -5"), "{}", err);

        let config = HarnessConfig {
            fixture: Fixture { alice: 100, bob: 100 },
            scenario: ScenarioParams {
                phantom_predicate: Predicate::AtLeast(100),
                phantom_value: 500,
                ..ScenarioParams::default()
            },
            ..HarnessConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_seed_on_secondary_is_not_compared_to_written_values() {
        let config = HarnessConfig {
            fixture: Fixture { alice: 100, bob: 150 },
            ..HarnessConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_missing() {
        let dir = TempDir::new().unwrap();
        let err = HarnessConfig::from_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_write_default_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        assert!(HarnessConfig::write_default_if_missing(&path).unwrap());
        assert!(!HarnessConfig::write_default_if_missing(&path).unwrap());
        assert_eq!(
            HarnessConfig::from_file(&path).unwrap(),
            HarnessConfig::default()
        );
    }

    #[test]
    fn test_write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = HarnessConfig {
            repetitions: 7,
            fixture: Fixture { alice: 10, bob: 20 },
            ..HarnessConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(HarnessConfig::from_file(&path).unwrap(), config);
    }
}
