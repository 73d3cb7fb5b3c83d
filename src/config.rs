//! Pipeline settings shared by the CLI and library callers.

use crate::error::{Error, Result};
use crate::schema::load_yaml;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub event_key: String,
    /// Store snapshot directory; the store starts empty and is not persisted when unset.
    pub data_dir: Option<PathBuf>,
    pub schema_dir: PathBuf,
    pub coefficients: PathBuf,
    /// JSON array of team numbers restricting roster checks and team predictions.
    pub teams_list: Option<PathBuf>,
    /// Delete every output collection before the first cycle.
    pub full: bool,
    /// Run a single cycle and exit.
    pub once: bool,
    pub interval_secs: u64,
    pub timings: Option<PathBuf>,
    /// Serve match data from JSON files instead of the HTTP service.
    pub tba_offline_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_key: String::new(),
            data_dir: None,
            schema_dir: PathBuf::from("schemas"),
            coefficients: PathBuf::from("data/regression_coefficients.json"),
            teams_list: None,
            full: false,
            once: false,
            interval_secs: 5,
            timings: None,
            tba_offline_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(path: &Path) -> Result<Self> {
        load_yaml(path)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Team numbers from the teams list, `frc` prefixes stripped.
    pub fn load_teams(&self) -> Result<Option<Vec<String>>> {
        let Some(path) = &self.teams_list else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read teams list {}: {e}", path.display()))
        })?;
        let teams: Vec<String> = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("invalid teams list {}: {e}", path.display()))
        })?;
        Ok(Some(
            teams
                .iter()
                .map(|t| crate::model::strip_team_key(t).to_string())
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.schema_dir, PathBuf::from("schemas"));
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert!(!config.full);
    }

    #[test]
    fn test_from_yaml_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yml");
        fs::write(&path, "event_key: 2024caav\nonce: true\ninterval_secs: 30\n").unwrap();

        let config = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(config.event_key, "2024caav");
        assert!(config.once);
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.coefficients, PathBuf::from("data/regression_coefficients.json"));
    }

    #[test]
    fn test_load_teams_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teams.json");
        fs::write(&path, r#"["frc254", "1678"]"#).unwrap();

        let config = PipelineConfig {
            teams_list: Some(path),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.load_teams().unwrap(),
            Some(vec!["254".to_string(), "1678".to_string()])
        );
        assert_eq!(PipelineConfig::default().load_teams().unwrap(), None);
    }

    #[test]
    fn test_invalid_teams_list_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teams.json");
        fs::write(&path, "{not json").unwrap();

        let config = PipelineConfig {
            teams_list: Some(path),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.load_teams(), Err(Error::Config(_))));
    }
}
