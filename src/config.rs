use crate::eval::Weights;
use crate::game::{Move, Rules};
use crate::search::OpponentModel;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_VAR: &str = "SNAKE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {name} has unusable value {value:?}")]
    Env { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration. Every field has a default, so a config file only
/// lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rules: Rules,
    /// Wall-clock budget for one decision.
    pub time_budget_ms: u64,
    /// Slice of the budget kept back for sending the answer.
    pub safety_margin_ms: u64,
    /// Neighbour expansion order for BFS and tie-breaking.
    pub neighbor_order: [Move; 4],
    pub weights: Weights,
    pub max_depth: u32,
    pub opponent_model: OpponentModel,
    pub prune: bool,
    pub parallel_root: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rules: Rules::default(),
            time_budget_ms: 200,
            safety_margin_ms: 20,
            neighbor_order: Move::ALL,
            weights: Weights::default(),
            max_depth: 12,
            opponent_model: OpponentModel::Minimax,
            prune: true,
            parallel_root: false,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Defaults, or the file named by `SNAKE_CONFIG`, then individual
    /// `SNAKE_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Config::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SNAKE_TIME_BUDGET_MS`, `SNAKE_MAX_DEPTH`, `SNAKE_WRAP` and
    /// `SNAKE_OPPONENT_MODEL` as returned by `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("SNAKE_TIME_BUDGET_MS") {
            self.time_budget_ms = parse_var("SNAKE_TIME_BUDGET_MS", value, |v| v.parse().ok())?;
        }
        if let Some(value) = lookup("SNAKE_MAX_DEPTH") {
            self.max_depth = parse_var("SNAKE_MAX_DEPTH", value, |v| v.parse().ok())?;
        }
        if let Some(value) = lookup("SNAKE_WRAP") {
            self.rules.wrap = parse_var("SNAKE_WRAP", value, parse_bool)?;
        }
        if let Some(value) = lookup("SNAKE_OPPONENT_MODEL") {
            self.opponent_model = parse_var("SNAKE_OPPONENT_MODEL", value, |v| {
                match v.to_ascii_lowercase().as_str() {
                    "minimax" => Some(OpponentModel::Minimax),
                    "greedy" => Some(OpponentModel::Greedy),
                    _ => None,
                }
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        if self.time_budget_ms == 0 {
            return Err(ConfigError::Invalid("time_budget_ms must be positive".into()));
        }
        if self.safety_margin_ms >= self.time_budget_ms {
            return Err(ConfigError::Invalid(format!(
                "safety_margin_ms ({}) must be below time_budget_ms ({})",
                self.safety_margin_ms, self.time_budget_ms
            )));
        }
        if !Move::ALL.iter().all(|mv| self.neighbor_order.contains(mv)) {
            return Err(ConfigError::Invalid(format!(
                "neighbor_order {:?} is not a permutation of up/right/down/left",
                self.neighbor_order
            )));
        }
        let w = &self.weights;
        if ![w.food, w.space, w.length, w.score]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ConfigError::Invalid("weights must be finite".into()));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

fn parse_var<T>(
    name: &'static str,
    value: String,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    parse(value.trim()).ok_or(ConfigError::Env { name, value })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
