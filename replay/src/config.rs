//! Configuration management for the replay tool.

use std::{env, path::PathBuf, time::Duration};

/// Replay configuration loaded from the command line and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Script to replay
    pub script: PathBuf,
    /// Snapshot to seed the live cache with before replaying
    pub initial: Option<PathBuf>,
    /// Cap on observer follow-up rounds per step
    pub followup_limit: usize,
    /// Pause between steps, to mimic network latency
    pub step_delay: Duration,
}

impl Config {
    /// Load configuration from the first CLI argument and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::args().nth(1), |key| env::var(key).ok())
    }

    fn from_vars(
        arg: Option<String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let script = arg
            .or_else(|| var("HEDGE_SCRIPT"))
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingScript)?;
        let initial = var("HEDGE_INITIAL").map(PathBuf::from);

        let followup_limit = match var("HEDGE_FOLLOWUP_LIMIT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidFollowupLimit)?,
            None => hedge_engine::config::DEFAULT_FOLLOWUP_LIMIT,
        };

        let step_delay = var("HEDGE_STEP_DELAY_MS")
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidStepDelay)?;

        Ok(Self {
            script,
            initial,
            followup_limit,
            step_delay,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn engine(&self) -> hedge_engine::Config {
        hedge_engine::Config::default().with_followup_limit(self.followup_limit)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pass a script path or set HEDGE_SCRIPT")]
    MissingScript,

    #[error("Invalid HEDGE_FOLLOWUP_LIMIT value")]
    InvalidFollowupLimit,

    #[error("Invalid HEDGE_STEP_DELAY_MS value")]
    InvalidStepDelay,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(Some("run.json".into()), vars(&[])).unwrap();
        assert_eq!(config.script, PathBuf::from("run.json"));
        assert!(config.initial.is_none());
        assert_eq!(
            config.followup_limit,
            hedge_engine::config::DEFAULT_FOLLOWUP_LIMIT
        );
        assert_eq!(config.step_delay, Duration::ZERO);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_vars(
            None,
            vars(&[
                ("HEDGE_SCRIPT", "env.json"),
                ("HEDGE_INITIAL", "cache.json"),
                ("HEDGE_FOLLOWUP_LIMIT", "4"),
                ("HEDGE_STEP_DELAY_MS", "25"),
            ]),
        )
        .unwrap();
        assert_eq!(config.script, PathBuf::from("env.json"));
        assert_eq!(config.initial, Some(PathBuf::from("cache.json")));
        assert_eq!(config.engine().followup_limit, 4);
        assert_eq!(config.step_delay, Duration::from_millis(25));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_vars(None, vars(&[])),
            Err(ConfigError::MissingScript)
        ));
        assert!(matches!(
            Config::from_vars(Some("a".into()), vars(&[("HEDGE_FOLLOWUP_LIMIT", "lots")])),
            Err(ConfigError::InvalidFollowupLimit)
        ));
        assert!(matches!(
            Config::from_vars(Some("a".into()), vars(&[("HEDGE_STEP_DELAY_MS", "-1")])),
            Err(ConfigError::InvalidStepDelay)
        ));
    }
}
