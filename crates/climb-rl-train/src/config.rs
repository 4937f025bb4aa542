//! Training run configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use climb_rl_agent::{DQNConfig, PPOConfig};
use climb_rl_core::{AgentKind, RLError, Result};
use climb_rl_env::CourseConfig;

/// Everything needed to set up and drive a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Learning algorithm
    pub agent: AgentKind,
    /// Episodes between checkpoint saves, 0 disables cadence saves
    pub checkpoint_interval: usize,
    /// Key under which checkpoints are stored
    pub checkpoint_key: String,
    /// Maximum number of records kept in checkpoint history
    pub checkpoint_history: usize,
    /// Episodes in the rolling statistics window
    pub stats_window: usize,
    /// Episodes between progress log lines
    pub log_interval: usize,
    /// Also honour pause and stop between environment steps
    pub interactive: bool,
    /// Value agent hyperparameters
    pub dqn: DQNConfig,
    /// Policy agent hyperparameters
    pub ppo: PPOConfig,
    /// Course layout and reward tuning
    pub course: CourseConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            agent: AgentKind::Dqn,
            checkpoint_interval: 50,
            checkpoint_key: "latest".to_string(),
            checkpoint_history: 10,
            stats_window: 100,
            log_interval: 10,
            interactive: false,
            dqn: DQNConfig::default(),
            ppo: PPOConfig::default(),
            course: CourseConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Seed both agents' random number generators
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dqn.base.seed = Some(seed);
        self.ppo.base.seed = Some(seed);
        self
    }

    /// Check every nested configuration
    pub fn validate(&self) -> Result<()> {
        if self.stats_window == 0 || self.log_interval == 0 {
            return Err(RLError::InvalidInput(
                "training config: stats_window and log_interval must be positive".to_string(),
            ));
        }
        if self.checkpoint_history == 0 {
            return Err(RLError::InvalidInput(
                "training config: checkpoint_history must be positive".to_string(),
            ));
        }
        if self.checkpoint_key.is_empty()
            || self
                .checkpoint_key
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(RLError::InvalidInput(format!(
                "training config: invalid checkpoint key {:?}",
                self.checkpoint_key
            )));
        }
        self.course.validate()?;
        match self.agent {
            AgentKind::Dqn => self.dqn.validate(),
            AgentKind::Ppo => self.ppo.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_nested_overrides_from_json() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{
                "agent": "ppo",
                "checkpoint_interval": 5,
                "ppo": { "ppo_epochs": 2, "learning_rate": 0.01 },
                "course": { "max_steps": 50 }
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.agent, AgentKind::Ppo);
        assert_eq!(config.ppo.ppo_epochs, 2);
        assert!((config.ppo.base.learning_rate - 0.01).abs() < 1e-9);
        assert_eq!(config.course.max_steps, 50);
        assert_eq!(config.dqn.batch_size, DQNConfig::default().batch_size);
    }

    #[test]
    fn test_rejects_path_like_checkpoint_keys() {
        let config = TrainingConfig {
            checkpoint_key: "../escape".to_string(),
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_applies_to_both_agents() {
        let config = TrainingConfig::default().with_seed(9);
        assert_eq!(config.dqn.base.seed, Some(9));
        assert_eq!(config.ppo.base.seed, Some(9));
    }
}
