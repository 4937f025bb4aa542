//! Agent traits and types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{ClimbAction, RLError, StateVector};

/// Configuration shared by all agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate
    pub learning_rate: f32,
    /// Discount factor
    pub gamma: f32,
    /// Hidden layer sizes of the estimators
    pub hidden_dims: Vec<usize>,
    /// Maximum gradient norm before clipping
    pub max_grad_norm: f32,
    /// Seed for the agent's random number generator
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            gamma: 0.99,
            hidden_dims: vec![64, 64],
            max_grad_norm: 1.0,
            seed: None,
        }
    }
}

/// Which learning algorithm an agent implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Value-based agent with replay and a target estimator
    Dqn,
    /// Actor-critic agent with a clipped objective
    Ppo,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dqn => f.write_str("dqn"),
            Self::Ppo => f.write_str("ppo"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = RLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dqn" | "value" => Ok(Self::Dqn),
            "ppo" | "policy" => Ok(Self::Ppo),
            other => Err(RLError::InvalidInput(format!("unknown agent kind: {other}"))),
        }
    }
}

/// Owned copy of an agent's learnable parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Algorithm that produced the snapshot
    pub kind: AgentKind,
    /// Flattened parameters per named estimator
    pub networks: BTreeMap<String, Vec<f32>>,
    /// Exploration rate at snapshot time (value agents only)
    pub exploration_rate: Option<f32>,
}

impl AgentSnapshot {
    /// Create an empty snapshot for `kind`
    #[must_use]
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            networks: BTreeMap::new(),
            exploration_rate: None,
        }
    }

    /// Add a named parameter vector
    #[must_use]
    pub fn with_network(mut self, name: &str, params: Vec<f32>) -> Self {
        self.networks.insert(name.to_string(), params);
        self
    }

    /// Look up a named parameter vector
    pub fn network(&self, name: &str) -> crate::Result<&[f32]> {
        self.networks
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| RLError::InvalidInput(format!("snapshot has no network named {name}")))
    }

    /// Total number of parameters
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.networks.values().map(Vec::len).sum()
    }
}

/// Core agent trait
pub trait Agent: Send + Sync {
    /// Algorithm implemented by the agent
    fn kind(&self) -> AgentKind;

    /// Greedy action for evaluation
    fn act(&self, state: &StateVector) -> crate::Result<ClimbAction>;

    /// Copy the learnable parameters
    fn snapshot(&self) -> AgentSnapshot;

    /// Replace the learnable parameters
    fn restore(&mut self, snapshot: &AgentSnapshot) -> crate::Result<()>;

    /// Hyperparameters recorded in checkpoint metadata
    fn hyperparameters(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_parses_aliases() {
        assert_eq!("DQN".parse::<AgentKind>().unwrap(), AgentKind::Dqn);
        assert_eq!("policy".parse::<AgentKind>().unwrap(), AgentKind::Ppo);
        assert!("sac".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = AgentSnapshot::new(AgentKind::Ppo)
            .with_network("actor", vec![1.0, 2.0])
            .with_network("critic", vec![3.0]);
        assert_eq!(snapshot.parameter_count(), 3);
        assert_eq!(snapshot.network("critic").unwrap(), &[3.0]);
        assert!(snapshot.network("q_network").is_err());
    }
}
