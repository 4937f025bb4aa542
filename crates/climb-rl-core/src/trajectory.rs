//! Transitions, batches and trajectories

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{ClimbAction, RLError, Result, StateVector};

/// Single transition for off-policy learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State before the action
    pub state: StateVector,
    /// Action taken
    pub action: ClimbAction,
    /// Reward received
    pub reward: f32,
    /// State after the action
    pub next_state: StateVector,
    /// Whether the episode ended on this transition
    pub done: bool,
}

impl Transition {
    /// Create a new transition
    #[must_use]
    pub fn new(
        state: StateVector,
        action: ClimbAction,
        reward: f32,
        next_state: StateVector,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }

    /// Check dimensions, bounds and reward finiteness
    pub fn validate(&self, state_dim: usize) -> Result<()> {
        self.state.validate(state_dim)?;
        self.next_state.validate(state_dim)?;
        if !self.reward.is_finite() {
            return Err(RLError::InvalidInput(format!(
                "reward is not finite ({})",
                self.reward
            )));
        }
        Ok(())
    }
}

/// Column-oriented batch of transitions
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    /// States, one row per transition
    pub states: Array2<f32>,
    /// Action indices
    pub actions: Vec<usize>,
    /// Rewards
    pub rewards: Array1<f32>,
    /// Next states, one row per transition
    pub next_states: Array2<f32>,
    /// Done flags
    pub dones: Vec<bool>,
}

impl TransitionBatch {
    /// Build a batch from transitions of equal state dimension
    pub fn from_transitions<'a, I>(transitions: I, state_dim: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Transition>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = transitions.into_iter();
        let n = iter.len();
        let mut states = Array2::zeros((n, state_dim));
        let mut next_states = Array2::zeros((n, state_dim));
        let mut actions = Vec::with_capacity(n);
        let mut rewards = Array1::zeros(n);
        let mut dones = Vec::with_capacity(n);

        for (i, t) in iter.enumerate() {
            if t.state.dim() != state_dim || t.next_state.dim() != state_dim {
                return Err(RLError::DimensionMismatch {
                    expected: state_dim,
                    actual: t.state.dim().max(t.next_state.dim()),
                });
            }
            states.row_mut(i).assign(&t.state.view());
            next_states.row_mut(i).assign(&t.next_state.view());
            actions.push(t.action.index());
            rewards[i] = t.reward;
            dones.push(t.done);
        }

        Ok(Self {
            states,
            actions,
            rewards,
            next_states,
            dones,
        })
    }

    /// Number of transitions in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// One step of on-policy experience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Observed state
    pub state: StateVector,
    /// Action taken
    pub action: ClimbAction,
    /// Reward received
    pub reward: f32,
    /// Log probability of the action under the collecting policy
    pub log_prob: f32,
    /// Critic value estimate for the state
    pub value: f32,
    /// Whether the episode ended on this step
    pub done: bool,
}

/// Complete trajectory of an episode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    /// Sequence of steps
    pub steps: Vec<TrajectoryStep>,
    /// Total reward
    pub total_reward: f32,
}

impl Trajectory {
    /// Create a new empty trajectory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step to the trajectory
    pub fn push(&mut self, step: TrajectoryStep) {
        self.total_reward += step.reward;
        self.steps.push(step);
    }

    /// Get the length of the trajectory
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if trajectory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rewards column
    #[must_use]
    pub fn rewards(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.reward).collect()
    }

    /// Critic values column
    #[must_use]
    pub fn values(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.value).collect()
    }

    /// Done flags column
    #[must_use]
    pub fn dones(&self) -> Vec<bool> {
        self.steps.iter().map(|s| s.done).collect()
    }

    /// Discounted returns, reset at episode boundaries
    #[must_use]
    pub fn returns(&self, gamma: f32) -> Vec<f32> {
        let mut returns = vec![0.0; self.len()];
        let mut running_return = 0.0;

        for i in (0..self.len()).rev() {
            if self.steps[i].done {
                running_return = 0.0;
            }
            running_return = self.steps[i].reward + gamma * running_return;
            returns[i] = running_return;
        }

        returns
    }
}
