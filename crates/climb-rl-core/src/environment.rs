//! Environment traits and types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ClimbAction, StateVector};

/// Why an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The success zone was reached
    Success,
    /// The agent dropped below the fall floor
    Fallen,
    /// The agent left the lateral/longitudinal bounds
    OutOfBounds,
    /// The step budget was exhausted
    MaxSteps,
}

impl TerminationReason {
    /// Whether this reason counts as a successful episode
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step counter after this step
    pub step: usize,
    /// Set when the step ended the episode
    pub termination: Option<TerminationReason>,
    /// Zone occupied after the step, `None` when off-track
    pub zone: Option<usize>,
    /// Highest zone reached so far this episode
    pub highest_zone: Option<usize>,
    /// Whether the action produced a force (false when gated)
    pub action_applied: bool,
    /// Name of the reward rule that produced the reward
    pub reward_component: String,
}

/// Result of a single environment step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// State after the step
    pub state: StateVector,
    /// Reward signal
    pub reward: f32,
    /// Whether the episode is done
    pub done: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

/// Record of a completed episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode ID
    pub id: Uuid,
    /// Zero-based episode index within the training run
    pub index: usize,
    /// Total reward
    pub total_reward: f32,
    /// Number of steps
    pub steps: usize,
    /// Why the episode ended
    pub termination: Option<TerminationReason>,
    /// Highest zone reached
    pub highest_zone: Option<usize>,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    pub end_time: Option<DateTime<Utc>>,
}

impl Episode {
    /// Start recording a new episode
    #[must_use]
    pub fn begin(index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            total_reward: 0.0,
            steps: 0,
            termination: None,
            highest_zone: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Fold a step into the record
    pub fn record(&mut self, step: &Step) {
        self.total_reward += step.reward;
        self.steps = step.info.step;
        self.highest_zone = step.info.highest_zone;
        if step.done {
            self.termination = step.info.termination;
            self.end_time = Some(Utc::now());
        }
    }

    /// Whether the episode reached the success zone
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.termination.is_some_and(TerminationReason::is_success)
    }
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send {
    /// Dimension of the state vectors produced
    fn state_dim(&self) -> usize;

    /// Number of discrete actions accepted
    fn action_count(&self) -> usize {
        ClimbAction::COUNT
    }

    /// Step budget per episode
    fn max_steps(&self) -> usize;

    /// Reset the environment and return the initial state
    async fn reset(&mut self) -> crate::Result<StateVector>;

    /// Take a step in the environment
    async fn step(&mut self, action: ClimbAction) -> crate::Result<Step>;

    /// Current state without advancing
    fn state(&self) -> StateVector;

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}
