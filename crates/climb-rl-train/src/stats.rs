//! Training statistics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use climb_rl_core::Episode;

use crate::checkpoint::CheckpointMetadata;
use crate::control::RunState;

/// Snapshot of training progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    /// Episodes completed so far, including any resumed from a checkpoint
    pub current_episode: usize,
    /// Episodes requested for the current run
    pub total_episodes: usize,
    /// Mean episode reward over the rolling window
    pub average_reward: f32,
    /// Fraction of successful episodes over the rolling window
    pub success_rate: f32,
    /// Current exploration rate, value agents only
    pub exploration_rate: Option<f32>,
    /// Episode rewards in the rolling window, oldest first
    pub reward_history: Vec<f32>,
    /// Episode outcomes in the rolling window, oldest first
    pub success_history: Vec<bool>,
    /// Highest episode reward seen
    pub best_reward: Option<f32>,
    /// Environment steps taken
    pub total_steps: u64,
    /// Cadence checkpoint saves that failed
    pub checkpoint_failures: u64,
    /// Run state
    pub state: RunState,
}

/// Result of greedy evaluation rollouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Episodes played
    pub episodes: usize,
    /// Mean episode reward
    pub average_reward: f32,
    /// Fraction of successful episodes
    pub success_rate: f32,
    /// Mean episode length
    pub average_steps: f32,
}

impl EvaluationReport {
    /// Summarise finished episodes
    #[must_use]
    pub fn from_episodes(episodes: &[Episode]) -> Self {
        let n = episodes.len();
        if n == 0 {
            return Self {
                episodes: 0,
                average_reward: 0.0,
                success_rate: 0.0,
                average_steps: 0.0,
            };
        }
        let count = n as f32;
        Self {
            episodes: n,
            average_reward: episodes.iter().map(|e| e.total_reward).sum::<f32>() / count,
            success_rate: episodes.iter().filter(|e| e.is_success()).count() as f32 / count,
            average_steps: episodes.iter().map(|e| e.steps as f32).sum::<f32>() / count,
        }
    }
}

/// Rolling accumulator behind [`TrainingStats`]
#[derive(Debug, Clone)]
pub struct StatsTracker {
    window: usize,
    rewards: VecDeque<f32>,
    successes: VecDeque<bool>,
    episodes: usize,
    total_episodes: usize,
    best_reward: Option<f32>,
    total_steps: u64,
    checkpoint_failures: u64,
    exploration_rate: Option<f32>,
    state: RunState,
}

impl StatsTracker {
    /// Create a tracker averaging over the last `window` episodes
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            rewards: VecDeque::with_capacity(window),
            successes: VecDeque::with_capacity(window),
            episodes: 0,
            total_episodes: 0,
            best_reward: None,
            total_steps: 0,
            checkpoint_failures: 0,
            exploration_rate: None,
            state: RunState::Idle,
        }
    }

    /// Fold a completed episode in
    pub fn record_episode(&mut self, episode: &Episode) {
        if self.rewards.len() == self.window {
            self.rewards.pop_front();
            self.successes.pop_front();
        }
        self.rewards.push_back(episode.total_reward);
        self.successes.push_back(episode.is_success());
        self.episodes += 1;
        self.total_steps += episode.steps as u64;
        if self.best_reward.map_or(true, |best| episode.total_reward > best) {
            self.best_reward = Some(episode.total_reward);
        }
    }

    /// Mark the start of a run of `count` episodes
    pub fn begin_run(&mut self, count: usize) {
        self.total_episodes = count;
    }

    /// Set the run state reported in snapshots
    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    /// Set the reported exploration rate
    pub fn set_exploration_rate(&mut self, rate: Option<f32>) {
        self.exploration_rate = rate;
    }

    /// Count a failed cadence checkpoint
    pub fn record_checkpoint_failure(&mut self) {
        self.checkpoint_failures += 1;
    }

    /// Continue counting from a restored checkpoint
    pub fn resume_from(&mut self, metadata: &CheckpointMetadata) {
        self.episodes = metadata.episodes;
        self.total_steps = metadata.total_steps;
        self.best_reward = metadata.best_reward;
    }

    /// Episodes completed
    #[must_use]
    pub fn episodes(&self) -> usize {
        self.episodes
    }

    /// Environment steps taken
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Best episode reward
    #[must_use]
    pub fn best_reward(&self) -> Option<f32> {
        self.best_reward
    }

    /// Mean reward over the window
    #[must_use]
    pub fn average_reward(&self) -> f32 {
        if self.rewards.is_empty() {
            0.0
        } else {
            self.rewards.iter().sum::<f32>() / self.rewards.len() as f32
        }
    }

    /// Success fraction over the window
    #[must_use]
    pub fn success_rate(&self) -> f32 {
        if self.successes.is_empty() {
            0.0
        } else {
            self.successes.iter().filter(|&&s| s).count() as f32 / self.successes.len() as f32
        }
    }

    /// Build a serialisable snapshot
    #[must_use]
    pub fn snapshot(&self) -> TrainingStats {
        TrainingStats {
            current_episode: self.episodes,
            total_episodes: self.total_episodes,
            average_reward: self.average_reward(),
            success_rate: self.success_rate(),
            exploration_rate: self.exploration_rate,
            reward_history: self.rewards.iter().copied().collect(),
            success_history: self.successes.iter().copied().collect(),
            best_reward: self.best_reward,
            total_steps: self.total_steps,
            checkpoint_failures: self.checkpoint_failures,
            state: self.state,
        }
    }
}
