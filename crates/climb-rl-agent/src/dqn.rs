//! Deep Q-Network (DQN) agent implementation
//!
//! A live estimator maps a state to one value per action and is trained on
//! uniformly replayed transitions against a delayed target estimator. The
//! target only changes through [`DQNAgent::update_target_network`].

use metrics::counter;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use climb_rl_core::{
    Agent, AgentConfig, AgentKind, AgentSnapshot, ClimbAction, RLError, Result, StateVector,
    Transition, TransitionBatch, STATE_DIM,
};

use crate::buffer::ReplayBuffer;
use crate::network::Mlp;
use crate::optim::{clip_grad_norm, Adam};
use crate::utils::argmax;

/// DQN-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DQNConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// State vector dimension
    pub state_dim: usize,
    /// Number of discrete actions
    pub action_count: usize,
    /// Replay buffer capacity
    pub buffer_capacity: usize,
    /// Transitions per training step
    pub batch_size: usize,
    /// Initial exploration rate
    pub epsilon_start: f32,
    /// Exploration floor
    pub epsilon_min: f32,
    /// Multiplicative decay applied after each episode
    pub epsilon_decay: f32,
    /// Episodes between target synchronisations
    pub target_update_interval: usize,
    /// Environment steps between training steps
    pub train_every_steps: usize,
}

impl Default for DQNConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            state_dim: STATE_DIM,
            action_count: ClimbAction::COUNT,
            buffer_capacity: 50_000,
            batch_size: 64,
            epsilon_start: 1.0,
            epsilon_min: 0.05,
            epsilon_decay: 0.995,
            target_update_interval: 10,
            train_every_steps: 4,
        }
    }
}

impl DQNConfig {
    /// Check ranges the agent relies on
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RLError::InvalidInput(format!("dqn config: {msg}")));
        if self.state_dim == 0 || self.action_count == 0 {
            return invalid("state_dim and action_count must be positive");
        }
        if self.batch_size == 0 || self.buffer_capacity < self.batch_size {
            return invalid("buffer_capacity must hold at least one batch");
        }
        if !(0.0..=1.0).contains(&self.epsilon_min) || !(0.0..=1.0).contains(&self.epsilon_start) {
            return invalid("exploration rates must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.epsilon_decay) {
            return invalid("epsilon_decay must lie in [0, 1]");
        }
        if self.target_update_interval == 0 || self.train_every_steps == 0 {
            return invalid("intervals must be positive");
        }
        if !(self.base.learning_rate > 0.0) || !(0.0..=1.0).contains(&self.base.gamma) {
            return invalid("learning_rate must be positive and gamma in [0, 1]");
        }
        Ok(())
    }
}

/// Result of one training step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DQNTrainStats {
    /// Mean squared TD error before the update
    pub loss: f32,
    /// Gradient norm before clipping
    pub grad_norm: f32,
    /// Whether the estimators were reinitialised after a non-finite update
    pub recovered: bool,
}

/// DQN agent with experience replay and a target estimator
pub struct DQNAgent {
    config: DQNConfig,
    q_network: Mlp,
    target_network: Mlp,
    optimizer: Adam,
    buffer: ReplayBuffer,
    rng: StdRng,
    exploration_rate: f32,
    train_steps: u64,
}

impl DQNAgent {
    /// Create a new DQN agent
    pub fn new(config: DQNConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.base.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let q_network = Mlp::new(
            config.state_dim,
            &config.base.hidden_dims,
            config.action_count,
            &mut rng,
        );
        let target_network = q_network.clone();
        let optimizer = Adam::new(q_network.parameter_count(), config.base.learning_rate);

        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            exploration_rate: config.epsilon_start,
            config,
            q_network,
            target_network,
            optimizer,
            rng,
            train_steps: 0,
        })
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &DQNConfig {
        &self.config
    }

    /// Current exploration rate
    #[must_use]
    pub fn exploration_rate(&self) -> f32 {
        self.exploration_rate
    }

    /// Replay buffer
    #[must_use]
    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    /// Training steps performed
    #[must_use]
    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }

    /// Live estimates for every action
    pub fn q_values(&self, state: &StateVector) -> Result<Vec<f32>> {
        state.validate(self.config.state_dim)?;
        Ok(self.q_network.forward(state.view())?.to_vec())
    }

    /// Epsilon-greedy action selection
    pub fn select_action(&mut self, state: &StateVector, exploration_rate: f32) -> Result<ClimbAction> {
        state.validate(self.config.state_dim)?;
        if self.rng.gen::<f32>() < exploration_rate {
            let index = self.rng.gen_range(0..self.config.action_count);
            return ClimbAction::try_from(index);
        }
        let q = self.q_network.forward(state.view())?;
        ClimbAction::try_from(argmax(q.view()))
    }

    /// Store a validated transition in the replay buffer
    pub fn remember(&mut self, transition: Transition) -> Result<()> {
        transition.validate(self.config.state_dim)?;
        if transition.action.index() >= self.config.action_count {
            return Err(RLError::InvalidInput(format!(
                "action {} outside the configured action space",
                transition.action
            )));
        }
        self.buffer.push(transition);
        Ok(())
    }

    /// Sample `batch_size` distinct transitions as columns
    pub fn sample_batch(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        let sampled = self.buffer.sample(batch_size, &mut self.rng)?;
        TransitionBatch::from_transitions(sampled, self.config.state_dim)
    }

    /// One gradient step on a replayed batch
    pub fn train(&mut self, batch_size: usize) -> Result<DQNTrainStats> {
        let batch = self.sample_batch(batch_size)?;
        let n = batch.len();
        let gamma = self.config.base.gamma;

        let (next_q, _) = self.target_network.forward_batch(batch.next_states.view())?;
        let max_next = next_q.map_axis(Axis(1), |row| {
            row.iter().copied().fold(f32::NEG_INFINITY, f32::max)
        });

        let (q, cache) = self.q_network.forward_batch(batch.states.view())?;
        let mut grad_output = Array2::<f32>::zeros(q.raw_dim());
        let mut loss = 0.0;
        for i in 0..n {
            let bootstrap = if batch.dones[i] { 0.0 } else { gamma * max_next[i] };
            let target = batch.rewards[i] + bootstrap;
            let diff = q[[i, batch.actions[i]]] - target;
            loss += diff * diff;
            grad_output[[i, batch.actions[i]]] = 2.0 * diff / n as f32;
        }
        loss /= n as f32;

        if !loss.is_finite() {
            self.recover(&format!("non-finite loss {loss}"));
            return Ok(DQNTrainStats {
                loss,
                grad_norm: f32::NAN,
                recovered: true,
            });
        }

        let mut grads = self.q_network.backward(&cache, &grad_output)?.flatten();
        let grad_norm = clip_grad_norm(&mut grads, self.config.base.max_grad_norm);
        let mut params = self.q_network.parameters();
        self.optimizer.step(&mut params, &grads)?;
        self.q_network.set_parameters(&params)?;
        self.train_steps += 1;

        if !grad_norm.is_finite() || !self.q_network.is_finite() {
            self.recover("non-finite parameters after update");
            return Ok(DQNTrainStats {
                loss,
                grad_norm,
                recovered: true,
            });
        }

        debug!(loss, grad_norm, step = self.train_steps, "dqn train step");
        Ok(DQNTrainStats {
            loss,
            grad_norm,
            recovered: false,
        })
    }

    /// Copy live parameters into the target estimator
    pub fn update_target_network(&mut self) -> Result<()> {
        self.target_network.copy_from(&self.q_network)
    }

    /// `epsilon <- max(epsilon_min, epsilon * epsilon_decay)`
    pub fn decay_exploration(&mut self) {
        self.exploration_rate =
            (self.exploration_rate * self.config.epsilon_decay).max(self.config.epsilon_min);
    }

    fn recover(&mut self, reason: &str) {
        warn!(reason, "numerical instability in dqn, reinitialising estimators");
        counter!("climb_rl_agent_recoveries_total", 1, "agent" => "dqn");
        self.q_network.reinitialize(&mut self.rng);
        self.target_network = self.q_network.clone();
        self.optimizer.reset();
    }
}

impl Agent for DQNAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Dqn
    }

    fn act(&self, state: &StateVector) -> Result<ClimbAction> {
        state.validate(self.config.state_dim)?;
        let q = self.q_network.forward(state.view())?;
        ClimbAction::try_from(argmax(q.view()))
    }

    fn snapshot(&self) -> AgentSnapshot {
        let mut snapshot = AgentSnapshot::new(AgentKind::Dqn)
            .with_network("q_network", self.q_network.parameters())
            .with_network("target_network", self.target_network.parameters());
        snapshot.exploration_rate = Some(self.exploration_rate);
        snapshot
    }

    fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        if snapshot.kind != AgentKind::Dqn {
            return Err(RLError::InvalidInput(format!(
                "cannot restore a {} snapshot into a dqn agent",
                snapshot.kind
            )));
        }
        let q = snapshot.network("q_network")?;
        let target = snapshot.network("target_network")?;
        if q.iter().chain(target).any(|v| !v.is_finite()) {
            return Err(RLError::NumericalInstability(
                "snapshot contains non-finite parameters".to_string(),
            ));
        }

        // Validate both before touching either estimator
        let mut q_network = self.q_network.clone();
        q_network.set_parameters(q)?;
        let mut target_network = self.target_network.clone();
        target_network.set_parameters(target)?;

        self.q_network = q_network;
        self.target_network = target_network;
        self.optimizer.reset();
        if let Some(rate) = snapshot.exploration_rate {
            self.exploration_rate = rate.clamp(self.config.epsilon_min, 1.0);
        }
        Ok(())
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}
