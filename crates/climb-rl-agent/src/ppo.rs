//! Proximal Policy Optimization (PPO) agent implementation

use metrics::counter;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use climb_rl_core::{
    Agent, AgentConfig, AgentKind, AgentSnapshot, ClimbAction, RLError, Result, StateVector,
    Trajectory, STATE_DIM,
};

use crate::network::Mlp;
use crate::optim::{clip_grad_norm, Adam};
use crate::utils::{argmax, entropy, floored_ln, gae_advantages, softmax, standardize};

/// PPO-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// State vector dimension
    pub state_dim: usize,
    /// Number of discrete actions
    pub action_count: usize,
    /// Clipping parameter for PPO
    pub clip_param: f32,
    /// Number of epochs for training
    pub ppo_epochs: usize,
    /// Value loss coefficient
    pub value_loss_coef: f32,
    /// Entropy coefficient
    pub entropy_coef: f32,
    /// GAE lambda
    pub gae_lambda: f32,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig {
                learning_rate: 3e-4,
                max_grad_norm: 0.5,
                ..AgentConfig::default()
            },
            state_dim: STATE_DIM,
            action_count: ClimbAction::COUNT,
            clip_param: 0.2,
            ppo_epochs: 4,
            value_loss_coef: 0.5,
            entropy_coef: 0.01,
            gae_lambda: 0.95,
        }
    }
}

impl PPOConfig {
    /// Check ranges the agent relies on
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RLError::InvalidInput(format!("ppo config: {msg}")));
        if self.state_dim == 0 || self.action_count == 0 {
            return invalid("state_dim and action_count must be positive");
        }
        if !(self.clip_param > 0.0 && self.clip_param < 1.0) {
            return invalid("clip_param must lie in (0, 1)");
        }
        if self.ppo_epochs == 0 {
            return invalid("ppo_epochs must be positive");
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) || !(0.0..=1.0).contains(&self.base.gamma) {
            return invalid("gamma and gae_lambda must lie in [0, 1]");
        }
        if !(self.base.learning_rate > 0.0) || self.value_loss_coef < 0.0 || self.entropy_coef < 0.0 {
            return invalid("learning_rate must be positive and coefficients non-negative");
        }
        Ok(())
    }
}

/// Action drawn from the policy with the quantities training needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionSample {
    /// Chosen action
    pub action: ClimbAction,
    /// Log probability of the action under the current policy
    pub log_prob: f32,
    /// Critic estimate for the state
    pub value: f32,
}

/// Averaged statistics of one training call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PPOTrainingStats {
    /// Clipped surrogate loss including the entropy bonus
    pub policy_loss: f32,
    /// Mean squared error of the critic
    pub value_loss: f32,
    /// Mean policy entropy
    pub entropy: f32,
    /// Fraction of samples whose ratio left the clip range
    pub clip_fraction: f32,
    /// Whether the estimators were reinitialised after a non-finite update
    pub recovered: bool,
}

/// Flattened on-policy batch
struct RolloutBatch {
    states: Array2<f32>,
    actions: Vec<usize>,
    old_log_probs: Vec<f32>,
    advantages: Vec<f32>,
    value_targets: Vec<f32>,
}

/// PPO agent with separate actor and critic estimators
pub struct PPOAgent {
    config: PPOConfig,
    actor: Mlp,
    critic: Mlp,
    actor_optimizer: Adam,
    critic_optimizer: Adam,
    rng: StdRng,
}

impl PPOAgent {
    /// Create a new PPO agent
    pub fn new(config: PPOConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.base.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let hidden = &config.base.hidden_dims;
        let actor = Mlp::new(config.state_dim, hidden, config.action_count, &mut rng);
        let critic = Mlp::new(config.state_dim, hidden, 1, &mut rng);
        let lr = config.base.learning_rate;

        Ok(Self {
            actor_optimizer: Adam::new(actor.parameter_count(), lr),
            critic_optimizer: Adam::new(critic.parameter_count(), lr),
            config,
            actor,
            critic,
            rng,
        })
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &PPOConfig {
        &self.config
    }

    /// Action probabilities for a state
    pub fn action_probabilities(&self, state: &StateVector) -> Result<Vec<f32>> {
        state.validate(self.config.state_dim)?;
        let logits = self.actor.forward(state.view())?;
        Ok(softmax(logits.view()))
    }

    /// Sample (or take the mode of) the policy and evaluate the critic
    pub fn select_action(&mut self, state: &StateVector, stochastic: bool) -> Result<ActionSample> {
        let probs = self.action_probabilities(state)?;
        let value = self.critic.forward(state.view())?[0];

        let index = if stochastic {
            let u: f32 = self.rng.gen();
            let mut cumulative = 0.0;
            probs
                .iter()
                .position(|&p| {
                    cumulative += p;
                    u < cumulative
                })
                // Rounding can leave the cumulative sum just below u
                .unwrap_or(probs.len() - 1)
        } else {
            argmax(ndarray::ArrayView1::from(&probs[..]))
        };

        Ok(ActionSample {
            action: ClimbAction::try_from(index)?,
            log_prob: floored_ln(probs[index]),
            value,
        })
    }

    /// GAE advantages standardised to zero mean and unit variance
    ///
    /// Standardisation runs after GAE over this trajectory alone, so the
    /// results are not comparable with raw [`gae_advantages`] output. Value
    /// targets are built from the raw advantages, and a training update
    /// standardises over the whole rollout instead.
    pub fn compute_advantages(&self, rewards: &[f32], values: &[f32], dones: &[bool]) -> Result<Vec<f32>> {
        let raw = self.raw_advantages(rewards, values, dones)?;
        Ok(standardize(&raw))
    }

    fn raw_advantages(&self, rewards: &[f32], values: &[f32], dones: &[bool]) -> Result<Vec<f32>> {
        if rewards.len() != values.len() || rewards.len() != dones.len() {
            return Err(RLError::InvalidInput(format!(
                "advantage inputs differ in length: {} rewards, {} values, {} dones",
                rewards.len(),
                values.len(),
                dones.len()
            )));
        }
        if rewards.is_empty() {
            return Err(RLError::InsufficientData {
                required: 1,
                available: 0,
            });
        }
        if rewards.iter().chain(values).any(|v| !v.is_finite()) {
            return Err(RLError::InvalidInput("non-finite reward or value".to_string()));
        }
        Ok(gae_advantages(
            rewards,
            values,
            dones,
            self.config.base.gamma,
            self.config.gae_lambda,
        ))
    }

    fn build_batch(&self, trajectories: &[Trajectory]) -> Result<RolloutBatch> {
        let total: usize = trajectories.iter().map(Trajectory::len).sum();
        if total == 0 {
            return Err(RLError::InsufficientData {
                required: 1,
                available: 0,
            });
        }

        let dim = self.config.state_dim;
        let mut states = Array2::zeros((total, dim));
        let mut actions = Vec::with_capacity(total);
        let mut old_log_probs = Vec::with_capacity(total);
        let mut raw = Vec::with_capacity(total);
        let mut value_targets = Vec::with_capacity(total);

        let mut row = 0;
        for trajectory in trajectories.iter().filter(|t| !t.is_empty()) {
            let values = trajectory.values();
            let advantages = self.raw_advantages(&trajectory.rewards(), &values, &trajectory.dones())?;
            for ((step, advantage), value) in trajectory.steps.iter().zip(&advantages).zip(&values) {
                step.state.validate(dim)?;
                states.row_mut(row).assign(&step.state.view());
                actions.push(step.action.index());
                old_log_probs.push(step.log_prob);
                value_targets.push(advantage + value);
                row += 1;
            }
            raw.extend(advantages);
        }

        Ok(RolloutBatch {
            states,
            actions,
            old_log_probs,
            advantages: standardize(&raw),
            value_targets,
        })
    }

    /// Clipped-surrogate update over the full batch for `ppo_epochs` epochs
    pub fn train(&mut self, trajectories: &[Trajectory]) -> Result<PPOTrainingStats> {
        let batch = self.build_batch(trajectories)?;
        let mut totals = PPOTrainingStats::default();
        let mut epochs = 0;

        for _ in 0..self.config.ppo_epochs {
            let epoch = self.train_epoch(&batch)?;
            epochs += 1;
            totals.policy_loss += epoch.policy_loss;
            totals.value_loss += epoch.value_loss;
            totals.entropy += epoch.entropy;
            totals.clip_fraction += epoch.clip_fraction;
            if epoch.recovered {
                totals.recovered = true;
                break;
            }
        }

        let n = epochs as f32;
        let stats = PPOTrainingStats {
            policy_loss: totals.policy_loss / n,
            value_loss: totals.value_loss / n,
            entropy: totals.entropy / n,
            clip_fraction: totals.clip_fraction / n,
            recovered: totals.recovered,
        };
        debug!(
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            entropy = stats.entropy,
            clip_fraction = stats.clip_fraction,
            samples = batch.actions.len(),
            "ppo train"
        );
        Ok(stats)
    }

    fn train_epoch(&mut self, batch: &RolloutBatch) -> Result<PPOTrainingStats> {
        let n = batch.actions.len();
        let inv_n = 1.0 / n as f32;
        let eps = self.config.clip_param;
        let c_ent = self.config.entropy_coef;

        // Actor
        let (logits, actor_cache) = self.actor.forward_batch(batch.states.view())?;
        let mut actor_grad = Array2::<f32>::zeros(logits.raw_dim());
        let (mut surrogate_sum, mut entropy_sum, mut clipped) = (0.0, 0.0, 0usize);

        for i in 0..n {
            let probs = softmax(logits.row(i));
            let a = batch.actions[i];
            let advantage = batch.advantages[i];
            let ratio = (floored_ln(probs[a]) - batch.old_log_probs[i]).exp();
            let clipped_ratio = ratio.clamp(1.0 - eps, 1.0 + eps);
            let unclipped = ratio * advantage;
            let surrogate = unclipped.min(clipped_ratio * advantage);
            if (ratio - clipped_ratio).abs() > f32::EPSILON {
                clipped += 1;
            }
            let h = entropy(&probs);
            surrogate_sum += surrogate;
            entropy_sum += h;

            // d(surrogate)/d(log pi) is ratio * A when the unclipped term is active
            let g = if unclipped <= clipped_ratio * advantage { unclipped } else { 0.0 };
            for (j, &p) in probs.iter().enumerate() {
                let onehot = if j == a { 1.0 } else { 0.0 };
                actor_grad[[i, j]] =
                    -inv_n * g * (onehot - p) + c_ent * inv_n * p * (floored_ln(p) + h);
            }
        }
        let policy_loss = -surrogate_sum * inv_n - c_ent * entropy_sum * inv_n;

        // Critic
        let (values, critic_cache) = self.critic.forward_batch(batch.states.view())?;
        let mut critic_grad = Array2::<f32>::zeros(values.raw_dim());
        let mut value_loss = 0.0;
        for i in 0..n {
            let diff = values[[i, 0]] - batch.value_targets[i];
            value_loss += diff * diff;
            critic_grad[[i, 0]] = self.config.value_loss_coef * 2.0 * diff * inv_n;
        }
        value_loss *= inv_n;

        let mut stats = PPOTrainingStats {
            policy_loss,
            value_loss,
            entropy: entropy_sum * inv_n,
            clip_fraction: clipped as f32 * inv_n,
            recovered: false,
        };
        if !policy_loss.is_finite() || !value_loss.is_finite() {
            self.recover("non-finite loss");
            stats.recovered = true;
            return Ok(stats);
        }

        let max_norm = self.config.base.max_grad_norm;
        let mut grads = self.actor.backward(&actor_cache, &actor_grad)?.flatten();
        clip_grad_norm(&mut grads, max_norm);
        let mut params = self.actor.parameters();
        self.actor_optimizer.step(&mut params, &grads)?;
        self.actor.set_parameters(&params)?;

        let mut grads = self.critic.backward(&critic_cache, &critic_grad)?.flatten();
        clip_grad_norm(&mut grads, max_norm);
        let mut params = self.critic.parameters();
        self.critic_optimizer.step(&mut params, &grads)?;
        self.critic.set_parameters(&params)?;

        if !self.actor.is_finite() || !self.critic.is_finite() {
            self.recover("non-finite parameters after update");
            stats.recovered = true;
        }
        Ok(stats)
    }

    fn recover(&mut self, reason: &str) {
        warn!(reason, "numerical instability in ppo, reinitialising estimators");
        counter!("climb_rl_agent_recoveries_total", 1, "agent" => "ppo");
        self.actor.reinitialize(&mut self.rng);
        self.critic.reinitialize(&mut self.rng);
        self.actor_optimizer.reset();
        self.critic_optimizer.reset();
    }
}

impl Agent for PPOAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Ppo
    }

    fn act(&self, state: &StateVector) -> Result<ClimbAction> {
        let probs = self.action_probabilities(state)?;
        ClimbAction::try_from(argmax(ndarray::ArrayView1::from(&probs[..])))
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot::new(AgentKind::Ppo)
            .with_network("actor", self.actor.parameters())
            .with_network("critic", self.critic.parameters())
    }

    fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        if snapshot.kind != AgentKind::Ppo {
            return Err(RLError::InvalidInput(format!(
                "cannot restore a {} snapshot into a ppo agent",
                snapshot.kind
            )));
        }
        let actor = snapshot.network("actor")?;
        let critic = snapshot.network("critic")?;
        if actor.iter().chain(critic).any(|v| !v.is_finite()) {
            return Err(RLError::NumericalInstability(
                "snapshot contains non-finite parameters".to_string(),
            ));
        }

        let mut new_actor = self.actor.clone();
        new_actor.set_parameters(actor)?;
        let mut new_critic = self.critic.clone();
        new_critic.set_parameters(critic)?;

        self.actor = new_actor;
        self.critic = new_critic;
        self.actor_optimizer.reset();
        self.critic_optimizer.reset();
        Ok(())
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use climb_rl_core::TrajectoryStep;
    use std::collections::HashSet;

    fn config() -> PPOConfig {
        PPOConfig {
            base: AgentConfig {
                hidden_dims: vec![16],
                seed: Some(5),
                gamma: 1.0,
                ..PPOConfig::default().base
            },
            gae_lambda: 1.0,
            ..PPOConfig::default()
        }
    }

    fn state(fill: f32) -> StateVector {
        StateVector::new(vec![fill; STATE_DIM])
    }

    fn trajectory(agent: &mut PPOAgent, rewards: &[f32]) -> Trajectory {
        let mut trajectory = Trajectory::new();
        for (i, &reward) in rewards.iter().enumerate() {
            let s = state(0.1 * (i % 5) as f32);
            let sample = agent.select_action(&s, true).unwrap();
            trajectory.push(TrajectoryStep {
                state: s,
                action: sample.action,
                reward,
                log_prob: sample.log_prob,
                value: sample.value,
                done: i + 1 == rewards.len(),
            });
        }
        trajectory
    }

    #[test]
    fn test_compute_advantages_standardises_gae() {
        let agent = PPOAgent::new(config()).unwrap();
        let advantages = agent
            .compute_advantages(&[1.0, 0.0, -1.0], &[0.5, 0.5, 0.5], &[false, false, true])
            .unwrap();
        assert_eq!(advantages.len(), 3);
        // Raw advantages [-0.5, -1.5, -1.5]
        let expected = standardize(&[-0.5, -1.5, -1.5]);
        for (a, e) in advantages.iter().zip(&expected) {
            assert_relative_eq!(a, e, epsilon = 1e-6);
        }
        assert!(advantages[0] > 0.0);
        assert_relative_eq!(advantages[1], advantages[2]);
        assert_relative_eq!(advantages.iter().sum::<f32>(), 0.0, epsilon = 1e-5);

        let raw = gae_advantages(
            &[1.0, 0.0, -1.0],
            &[0.5, 0.5, 0.5],
            &[false, false, true],
            agent.config().base.gamma,
            agent.config().gae_lambda,
        );
        assert!(raw[0] < 0.0);
    }

    #[test]
    fn test_compute_advantages_rejects_bad_lengths() {
        let agent = PPOAgent::new(config()).unwrap();
        assert!(matches!(
            agent.compute_advantages(&[1.0, 2.0], &[0.0], &[false, true]),
            Err(RLError::InvalidInput(_))
        ));
        assert!(matches!(
            agent.compute_advantages(&[], &[], &[]),
            Err(RLError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_select_action_log_prob_matches_probabilities() {
        let mut agent = PPOAgent::new(config()).unwrap();
        let s = state(0.2);
        let probs = agent.action_probabilities(&s).unwrap();
        assert_relative_eq!(probs.iter().sum::<f32>(), 1.0, epsilon = 1e-5);

        let greedy = agent.select_action(&s, false).unwrap();
        assert_eq!(greedy.action, agent.act(&s).unwrap());
        assert_relative_eq!(greedy.log_prob, probs[greedy.action.index()].ln(), epsilon = 1e-5);

        let seen: HashSet<ClimbAction> = (0..2000)
            .map(|_| agent.select_action(&s, true).unwrap().action)
            .collect();
        assert_eq!(seen.len(), ClimbAction::COUNT);
    }

    #[test]
    fn test_train_returns_finite_stats() {
        let mut agent = PPOAgent::new(config()).unwrap();
        let trajectories = vec![
            trajectory(&mut agent, &[0.0, 1.0, 0.0, 5.0]),
            trajectory(&mut agent, &[-1.0, -1.0, 2.0]),
        ];
        let before = agent.snapshot();
        let stats = agent.train(&trajectories).unwrap();
        assert!(stats.policy_loss.is_finite());
        assert!(stats.value_loss.is_finite());
        assert!(stats.entropy > 0.0);
        assert!((0.0..=1.0).contains(&stats.clip_fraction));
        assert!(!stats.recovered);
        assert_ne!(agent.snapshot(), before);
    }

    #[test]
    fn test_train_on_empty_batch_is_insufficient() {
        let mut agent = PPOAgent::new(config()).unwrap();
        assert!(matches!(
            agent.train(&[Trajectory::new()]),
            Err(RLError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_critic_learns_value_targets() {
        let mut agent = PPOAgent::new(PPOConfig {
            base: AgentConfig {
                learning_rate: 1e-2,
                ..config().base
            },
            ..config()
        })
        .unwrap();
        let trajectories = vec![trajectory(&mut agent, &[1.0, 1.0, 1.0])];
        let first = agent.train(&trajectories).unwrap().value_loss;
        let mut last = first;
        for _ in 0..50 {
            last = agent.train(&trajectories).unwrap().value_loss;
        }
        assert!(last < first);
    }

    #[test]
    fn test_restore_rejects_foreign_snapshots() {
        let mut agent = PPOAgent::new(config()).unwrap();
        let foreign = AgentSnapshot::new(AgentKind::Dqn);
        assert!(agent.restore(&foreign).is_err());

        let mut poisoned = agent.snapshot();
        if let Some(actor) = poisoned.networks.get_mut("actor") {
            actor[0] = f32::NAN;
        }
        assert!(matches!(
            agent.restore(&poisoned),
            Err(RLError::NumericalInstability(_))
        ));
    }
}
