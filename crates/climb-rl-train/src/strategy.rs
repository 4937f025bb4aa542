//! Per-algorithm episode loops
//!
//! Each strategy owns its agent and decides how experience flows into
//! learning: the value strategy replays transitions during the episode, the
//! policy strategy collects a trajectory and updates once it ends.

use async_trait::async_trait;
use tracing::debug;

use climb_rl_agent::{DQNAgent, PPOAgent};
use climb_rl_core::{
    Agent, AgentKind, Environment, Episode, Result, StateVector, Trajectory, TrajectoryStep, Transition,
};

use crate::config::TrainingConfig;
use crate::control::{RunState, TrainingControl};

/// What one episode produced
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    /// Episode record
    pub episode: Episode,
    /// Learning updates performed during the episode
    pub train_updates: usize,
    /// Mean loss over those updates
    pub mean_loss: Option<f32>,
    /// Whether a stop request cut the episode short
    pub interrupted: bool,
}

/// Learning loop for one agent family
#[async_trait]
pub trait EpisodeStrategy: Send {
    /// Algorithm driven by this strategy
    fn kind(&self) -> AgentKind;

    /// Reset `env`, play one episode and learn from it
    async fn run_episode(
        &mut self,
        env: &mut dyn Environment,
        control: &TrainingControl,
        interactive: bool,
        index: usize,
    ) -> Result<EpisodeOutcome>;

    /// Per-episode schedules, `completed` counts finished episodes
    fn after_episode(&mut self, completed: usize) -> Result<()>;

    /// Current exploration rate, if the agent explores explicitly
    fn exploration_rate(&self) -> Option<f32>;

    /// The trained agent
    fn agent(&self) -> &dyn Agent;

    /// The trained agent, mutably
    fn agent_mut(&mut self) -> &mut dyn Agent;
}

/// Build the strategy for the configured agent
pub fn build_strategy(config: &TrainingConfig) -> Result<Box<dyn EpisodeStrategy>> {
    Ok(match config.agent {
        AgentKind::Dqn => Box::new(ValueStrategy::new(DQNAgent::new(config.dqn.clone())?)),
        AgentKind::Ppo => Box::new(PolicyStrategy::new(PPOAgent::new(config.ppo.clone())?)),
    })
}

/// Between steps in interactive mode: wait out a pause and report a stop
async fn interrupted(control: &TrainingControl, interactive: bool) -> bool {
    interactive && control.wait_while_paused().await == RunState::Stopped
}

/// Value-based learning with replay
pub struct ValueStrategy {
    agent: DQNAgent,
}

impl ValueStrategy {
    /// Wrap a value agent
    #[must_use]
    pub fn new(agent: DQNAgent) -> Self {
        Self { agent }
    }

    /// The wrapped agent
    #[must_use]
    pub fn dqn(&self) -> &DQNAgent {
        &self.agent
    }

    fn maybe_train(&mut self, env_steps: usize, losses: &mut Vec<f32>) -> Result<()> {
        let batch_size = self.agent.config().batch_size;
        let train_every = self.agent.config().train_every_steps;
        if env_steps % train_every != 0 || self.agent.buffer().len() < batch_size {
            return Ok(());
        }
        match self.agent.train(batch_size) {
            Ok(stats) => {
                if !stats.recovered {
                    losses.push(stats.loss);
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EpisodeStrategy for ValueStrategy {
    fn kind(&self) -> AgentKind {
        AgentKind::Dqn
    }

    async fn run_episode(
        &mut self,
        env: &mut dyn Environment,
        control: &TrainingControl,
        interactive: bool,
        index: usize,
    ) -> Result<EpisodeOutcome> {
        let mut episode = Episode::begin(index);
        let mut state = env.reset().await?;
        let mut losses = Vec::new();
        let mut interrupted_by_stop = false;

        for step_index in 0..env.max_steps() {
            if step_index > 0 && interrupted(control, interactive).await {
                interrupted_by_stop = true;
                break;
            }
            let exploration = self.agent.exploration_rate();
            let action = self.agent.select_action(&state, exploration)?;
            let step = env.step(action).await?;
            episode.record(&step);

            self.agent.remember(Transition::new(
                state,
                action,
                step.reward,
                step.state.clone(),
                step.done,
            ))?;
            self.maybe_train(step_index + 1, &mut losses)?;

            if step.done {
                break;
            }
            state = step.state;
        }

        debug!(
            episode = index,
            reward = episode.total_reward,
            updates = losses.len(),
            "value episode finished"
        );
        Ok(EpisodeOutcome {
            train_updates: losses.len(),
            mean_loss: mean(&losses),
            interrupted: interrupted_by_stop,
            episode,
        })
    }

    fn after_episode(&mut self, completed: usize) -> Result<()> {
        self.agent.decay_exploration();
        let interval = self.agent.config().target_update_interval;
        if completed > 0 && completed % interval == 0 {
            self.agent.update_target_network()?;
            debug!(completed, "target network synchronised");
        }
        Ok(())
    }

    fn exploration_rate(&self) -> Option<f32> {
        Some(self.agent.exploration_rate())
    }

    fn agent(&self) -> &dyn Agent {
        &self.agent
    }

    fn agent_mut(&mut self) -> &mut dyn Agent {
        &mut self.agent
    }
}

/// On-policy learning from whole episodes
pub struct PolicyStrategy {
    agent: PPOAgent,
}

impl PolicyStrategy {
    /// Wrap a policy agent
    #[must_use]
    pub fn new(agent: PPOAgent) -> Self {
        Self { agent }
    }

    /// The wrapped agent
    #[must_use]
    pub fn ppo(&self) -> &PPOAgent {
        &self.agent
    }

    async fn collect(
        &mut self,
        env: &mut dyn Environment,
        control: &TrainingControl,
        interactive: bool,
        episode: &mut Episode,
        mut state: StateVector,
    ) -> Result<(Trajectory, bool)> {
        let mut trajectory = Trajectory::new();
        for step_index in 0..env.max_steps() {
            if step_index > 0 && interrupted(control, interactive).await {
                return Ok((trajectory, true));
            }
            let sample = self.agent.select_action(&state, true)?;
            let step = env.step(sample.action).await?;
            episode.record(&step);
            trajectory.push(TrajectoryStep {
                state,
                action: sample.action,
                reward: step.reward,
                log_prob: sample.log_prob,
                value: sample.value,
                done: step.done,
            });
            if step.done {
                break;
            }
            state = step.state;
        }
        Ok((trajectory, false))
    }
}

#[async_trait]
impl EpisodeStrategy for PolicyStrategy {
    fn kind(&self) -> AgentKind {
        AgentKind::Ppo
    }

    async fn run_episode(
        &mut self,
        env: &mut dyn Environment,
        control: &TrainingControl,
        interactive: bool,
        index: usize,
    ) -> Result<EpisodeOutcome> {
        let mut episode = Episode::begin(index);
        let state = env.reset().await?;
        let (trajectory, interrupted_by_stop) =
            self.collect(env, control, interactive, &mut episode, state).await?;

        let mut outcome = EpisodeOutcome {
            episode,
            train_updates: 0,
            mean_loss: None,
            interrupted: interrupted_by_stop,
        };
        if trajectory.is_empty() {
            return Ok(outcome);
        }

        let stats = self.agent.train(std::slice::from_ref(&trajectory))?;
        outcome.train_updates = 1;
        if !stats.recovered {
            outcome.mean_loss = Some(stats.policy_loss);
        }
        debug!(
            episode = index,
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            entropy = stats.entropy,
            clip_fraction = stats.clip_fraction,
            "policy update"
        );
        Ok(outcome)
    }

    fn after_episode(&mut self, _completed: usize) -> Result<()> {
        Ok(())
    }

    fn exploration_rate(&self) -> Option<f32> {
        None
    }

    fn agent(&self) -> &dyn Agent {
        &self.agent
    }

    fn agent_mut(&mut self) -> &mut dyn Agent {
        &mut self.agent
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climb_rl_core::{ClimbAction, Step};
    use climb_rl_env::{ClimbingEnvironment, CourseConfig, KinematicWorld};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn env(max_steps: usize) -> ClimbingEnvironment<KinematicWorld> {
        let course = CourseConfig {
            max_steps,
            ..CourseConfig::default()
        };
        ClimbingEnvironment::new(course, KinematicWorld::new()).unwrap()
    }

    fn config(agent: AgentKind) -> TrainingConfig {
        let mut config = TrainingConfig {
            agent,
            ..TrainingConfig::default()
        }
        .with_seed(3);
        config.dqn.batch_size = 8;
        config.dqn.train_every_steps = 2;
        config.dqn.target_update_interval = 2;
        config.dqn.base.hidden_dims = vec![16];
        config.ppo.base.hidden_dims = vec![16];
        config.ppo.ppo_epochs = 2;
        config
    }

    #[tokio::test]
    async fn test_value_strategy_trains_once_buffer_fills() {
        let mut env = env(40);
        let mut strategy = ValueStrategy::new(DQNAgent::new(config(AgentKind::Dqn).dqn).unwrap());
        let control = TrainingControl::new();

        let outcome = strategy.run_episode(&mut env, &control, false, 0).await.unwrap();
        assert!(outcome.episode.steps > 0);
        assert_eq!(strategy.dqn().buffer().len(), outcome.episode.steps);
        if outcome.episode.steps >= 8 {
            assert!(outcome.train_updates > 0);
        }
        assert!(!outcome.interrupted);

        let before = strategy.exploration_rate().unwrap();
        strategy.after_episode(1).unwrap();
        assert!(strategy.exploration_rate().unwrap() < before);
    }

    #[tokio::test]
    async fn test_policy_strategy_updates_at_episode_end() {
        let mut env = env(30);
        let mut strategy = PolicyStrategy::new(PPOAgent::new(config(AgentKind::Ppo).ppo).unwrap());
        let control = TrainingControl::new();

        let outcome = strategy.run_episode(&mut env, &control, false, 0).await.unwrap();
        assert!(outcome.episode.steps > 0);
        assert!(outcome.episode.termination.is_some());
        assert_eq!(outcome.train_updates, 1);
        assert!(strategy.exploration_rate().is_none());
    }

    #[tokio::test]
    async fn test_interactive_stop_cuts_the_episode_short() {
        let mut env = env(200);
        let mut strategy = build_strategy(&config(AgentKind::Dqn)).unwrap();
        let control = TrainingControl::new();
        control.set(RunState::Running);
        control.stop();

        let outcome = strategy.run_episode(&mut env, &control, true, 0).await.unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.episode.steps, 1);
    }

    /// Counts the steps taken through the wrapped environment
    struct CountingEnv {
        inner: ClimbingEnvironment<KinematicWorld>,
        steps: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Environment for CountingEnv {
        fn state_dim(&self) -> usize {
            self.inner.state_dim()
        }

        fn max_steps(&self) -> usize {
            self.inner.max_steps()
        }

        async fn reset(&mut self) -> Result<StateVector> {
            self.inner.reset().await
        }

        async fn step(&mut self, action: ClimbAction) -> Result<Step> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            self.inner.step(action).await
        }

        fn state(&self) -> StateVector {
            self.inner.state()
        }
    }

    #[tokio::test]
    async fn test_interactive_pause_holds_steps_until_resume() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut env = CountingEnv {
            inner: env(50),
            steps: steps.clone(),
        };
        let mut strategy = PolicyStrategy::new(PPOAgent::new(config(AgentKind::Ppo).ppo).unwrap());
        let control = TrainingControl::new();
        control.set(RunState::Running);
        assert!(control.pause());

        let runner = {
            let control = control.clone();
            tokio::spawn(async move {
                strategy
                    .run_episode(&mut env, &control, true, 0)
                    .await
                    .map(|outcome| (outcome.episode.steps, outcome.interrupted))
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(!runner.is_finished());

        assert!(control.resume());
        let (episode_steps, interrupted) = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!interrupted);
        assert!(episode_steps > 1);
        assert_eq!(steps.load(Ordering::SeqCst), episode_steps);
    }

    #[test]
    fn test_build_strategy_matches_config() {
        assert_eq!(build_strategy(&config(AgentKind::Dqn)).unwrap().kind(), AgentKind::Dqn);
        assert_eq!(build_strategy(&config(AgentKind::Ppo)).unwrap().kind(), AgentKind::Ppo);
    }
}
