//! Training orchestrator
//!
//! Drives episodes through the installed [`EpisodeStrategy`], keeps rolling
//! statistics, notifies observers and checkpoints on a fixed cadence. Control
//! requests from other tasks go through a shared [`TrainingControl`].

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use climb_rl_core::{AgentKind, Environment, Episode, RLError, Result};

use crate::callbacks::{CallbackRegistry, EpisodeEvent};
use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointRecord, CheckpointStore, FORMAT_VERSION,
};
use crate::config::TrainingConfig;
use crate::control::{RunState, TrainingControl};
use crate::stats::{EvaluationReport, StatsTracker, TrainingStats};
use crate::strategy::{build_strategy, EpisodeStrategy};

/// Owns the environment, the learning strategy and the run bookkeeping
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    env: Box<dyn Environment>,
    strategy: Box<dyn EpisodeStrategy>,
    control: TrainingControl,
    stats: Arc<RwLock<StatsTracker>>,
    episode_callbacks: CallbackRegistry<EpisodeEvent>,
    complete_callbacks: CallbackRegistry<TrainingStats>,
    store: Option<Arc<dyn CheckpointStore>>,
    history: Vec<CheckpointRecord>,
}

impl TrainingOrchestrator {
    /// Build the configured agent and check it fits `env`
    pub fn new(config: TrainingConfig, env: Box<dyn Environment>) -> Result<Self> {
        config.validate()?;
        let strategy = build_strategy(&config)?;
        Self::with_strategy(config, env, strategy)
    }

    /// Use an already constructed strategy
    pub fn with_strategy(
        config: TrainingConfig,
        env: Box<dyn Environment>,
        strategy: Box<dyn EpisodeStrategy>,
    ) -> Result<Self> {
        let (state_dim, action_count) = match strategy.kind() {
            AgentKind::Dqn => (config.dqn.state_dim, config.dqn.action_count),
            AgentKind::Ppo => (config.ppo.state_dim, config.ppo.action_count),
        };
        if state_dim != env.state_dim() {
            return Err(RLError::DimensionMismatch {
                expected: env.state_dim(),
                actual: state_dim,
            });
        }
        if action_count != env.action_count() {
            return Err(RLError::DimensionMismatch {
                expected: env.action_count(),
                actual: action_count,
            });
        }

        let mut tracker = StatsTracker::new(config.stats_window);
        tracker.set_exploration_rate(strategy.exploration_rate());
        Ok(Self {
            config,
            env,
            strategy,
            control: TrainingControl::new(),
            stats: Arc::new(RwLock::new(tracker)),
            episode_callbacks: CallbackRegistry::new("episode_complete"),
            complete_callbacks: CallbackRegistry::new("training_complete"),
            store: None,
            history: Vec::new(),
        })
    }

    /// Persist checkpoints through `store`
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Handle for pausing, resuming or stopping from other tasks
    #[must_use]
    pub fn control(&self) -> TrainingControl {
        self.control.clone()
    }

    /// Shared statistics, readable while training runs
    #[must_use]
    pub fn stats_handle(&self) -> Arc<RwLock<StatsTracker>> {
        Arc::clone(&self.stats)
    }

    /// Run configuration
    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Learning strategy
    #[must_use]
    pub fn strategy(&self) -> &dyn EpisodeStrategy {
        self.strategy.as_ref()
    }

    /// Records of successful checkpoint saves, oldest first
    #[must_use]
    pub fn checkpoint_history(&self) -> &[CheckpointRecord] {
        &self.history
    }

    /// Observe every finished episode
    pub fn on_episode_complete<F>(&mut self, callback: F)
    where
        F: FnMut(&EpisodeEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.episode_callbacks.register(callback);
    }

    /// Observe the end of a training run
    pub fn on_training_complete<F>(&mut self, callback: F)
    where
        F: FnMut(&TrainingStats) -> anyhow::Result<()> + Send + 'static,
    {
        self.complete_callbacks.register(callback);
    }

    /// Callback invocations that failed or panicked
    #[must_use]
    pub fn callback_failures(&self) -> u64 {
        self.episode_callbacks.failures() + self.complete_callbacks.failures()
    }

    /// Play `episode_count` episodes, learning as configured
    pub async fn start_training(&mut self, episode_count: usize) -> Result<TrainingStats> {
        self.control.set(RunState::Running);
        {
            let mut stats = self.stats.write().await;
            stats.begin_run(episode_count);
            stats.set_state(RunState::Running);
        }
        info!(
            agent = %self.strategy.kind(),
            episodes = episode_count,
            interactive = self.config.interactive,
            "starting training"
        );

        if let Err(e) = self.run_episodes(episode_count).await {
            self.control.set(RunState::Stopped);
            self.stats.write().await.set_state(RunState::Stopped);
            error!(error = %e, "training aborted");
            return Err(e);
        }

        let final_state = self.control.finish();
        let stats = {
            let mut tracker = self.stats.write().await;
            tracker.set_state(final_state);
            tracker.snapshot()
        };
        info!(
            state = %final_state,
            episodes = stats.current_episode,
            average_reward = stats.average_reward,
            success_rate = stats.success_rate,
            "training finished"
        );
        self.complete_callbacks.invoke(&stats);
        Ok(stats)
    }

    async fn run_episodes(&mut self, episode_count: usize) -> Result<()> {
        let first = self.stats.read().await.episodes();
        let agent_label = self.strategy.kind().to_string();

        for offset in 0..episode_count {
            tokio::task::yield_now().await;

            if self.control.state() == RunState::Paused {
                self.stats.write().await.set_state(RunState::Paused);
                info!("training paused");
                self.control.wait_while_paused().await;
            }
            if self.control.is_stopped() {
                info!(completed = offset, "training stopped");
                break;
            }
            self.stats.write().await.set_state(RunState::Running);

            let index = first + offset;
            let outcome = self
                .strategy
                .run_episode(self.env.as_mut(), &self.control, self.config.interactive, index)
                .await?;
            if outcome.interrupted {
                info!(
                    episode = index,
                    steps = outcome.episode.steps,
                    "training stopped mid-episode, partial episode discarded"
                );
                break;
            }
            let completed = index + 1;
            self.strategy.after_episode(completed)?;

            let exploration = self.strategy.exploration_rate();
            let snapshot = {
                let mut tracker = self.stats.write().await;
                tracker.record_episode(&outcome.episode);
                tracker.set_exploration_rate(exploration);
                tracker.snapshot()
            };

            counter!("climb_rl_episodes_total", 1, "agent" => agent_label.clone());
            histogram!("climb_rl_episode_reward", f64::from(outcome.episode.total_reward));
            if let Some(rate) = exploration {
                gauge!("climb_rl_exploration_rate", f64::from(rate));
            }
            if completed % self.config.log_interval == 0 {
                info!(
                    episode = completed,
                    reward = outcome.episode.total_reward,
                    steps = outcome.episode.steps,
                    average_reward = snapshot.average_reward,
                    success_rate = snapshot.success_rate,
                    exploration = ?exploration,
                    loss = ?outcome.mean_loss,
                    "training progress"
                );
            }

            self.episode_callbacks.invoke(&EpisodeEvent {
                episode: outcome.episode,
                stats: snapshot,
            });

            let interval = self.config.checkpoint_interval;
            if interval > 0 && completed % interval == 0 && self.store.is_some() {
                if let Err(e) = self.save_checkpoint().await {
                    error!(episode = completed, error = %e, "checkpoint save failed");
                    counter!("climb_rl_checkpoint_failures_total", 1);
                    self.stats.write().await.record_checkpoint_failure();
                }
            }
        }
        Ok(())
    }

    /// Pause at the next check point; false unless running
    pub fn pause_training(&self) -> bool {
        self.control.pause()
    }

    /// Resume a paused run; false unless paused
    pub fn resume_training(&self) -> bool {
        self.control.resume()
    }

    /// Stop at the next check point; false unless a run is active
    pub fn stop_training(&self) -> bool {
        self.control.stop()
    }

    /// Current statistics
    pub async fn get_training_stats(&self) -> TrainingStats {
        let mut stats = self.stats.read().await.snapshot();
        stats.state = self.control.state();
        stats
    }

    /// Write the agent and progress to the configured store
    ///
    /// The history record is only kept once the write succeeded.
    pub async fn save_checkpoint(&mut self) -> Result<CheckpointRecord> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| RLError::Persistence("no checkpoint store configured".to_string()))?;

        let (episodes, total_steps, best_reward, average_reward, success_rate) = {
            let stats = self.stats.read().await;
            (
                stats.episodes(),
                stats.total_steps(),
                stats.best_reward(),
                stats.average_reward(),
                stats.success_rate(),
            )
        };
        let record = CheckpointRecord {
            id: Uuid::new_v4(),
            episode: episodes,
            average_reward,
            success_rate,
            saved_at: Utc::now(),
        };
        let mut history = self.history.clone();
        history.push(record.clone());
        let excess = history.len().saturating_sub(self.config.checkpoint_history);
        history.drain(..excess);

        let agent = self.strategy.agent();
        let checkpoint = Checkpoint {
            snapshot: agent.snapshot(),
            metadata: CheckpointMetadata {
                format_version: FORMAT_VERSION,
                hyperparameters: agent.hyperparameters(),
                episodes,
                total_steps,
                best_reward,
                success_rate,
                history: history.clone(),
            },
        };
        store
            .save_checkpoint(&self.config.checkpoint_key, &checkpoint)
            .await?;

        self.history = history;
        Ok(record)
    }

    /// Load the stored checkpoint into the agent
    ///
    /// Returns false, keeping the current parameters, when nothing usable
    /// could be loaded.
    pub async fn restore_checkpoint(&mut self) -> bool {
        let Some(store) = self.store.clone() else {
            warn!("no checkpoint store configured, starting fresh");
            return false;
        };

        let loaded = match store.load_checkpoint(&self.config.checkpoint_key).await {
            Ok(checkpoint) => self
                .strategy
                .agent_mut()
                .restore(&checkpoint.snapshot)
                .map(|()| checkpoint),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(checkpoint) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.resume_from(&checkpoint.metadata);
                    stats.set_exploration_rate(self.strategy.exploration_rate());
                }
                info!(
                    episodes = checkpoint.metadata.episodes,
                    parameters = checkpoint.snapshot.parameter_count(),
                    "restored checkpoint"
                );
                self.history = checkpoint.metadata.history;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to restore checkpoint, continuing with fresh parameters");
                false
            }
        }
    }

    /// Greedy rollouts without learning
    pub async fn evaluate(&mut self, episodes: usize) -> Result<EvaluationReport> {
        let mut finished = Vec::with_capacity(episodes);
        for index in 0..episodes {
            let mut episode = Episode::begin(index);
            let mut state = self.env.reset().await?;
            for _ in 0..self.env.max_steps() {
                let action = self.strategy.agent().act(&state)?;
                let step = self.env.step(action).await?;
                episode.record(&step);
                if step.done {
                    break;
                }
                state = step.state;
            }
            finished.push(episode);
        }

        let report = EvaluationReport::from_episodes(&finished);
        info!(
            episodes = report.episodes,
            average_reward = report.average_reward,
            success_rate = report.success_rate,
            "evaluation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::strategy::EpisodeOutcome;
    use async_trait::async_trait;
    use climb_rl_core::Agent;
    use climb_rl_env::{ClimbingEnvironment, CourseConfig, KinematicWorld};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(agent: AgentKind, max_steps: usize) -> TrainingConfig {
        let mut config = TrainingConfig {
            agent,
            checkpoint_interval: 0,
            log_interval: 1,
            course: CourseConfig {
                max_steps,
                ..CourseConfig::default()
            },
            ..TrainingConfig::default()
        }
        .with_seed(11);
        config.dqn.batch_size = 8;
        config.dqn.base.hidden_dims = vec![16];
        config.ppo.base.hidden_dims = vec![16];
        config.ppo.ppo_epochs = 1;
        config
    }

    fn orchestrator(config: TrainingConfig) -> TrainingOrchestrator {
        let env = ClimbingEnvironment::new(config.course.clone(), KinematicWorld::new()).unwrap();
        TrainingOrchestrator::new(config, Box::new(env)).unwrap()
    }

    struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn save_checkpoint(&self, _key: &str, _checkpoint: &Checkpoint) -> Result<()> {
            Err(RLError::Persistence("disk full".to_string()))
        }

        async fn load_checkpoint(&self, _key: &str) -> Result<Checkpoint> {
            Err(RLError::Persistence("disk full".to_string()))
        }
    }

    /// Delegating strategy that requests a stop as episode `stop_at` starts
    struct StopDuring {
        inner: Box<dyn EpisodeStrategy>,
        stop_at: usize,
        after_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EpisodeStrategy for StopDuring {
        fn kind(&self) -> AgentKind {
            self.inner.kind()
        }

        async fn run_episode(
            &mut self,
            env: &mut dyn Environment,
            control: &TrainingControl,
            interactive: bool,
            index: usize,
        ) -> Result<EpisodeOutcome> {
            if index == self.stop_at {
                control.stop();
            }
            self.inner.run_episode(env, control, interactive, index).await
        }

        fn after_episode(&mut self, completed: usize) -> Result<()> {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.after_episode(completed)
        }

        fn exploration_rate(&self) -> Option<f32> {
            self.inner.exploration_rate()
        }

        fn agent(&self) -> &dyn Agent {
            self.inner.agent()
        }

        fn agent_mut(&mut self) -> &mut dyn Agent {
            self.inner.agent_mut()
        }
    }

    #[tokio::test]
    async fn test_runs_requested_episodes() {
        for agent in [AgentKind::Dqn, AgentKind::Ppo] {
            let mut orch = orchestrator(config(agent, 20));
            let completions = Arc::new(AtomicUsize::new(0));
            let seen = completions.clone();
            orch.on_training_complete(move |stats| {
                assert_eq!(stats.state, RunState::Completed);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

            let stats = orch.start_training(3).await.unwrap();
            assert_eq!(stats.current_episode, 3);
            assert_eq!(stats.total_episodes, 3);
            assert_eq!(stats.reward_history.len(), 3);
            assert!(stats.total_steps >= 3);
            assert!(stats.best_reward.is_some());
            assert_eq!(stats.exploration_rate.is_some(), agent == AgentKind::Dqn);
            assert_eq!(completions.load(Ordering::SeqCst), 1);
            assert_eq!(orch.get_training_stats().await.state, RunState::Completed);
        }
    }

    #[tokio::test]
    async fn test_stop_from_an_episode_callback() {
        let mut orch = orchestrator(config(AgentKind::Dqn, 10));
        let control = orch.control();
        orch.on_episode_complete(move |event| {
            if event.episode.index == 1 {
                control.stop();
            }
            Ok(())
        });

        let stats = orch.start_training(10).await.unwrap();
        assert_eq!(stats.current_episode, 2);
        assert_eq!(stats.state, RunState::Stopped);
    }

    #[tokio::test]
    async fn test_interrupted_episode_is_discarded() {
        let mut config = config(AgentKind::Dqn, 50);
        config.interactive = true;
        config.checkpoint_interval = 1;
        let after_calls = Arc::new(AtomicUsize::new(0));
        let strategy = StopDuring {
            inner: build_strategy(&config).unwrap(),
            stop_at: 1,
            after_calls: after_calls.clone(),
        };
        let env = ClimbingEnvironment::new(config.course.clone(), KinematicWorld::new()).unwrap();
        let mut orch = TrainingOrchestrator::with_strategy(config, Box::new(env), Box::new(strategy))
            .unwrap()
            .with_checkpoint_store(Arc::new(MemoryCheckpointStore::new()));
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        orch.on_episode_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let stats = orch.start_training(5).await.unwrap();
        assert_eq!(stats.state, RunState::Stopped);
        assert_eq!(stats.current_episode, 1);
        assert_eq!(stats.reward_history.len(), 1);
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(orch.checkpoint_history().len(), 1);
        assert_eq!(orch.checkpoint_history()[0].episode, 1);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_refused() {
        let mut orch = orchestrator(config(AgentKind::Ppo, 10));
        assert!(!orch.stop_training());
        assert_eq!(orch.get_training_stats().await.state, RunState::Idle);

        let stats = orch.start_training(2).await.unwrap();
        assert_eq!(stats.current_episode, 2);
        assert_eq!(stats.state, RunState::Completed);
        assert!(!orch.stop_training());
    }

    #[tokio::test]
    async fn test_pause_waits_for_resume() {
        let mut orch = orchestrator(config(AgentKind::Ppo, 10));
        let pauser = orch.control();
        orch.on_episode_complete(move |event| {
            if event.episode.index == 0 {
                pauser.pause();
            }
            Ok(())
        });

        let control = orch.control();
        let resumer = tokio::spawn(async move {
            let mut rx = control.subscribe();
            while *rx.borrow_and_update() != RunState::Paused {
                rx.changed().await.unwrap();
            }
            control.resume()
        });

        let stats = orch.start_training(3).await.unwrap();
        assert!(resumer.await.unwrap());
        assert_eq!(stats.current_episode, 3);
        assert_eq!(stats.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_callback_failures_do_not_abort_training() {
        let mut orch = orchestrator(config(AgentKind::Dqn, 10));
        let calls = Arc::new(AtomicUsize::new(0));
        orch.on_episode_complete(|_| Err(anyhow::anyhow!("observer failed")));
        orch.on_episode_complete(|_| panic!("observer panicked"));
        let counter = calls.clone();
        orch.on_episode_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let stats = orch.start_training(3).await.unwrap();
        assert_eq!(stats.current_episode, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.callback_failures(), 6);
    }

    #[tokio::test]
    async fn test_checkpoint_cadence_keeps_bounded_history() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut config = config(AgentKind::Dqn, 10);
        config.checkpoint_interval = 2;
        config.checkpoint_history = 2;
        let mut orch = orchestrator(config).with_checkpoint_store(store.clone());

        orch.start_training(6).await.unwrap();

        let checkpoint = store.load_checkpoint("latest").await.unwrap();
        assert_eq!(checkpoint.metadata.episodes, 6);
        let saved: Vec<usize> = checkpoint.metadata.history.iter().map(|r| r.episode).collect();
        assert_eq!(saved, vec![4, 6]);
        assert_eq!(orch.checkpoint_history().len(), 2);
        assert_eq!(checkpoint.snapshot, orch.strategy().agent().snapshot());
    }

    #[tokio::test]
    async fn test_failed_cadence_saves_are_counted() {
        let mut config = config(AgentKind::Ppo, 10);
        config.checkpoint_interval = 1;
        let mut orch = orchestrator(config).with_checkpoint_store(Arc::new(FailingStore));

        let stats = orch.start_training(3).await.unwrap();
        assert_eq!(stats.current_episode, 3);
        assert_eq!(stats.checkpoint_failures, 3);
        assert!(orch.checkpoint_history().is_empty());
        assert!(orch.save_checkpoint().await.is_err());
    }

    #[tokio::test]
    async fn test_restore_resumes_progress() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut first = orchestrator(config(AgentKind::Dqn, 10)).with_checkpoint_store(store.clone());
        first.start_training(2).await.unwrap();
        first.save_checkpoint().await.unwrap();

        let mut second = orchestrator(config(AgentKind::Dqn, 10).with_seed(99))
            .with_checkpoint_store(store.clone());
        assert!(second.restore_checkpoint().await);
        assert_eq!(
            second.strategy().agent().snapshot(),
            first.strategy().agent().snapshot()
        );
        assert_eq!(second.get_training_stats().await.current_episode, 2);

        let stats = second.start_training(1).await.unwrap();
        assert_eq!(stats.current_episode, 3);
    }

    #[tokio::test]
    async fn test_failed_restore_continues_fresh() {
        let mut orch = orchestrator(config(AgentKind::Ppo, 10))
            .with_checkpoint_store(Arc::new(MemoryCheckpointStore::new()));
        let before = orch.strategy().agent().snapshot();
        assert!(!orch.restore_checkpoint().await);
        assert_eq!(orch.strategy().agent().snapshot(), before);

        let stats = orch.start_training(1).await.unwrap();
        assert_eq!(stats.current_episode, 1);
    }

    #[tokio::test]
    async fn test_restore_rejects_another_agent_kind() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut value = orchestrator(config(AgentKind::Dqn, 10)).with_checkpoint_store(store.clone());
        value.save_checkpoint().await.unwrap();

        let mut policy = orchestrator(config(AgentKind::Ppo, 10)).with_checkpoint_store(store);
        assert!(!policy.restore_checkpoint().await);
    }

    #[tokio::test]
    async fn test_evaluate_is_greedy_and_does_not_learn() {
        let mut orch = orchestrator(config(AgentKind::Dqn, 15));
        let before = orch.strategy().agent().snapshot();

        let report = orch.evaluate(2).await.unwrap();
        assert_eq!(report.episodes, 2);
        assert!(report.average_steps >= 1.0);
        assert_eq!(orch.strategy().agent().snapshot(), before);
        assert_eq!(orch.get_training_stats().await.current_episode, 0);
    }

    #[test]
    fn test_rejects_mismatched_state_dimension() {
        let mut config = config(AgentKind::Dqn, 10);
        config.dqn.state_dim = 10;
        let env = ClimbingEnvironment::new(config.course.clone(), KinematicWorld::new()).unwrap();
        assert!(matches!(
            TrainingOrchestrator::new(config, Box::new(env)),
            Err(RLError::DimensionMismatch { expected: 14, actual: 10 })
        ));
    }
}
