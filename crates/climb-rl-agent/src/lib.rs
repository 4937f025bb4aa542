//! Learning agents for the climbing course trainer
//!
//! This crate provides:
//! - A small multi-layer perceptron with a manual backward pass
//! - Adam optimisation and gradient-norm clipping
//! - An experience replay buffer
//! - Deep Q-Networks (DQN) with a delayed target estimator
//! - Proximal Policy Optimization (PPO) with GAE

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod buffer;
pub mod dqn;
pub mod network;
pub mod optim;
pub mod ppo;
pub mod utils;

// Re-export agents
pub use dqn::{DQNAgent, DQNConfig, DQNTrainStats};
pub use ppo::{ActionSample, PPOAgent, PPOConfig, PPOTrainingStats};

// Re-export utilities
pub use buffer::ReplayBuffer;
pub use network::Mlp;
pub use optim::{clip_grad_norm, Adam};
pub use utils::{gae_advantages, standardize, PROB_FLOOR};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DQNAgent, DQNConfig, PPOAgent, PPOConfig, ReplayBuffer};
    pub use climb_rl_core::prelude::*;
}
