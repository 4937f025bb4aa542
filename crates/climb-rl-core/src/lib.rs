//! Core reinforcement learning traits and types for the climbing course trainer
//!
//! This crate provides the shared vocabulary used by the environment, the
//! learning agents and the training orchestrator: actions, state vectors,
//! transitions, trajectories and the error type.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod action;
pub mod agent;
pub mod environment;
pub mod error;
pub mod state;
pub mod trajectory;

// Re-export core traits and types
pub use action::{ClimbAction, DiscreteSpace};
pub use agent::{Agent, AgentConfig, AgentKind, AgentSnapshot};
pub use environment::{Environment, Episode, Step, StepInfo, TerminationReason};
pub use error::{RLError, Result};
pub use state::{StateVector, STATE_DIM};
pub use trajectory::{Trajectory, TrajectoryStep, Transition, TransitionBatch};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Agent, ClimbAction, Environment, RLError, Result, StateVector, Step, StepInfo,
        TerminationReason, Trajectory, Transition,
    };
}
