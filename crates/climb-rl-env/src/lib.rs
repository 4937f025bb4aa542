//! Staged climbing course environment
//!
//! This crate provides:
//! - The physics and rendering collaborator interfaces
//! - A small axis-aligned kinematic world for headless runs
//! - Course configuration, zone classification and reward rules
//! - The climbing environment state machine

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod climbing;
pub mod config;
pub mod kinematic;
pub mod physics;
pub mod render;
pub mod reward;
pub mod zone;

pub use climbing::ClimbingEnvironment;
pub use config::{ActionForces, Bounds, CourseConfig, GroundedConfig, RewardConfig, ZoneSpec};
pub use kinematic::KinematicWorld;
pub use physics::{BodyDesc, BodyHandle, BodyKind, BodyTag, PhysicsBackend, Shape, Vec3};
pub use render::{RenderingBackend, TraceRenderer};
pub use reward::{EpisodeProgress, RewardCalculator, RewardComponent, RewardInput, RewardOutcome};
pub use zone::ZoneClassifier;

// Re-export core types
pub use climb_rl_core::{ClimbAction, Environment, Step, StepInfo, TerminationReason};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{ClimbingEnvironment, CourseConfig, KinematicWorld, PhysicsBackend};
    pub use climb_rl_core::prelude::*;
}
