//! Training orchestration for the climbing course trainer
//!
//! This crate provides:
//! - Episode strategies for value-based and policy-gradient agents
//! - The training orchestrator with pause/resume/stop control
//! - Rolling training statistics and episode observers
//! - Checkpoint formats with file and in-memory stores

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod control;
pub mod orchestrator;
pub mod stats;
pub mod strategy;

pub use callbacks::{CallbackRegistry, EpisodeEvent};
pub use checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointRecord, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, FORMAT_VERSION,
};
pub use config::TrainingConfig;
pub use control::{RunState, TrainingControl};
pub use orchestrator::TrainingOrchestrator;
pub use stats::{EvaluationReport, StatsTracker, TrainingStats};
pub use strategy::{build_strategy, EpisodeOutcome, EpisodeStrategy, PolicyStrategy, ValueStrategy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        FileCheckpointStore, RunState, TrainingConfig, TrainingControl, TrainingOrchestrator,
        TrainingStats,
    };
    pub use climb_rl_core::prelude::*;
}
