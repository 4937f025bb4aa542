//! Priority-ordered reward calculation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RewardConfig;
use crate::physics::Vec3;

/// Per-episode counters the reward rules depend on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    /// Steps taken so far
    pub step: usize,
    /// Sum of rewards so far
    pub cumulative_reward: f32,
    /// Highest zone reached this episode
    pub highest_zone: Option<usize>,
    /// Last zone the agent stood in
    pub last_zone: Option<usize>,
    /// Consecutive steps with unchanged zone occupancy
    pub steps_in_zone: u32,
    /// Steps until Jump is allowed again
    pub jump_cooldown: u32,
    occupancy: Option<usize>,
}

impl EpisodeProgress {
    /// Clear every counter for a new episode
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn observe_zone(&mut self, zone: Option<usize>) {
        if zone == self.occupancy {
            self.steps_in_zone = self.steps_in_zone.saturating_add(1);
        } else {
            self.occupancy = zone;
            self.steps_in_zone = 0;
        }
    }
}

/// Which rule produced a reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardComponent {
    /// Success zone reached
    Success,
    /// Fell or left the course bounds
    Failure,
    /// New highest zone
    ZoneProgress,
    /// Dropped to a lower zone
    Regression,
    /// Time, alignment and stagnation shaping
    Shaping,
}

impl fmt::Display for RewardComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::ZoneProgress => "zone_progress",
            Self::Regression => "regression",
            Self::Shaping => "shaping",
        };
        f.write_str(name)
    }
}

/// Observations about the agent after the physics tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardInput {
    /// Zone occupied after the tick
    pub zone: Option<usize>,
    /// Below the fall floor
    pub fallen: bool,
    /// Outside the lateral or longitudinal bounds
    pub out_of_bounds: bool,
    /// Agent velocity
    pub velocity: Vec3,
    /// Vector from the agent to the goal
    pub to_goal: Vec3,
}

/// Reward and the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardOutcome {
    /// Clamped reward
    pub reward: f32,
    /// Producing rule
    pub component: RewardComponent,
}

/// Applies the reward rules in priority order
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    config: RewardConfig,
    success_zone: usize,
}

impl RewardCalculator {
    /// Create a calculator; `success_zone` is the index of the final zone
    #[must_use]
    pub fn new(config: RewardConfig, success_zone: usize) -> Self {
        Self {
            config,
            success_zone,
        }
    }

    /// Reward configuration
    #[must_use]
    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Compute the reward for one step and update the zone markers
    ///
    /// The first matching rule wins: success, failure, new highest zone,
    /// regression, then shaping. The result is clamped to the configured range.
    pub fn calculate(&self, progress: &mut EpisodeProgress, input: &RewardInput) -> RewardOutcome {
        progress.observe_zone(input.zone);

        let (raw, component) = self.select_rule(progress, input);
        if let Some(zone) = input.zone {
            progress.last_zone = Some(zone);
        }

        let c = &self.config;
        RewardOutcome {
            reward: raw.clamp(c.reward_min, c.reward_max),
            component,
        }
    }

    fn select_rule(&self, progress: &mut EpisodeProgress, input: &RewardInput) -> (f32, RewardComponent) {
        let c = &self.config;

        if input.zone == Some(self.success_zone) {
            progress.highest_zone = Some(self.success_zone);
            return (c.success_reward, RewardComponent::Success);
        }
        if input.fallen || input.out_of_bounds {
            return (c.failure_reward, RewardComponent::Failure);
        }

        if let Some(zone) = input.zone {
            if progress.highest_zone.map_or(true, |highest| zone > highest) {
                progress.highest_zone = Some(zone);
                return (c.zone_progress(zone), RewardComponent::ZoneProgress);
            }
            if let Some(last) = progress.last_zone.filter(|&last| zone < last) {
                let lost = (last - zone) as f32;
                return (-c.regression_penalty * lost, RewardComponent::Regression);
            }
        }

        (self.shaping(progress, input), RewardComponent::Shaping)
    }

    fn shaping(&self, progress: &EpisodeProgress, input: &RewardInput) -> f32 {
        let c = &self.config;
        let mut reward = -c.time_penalty;

        match input.zone {
            None => {
                let speed = input.velocity.norm();
                let distance = input.to_goal.norm();
                if speed > f32::EPSILON && distance > f32::EPSILON {
                    let cos = input.velocity.dot(&input.to_goal) / (speed * distance);
                    reward += c.alignment_weight * cos;
                }
            }
            Some(_) if progress.steps_in_zone > c.stagnation_grace_steps => {
                let overdue = (progress.steps_in_zone - c.stagnation_grace_steps) as f32;
                reward -= (c.stagnation_rate * overdue).min(c.stagnation_cap);
            }
            Some(_) => {}
        }
        reward
    }
}
