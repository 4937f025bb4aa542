//! Course, action-force and reward configuration
//!
//! All numeric tuning lives here. Defaults describe a four-step staircase
//! climbing along +z, with the last step acting as the success zone.

use serde::{Deserialize, Serialize};
use std::path::Path;

use climb_rl_core::{RLError, Result};

use crate::physics::Vec3;

/// One stage of the course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    /// Human-readable name
    pub name: String,
    /// Height of the standing surface
    pub floor_height: f32,
    /// Start of the zone along z
    pub depth_min: f32,
    /// End of the zone along z
    pub depth_max: f32,
    /// Half width of the zone along x, centred on x = 0
    pub half_width: f32,
    /// Slack absorbing physics-settling jitter
    pub tolerance: f32,
}

impl ZoneSpec {
    /// Centre of the standing surface
    #[must_use]
    pub fn surface_centre(&self) -> Vec3 {
        Vec3::new(
            0.0,
            self.floor_height,
            0.5 * (self.depth_min + self.depth_max),
        )
    }
}

/// Axis-aligned lateral (x) and longitudinal (z) limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum x
    pub min_x: f32,
    /// Maximum x
    pub max_x: f32,
    /// Minimum z
    pub min_z: f32,
    /// Maximum z
    pub max_z: f32,
}

impl Bounds {
    /// Whether a position lies inside the box
    #[must_use]
    pub fn contains(&self, position: &Vec3) -> bool {
        position.x >= self.min_x
            && position.x <= self.max_x
            && position.z >= self.min_z
            && position.z <= self.max_z
    }
}

/// Force and impulse magnitudes per action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionForces {
    /// Sustained force for directional actions
    pub move_force: f32,
    /// Vertical impulse for Jump
    pub jump_impulse: f32,
    /// Upward force applied by Grab
    pub grab_lift: f32,
    /// Forward force applied by Grab
    pub grab_push: f32,
    /// Steps to wait between jumps
    pub jump_cooldown_steps: u32,
}

impl Default for ActionForces {
    fn default() -> Self {
        Self {
            move_force: 25.0,
            jump_impulse: 6.0,
            grab_lift: 30.0,
            grab_push: 8.0,
            jump_cooldown_steps: 20,
        }
    }
}

/// Thresholds for the grounded predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundedConfig {
    /// Maximum |v_y| while grounded
    pub vertical_speed_threshold: f32,
    /// Feet-to-surface distance accepted when contacts are missing
    pub support_proximity: f32,
}

impl Default for GroundedConfig {
    fn default() -> Self {
        Self {
            vertical_speed_threshold: 0.5,
            support_proximity: 0.1,
        }
    }
}

/// Reward magnitudes for the priority-ordered reward rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Reward for reaching the success zone
    pub success_reward: f32,
    /// Reward for falling or leaving the bounds
    pub failure_reward: f32,
    /// Progress reward for the first zone
    pub zone_progress_base: f32,
    /// Multiplier applied per zone index
    pub zone_progress_decay: f32,
    /// Flat bonus added to every new highest zone
    pub first_arrival_bonus: f32,
    /// Penalty per zone lost when dropping down
    pub regression_penalty: f32,
    /// Cost paid every step
    pub time_penalty: f32,
    /// Scale of the off-track direction alignment term
    pub alignment_weight: f32,
    /// Penalty growth per step spent in one zone past the grace period
    pub stagnation_rate: f32,
    /// Steps in one zone before stagnation is penalised
    pub stagnation_grace_steps: u32,
    /// Largest stagnation penalty
    pub stagnation_cap: f32,
    /// Lower clamp bound
    pub reward_min: f32,
    /// Upper clamp bound
    pub reward_max: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            success_reward: 100.0,
            failure_reward: -50.0,
            zone_progress_base: 20.0,
            zone_progress_decay: 0.8,
            first_arrival_bonus: 5.0,
            regression_penalty: 10.0,
            time_penalty: 0.01,
            alignment_weight: 0.05,
            stagnation_rate: 0.001,
            stagnation_grace_steps: 120,
            stagnation_cap: 0.5,
            reward_min: -50.0,
            reward_max: 100.0,
        }
    }
}

impl RewardConfig {
    /// Progress reward for arriving at `zone` as a new highest zone
    #[must_use]
    pub fn zone_progress(&self, zone: usize) -> f32 {
        let exponent = i32::try_from(zone).unwrap_or(i32::MAX);
        self.zone_progress_base * self.zone_progress_decay.powi(exponent) + self.first_arrival_bonus
    }
}

/// Full description of a climbing course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseConfig {
    /// Agent centre at reset
    pub start_position: Vec3,
    /// Half edge length of the agent cube
    pub agent_half_extent: f32,
    /// Agent mass
    pub agent_mass: f32,
    /// Zones from lowest to highest; the last one is the success zone
    pub zones: Vec<ZoneSpec>,
    /// Target the direction features point at
    pub goal_position: Vec3,
    /// Lateral and longitudinal limits
    pub bounds: Bounds,
    /// Height below which the agent has fallen
    pub fall_floor: f32,
    /// Height used to normalise the y coordinate
    pub max_height: f32,
    /// Height of the ground surface
    pub ground_height: f32,
    /// Velocity magnitude mapped to 1.0
    pub velocity_scale: f32,
    /// Step budget per episode
    pub max_steps: usize,
    /// Fixed physics tick
    pub dt: f32,
    /// Action magnitudes
    pub forces: ActionForces,
    /// Grounded predicate thresholds
    pub grounded: GroundedConfig,
    /// Reward magnitudes
    pub rewards: RewardConfig,
}

impl Default for CourseConfig {
    fn default() -> Self {
        let zones = (0..4)
            .map(|i| {
                let depth_min = 6.0 + 6.0 * i as f32;
                ZoneSpec {
                    name: if i == 3 {
                        "summit".to_string()
                    } else {
                        format!("step-{}", i + 1)
                    },
                    floor_height: (i + 1) as f32,
                    depth_min,
                    depth_max: depth_min + 6.0,
                    half_width: 4.0,
                    tolerance: 0.25,
                }
            })
            .collect::<Vec<_>>();
        let goal_position = zones
            .last()
            .map_or_else(Vec3::zeros, ZoneSpec::surface_centre);

        Self {
            start_position: Vec3::new(0.0, 0.5, 0.0),
            agent_half_extent: 0.5,
            agent_mass: 1.0,
            zones,
            goal_position,
            bounds: Bounds {
                min_x: -10.0,
                max_x: 10.0,
                min_z: -5.0,
                max_z: 40.0,
            },
            fall_floor: -2.0,
            max_height: 8.0,
            ground_height: 0.0,
            velocity_scale: 10.0,
            max_steps: 500,
            dt: 1.0 / 60.0,
            forces: ActionForces::default(),
            grounded: GroundedConfig::default(),
            rewards: RewardConfig::default(),
        }
    }
}

impl CourseConfig {
    /// Load a course from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Index of the success zone
    #[must_use]
    pub fn success_zone(&self) -> usize {
        self.zones.len().saturating_sub(1)
    }

    /// Largest distance between two points of the course
    #[must_use]
    pub fn max_distance(&self) -> f32 {
        let dx = self.bounds.max_x - self.bounds.min_x;
        let dy = self.max_height - self.fall_floor;
        let dz = self.bounds.max_z - self.bounds.min_z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Check the invariants the environment relies on
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RLError::InvalidInput(format!("course config: {msg}")));

        if self.zones.is_empty() {
            return invalid("at least one zone is required");
        }
        if self
            .zones
            .windows(2)
            .any(|w| w[1].floor_height < w[0].floor_height)
        {
            return invalid("zones must be ordered by floor height");
        }
        if self
            .zones
            .iter()
            .any(|z| z.tolerance < 0.0 || z.depth_max <= z.depth_min || z.half_width <= 0.0)
        {
            return invalid("zone bands must be non-empty with non-negative tolerance");
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be positive");
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return invalid("dt must be positive");
        }
        if self.bounds.min_x >= self.bounds.max_x || self.bounds.min_z >= self.bounds.max_z {
            return invalid("bounds must be non-empty");
        }
        if self.fall_floor >= self.max_height || self.velocity_scale <= 0.0 {
            return invalid("normalisation ranges must be non-empty");
        }
        if self.agent_half_extent <= 0.0 || self.agent_mass <= 0.0 {
            return invalid("agent size and mass must be positive");
        }

        let r = &self.rewards;
        if r.reward_min >= r.reward_max {
            return invalid("reward_min must be below reward_max");
        }
        if (r.success_reward - r.reward_max).abs() > f32::EPSILON {
            return invalid("success_reward must equal reward_max");
        }
        if r.failure_reward < r.reward_min {
            return invalid("failure_reward must not be clamped away");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_course_is_valid() {
        let config = CourseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.success_zone(), 3);
        assert_relative_eq!(config.goal_position.y, 4.0);
    }

    #[test]
    fn test_progress_reward_diminishes_with_zone_index() {
        let rewards = RewardConfig::default();
        assert_relative_eq!(
            rewards.zone_progress(0),
            rewards.zone_progress_base + rewards.first_arrival_bonus
        );
        assert!(rewards.zone_progress(1) < rewards.zone_progress(0));
        assert!(rewards.zone_progress(3) < rewards.zone_progress(2));
    }

    #[test]
    fn test_success_reward_must_be_the_maximum() {
        let mut config = CourseConfig::default();
        config.rewards.success_reward = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CourseConfig = serde_json::from_str(r#"{ "max_steps": 42 }"#).unwrap();
        assert_eq!(config.max_steps, 42);
        assert_eq!(config.zones.len(), 4);
        config.validate().unwrap();
    }
}
