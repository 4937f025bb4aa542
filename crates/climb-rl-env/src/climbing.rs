//! Staged climbing course environment

use async_trait::async_trait;
use tracing::{debug, warn};

use climb_rl_core::{
    state::layout, ClimbAction, Environment, RLError, Result, StateVector, Step, StepInfo,
    TerminationReason, STATE_DIM,
};

use crate::config::CourseConfig;
use crate::physics::{BodyDesc, BodyHandle, BodyKind, BodyTag, PhysicsBackend, Shape, Vec3};
use crate::render::RenderingBackend;
use crate::reward::{EpisodeProgress, RewardCalculator, RewardInput, RewardOutcome};
use crate::zone::ZoneClassifier;

/// Thickness of the ground slab and of ledge lips
const GROUND_THICKNESS: f32 = 1.0;
const LEDGE_LIP: f32 = 0.1;
/// Below this magnitude a goal-direction component reads as zero
const DIRECTION_DEADZONE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Terminal,
}

/// Agent kinematics after a physics tick
#[derive(Debug, Clone, Copy)]
struct Kinematics {
    position: Vec3,
    velocity: Vec3,
}

/// Climbing course environment over a physics backend
pub struct ClimbingEnvironment<P: PhysicsBackend> {
    config: CourseConfig,
    physics: P,
    renderer: Option<Box<dyn RenderingBackend>>,
    zones: ZoneClassifier,
    rewards: RewardCalculator,
    agent: BodyHandle,
    progress: EpisodeProgress,
    current_zone: Option<usize>,
    phase: Phase,
    state: StateVector,
}

impl<P: PhysicsBackend> ClimbingEnvironment<P> {
    /// Build the course inside `physics` and place the agent at the start pose
    pub fn new(config: CourseConfig, mut physics: P) -> Result<Self> {
        config.validate()?;
        let agent = build_course(&config, &mut physics);
        let zones = ZoneClassifier::new(config.zones.clone(), config.agent_half_extent);
        let rewards = RewardCalculator::new(config.rewards.clone(), config.success_zone());

        let mut env = Self {
            config,
            physics,
            renderer: None,
            zones,
            rewards,
            agent,
            progress: EpisodeProgress::default(),
            current_zone: None,
            phase: Phase::Active,
            state: StateVector::zeros(STATE_DIM),
        };
        let kinematics = env.kinematics()?;
        env.state = env.observe(&kinematics);
        Ok(env)
    }

    /// Attach a renderer updated after every step
    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn RenderingBackend>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Course configuration
    pub fn config(&self) -> &CourseConfig {
        &self.config
    }

    /// Physics backend
    pub fn physics(&self) -> &P {
        &self.physics
    }

    /// Mutable physics backend, for scripted setups
    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    /// Handle of the agent body
    pub fn agent_handle(&self) -> BodyHandle {
        self.agent
    }

    /// Per-episode counters
    pub fn progress(&self) -> &EpisodeProgress {
        &self.progress
    }

    /// Zone occupied after the last step
    pub fn current_zone(&self) -> Option<usize> {
        self.current_zone
    }

    /// Whether the agent can jump: slow vertical motion and standing on a support
    pub fn is_grounded(&self) -> Result<bool> {
        let kin = self.kinematics()?;
        if kin.velocity.y.abs() >= self.config.grounded.vertical_speed_threshold {
            return Ok(false);
        }
        if self.touching(BodyTag::is_support)? {
            return Ok(true);
        }

        // Contact reporting can miss resting contacts, fall back to proximity
        let feet = self.zones.feet_height(&kin.position);
        let proximity = self.config.grounded.support_proximity;
        let near_ground = (feet - self.config.ground_height).abs() <= proximity;
        let near_zone_floor = self
            .current_zone
            .and_then(|zone| self.zones.zone(zone))
            .is_some_and(|zone| (feet - zone.floor_height).abs() <= proximity);
        Ok(near_ground || near_zone_floor)
    }

    /// Whether the agent is in contact with any ledge
    pub fn is_touching_ledge(&self) -> Result<bool> {
        self.touching(|tag| matches!(tag, BodyTag::Ledge(_)))
    }

    /// Whether a position lies outside the lateral or longitudinal bounds
    #[must_use]
    pub fn is_out_of_bounds(&self, position: &Vec3) -> bool {
        !self.config.bounds.contains(position)
    }

    /// Termination reason for the agent at `position`, if any
    #[must_use]
    pub fn is_terminal(&self, position: &Vec3, zone: Option<usize>) -> Option<TerminationReason> {
        if zone == Some(self.config.success_zone()) {
            Some(TerminationReason::Success)
        } else if position.y < self.config.fall_floor {
            Some(TerminationReason::Fallen)
        } else if self.is_out_of_bounds(position) {
            Some(TerminationReason::OutOfBounds)
        } else if self.progress.step >= self.config.max_steps {
            Some(TerminationReason::MaxSteps)
        } else {
            None
        }
    }

    /// Reward for arriving at `position` with `velocity`, updating the zone markers
    pub fn calculate_reward(&mut self, position: &Vec3, velocity: &Vec3) -> RewardOutcome {
        let zone = self.zones.classify(position);
        let input = RewardInput {
            zone,
            fallen: position.y < self.config.fall_floor,
            out_of_bounds: self.is_out_of_bounds(position),
            velocity: *velocity,
            to_goal: self.config.goal_position - position,
        };
        self.rewards.calculate(&mut self.progress, &input)
    }

    fn touching(&self, predicate: impl Fn(BodyTag) -> bool) -> Result<bool> {
        let contacts = self.physics.colliding_bodies(self.agent)?;
        Ok(contacts
            .into_iter()
            .filter_map(|handle| self.physics.body_tag(handle))
            .any(predicate))
    }

    fn kinematics(&self) -> Result<Kinematics> {
        Ok(Kinematics {
            position: self.physics.position(self.agent)?,
            velocity: self.physics.velocity(self.agent)?,
        })
    }

    /// Apply the force or impulse for `action`; returns whether it was applied
    fn apply_action(&mut self, action: ClimbAction) -> Result<bool> {
        let forces = &self.config.forces;
        let push = forces.move_force;
        let force = match action {
            ClimbAction::Forward => Vec3::new(0.0, 0.0, push),
            ClimbAction::Backward => Vec3::new(0.0, 0.0, -push),
            ClimbAction::Left => Vec3::new(-push, 0.0, 0.0),
            ClimbAction::Right => Vec3::new(push, 0.0, 0.0),
            ClimbAction::Jump => {
                if self.progress.jump_cooldown > 0 || !self.is_grounded()? {
                    return Ok(false);
                }
                let impulse = Vec3::new(0.0, self.config.forces.jump_impulse, 0.0);
                self.physics.apply_impulse(self.agent, impulse)?;
                self.progress.jump_cooldown = self.config.forces.jump_cooldown_steps;
                return Ok(true);
            }
            ClimbAction::Grab => {
                if !self.is_touching_ledge()? {
                    return Ok(false);
                }
                Vec3::new(0.0, forces.grab_lift, forces.grab_push)
            }
        };
        self.physics.apply_force(self.agent, force)?;
        Ok(true)
    }

    fn observe(&self, kin: &Kinematics) -> StateVector {
        let c = &self.config;
        let mut state = vec![0.0_f32; STATE_DIM];

        let position = [
            normalise(kin.position.x, c.bounds.min_x, c.bounds.max_x),
            normalise(kin.position.y, c.fall_floor, c.max_height),
            normalise(kin.position.z, c.bounds.min_z, c.bounds.max_z),
        ];
        state[layout::POSITION..layout::POSITION + 3].copy_from_slice(&position);
        for axis in 0..3 {
            state[layout::VELOCITY + axis] =
                (kin.velocity[axis] / c.velocity_scale).clamp(-1.0, 1.0);
        }

        let max_distance = c.max_distance();
        let to_goal = c.goal_position - kin.position;
        state[layout::GOAL_DISTANCE] = (to_goal.norm() / max_distance).clamp(0.0, 1.0);
        for axis in 0..3 {
            let d = to_goal[axis];
            state[layout::GOAL_DIRECTION + axis] = if d.abs() < DIRECTION_DEADZONE {
                0.0
            } else {
                d.signum()
            };
        }

        let zone_count = self.zones.zone_count() as f32;
        state[layout::ZONE] = self
            .current_zone
            .map_or(0.0, |zone| (zone + 1) as f32 / zone_count);
        if let Some(next) = self
            .zones
            .next_zone(self.current_zone, self.progress.highest_zone)
        {
            let target = next.surface_centre() + Vec3::new(0.0, c.agent_half_extent, 0.0);
            state[layout::NEXT_ZONE_DISTANCE] =
                ((target - kin.position).norm() / max_distance).clamp(0.0, 1.0);
        }
        state[layout::IN_ZONE] = if self.current_zone.is_some() { 1.0 } else { 0.0 };
        state[layout::EPISODE_PROGRESS] =
            (self.progress.step as f32 / c.max_steps as f32).clamp(0.0, 1.0);

        StateVector::new(state)
    }

    fn update_renderer(&mut self, position: Vec3) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.update_agent_pose(position);
            renderer.update_camera(position);
            if let Err(e) = renderer.render() {
                warn!(error = %e, "render failed");
            }
        }
    }
}

/// Map `value` from `[low, high]` onto `[-1, 1]`
fn normalise(value: f32, low: f32, high: f32) -> f32 {
    (2.0 * (value - low) / (high - low) - 1.0).clamp(-1.0, 1.0)
}

/// Create ground, platforms, ledges and the agent; returns the agent handle
fn build_course<P: PhysicsBackend>(config: &CourseConfig, physics: &mut P) -> BodyHandle {
    let b = &config.bounds;
    physics.create_body(BodyDesc {
        kind: BodyKind::Static,
        position: Vec3::new(
            0.5 * (b.min_x + b.max_x),
            config.ground_height - 0.5 * GROUND_THICKNESS,
            0.5 * (b.min_z + b.max_z),
        ),
        mass: 0.0,
        shape: Shape::Cuboid {
            half_extents: Vec3::new(
                0.5 * (b.max_x - b.min_x),
                0.5 * GROUND_THICKNESS,
                0.5 * (b.max_z - b.min_z),
            ),
        },
        tag: BodyTag::Ground,
    });

    for (i, zone) in config.zones.iter().enumerate() {
        let height = zone.floor_height - config.ground_height;
        if height > 0.0 {
            physics.create_body(BodyDesc {
                kind: BodyKind::Static,
                position: Vec3::new(
                    0.0,
                    config.ground_height + 0.5 * height,
                    0.5 * (zone.depth_min + zone.depth_max),
                ),
                mass: 0.0,
                shape: Shape::Cuboid {
                    half_extents: Vec3::new(
                        zone.half_width,
                        0.5 * height,
                        0.5 * (zone.depth_max - zone.depth_min),
                    ),
                },
                tag: BodyTag::Platform(i),
            });
        }
        physics.create_body(BodyDesc {
            kind: BodyKind::Static,
            position: Vec3::new(0.0, zone.floor_height - LEDGE_LIP, zone.depth_min - LEDGE_LIP),
            mass: 0.0,
            shape: Shape::Cuboid {
                half_extents: Vec3::new(zone.half_width, LEDGE_LIP, LEDGE_LIP),
            },
            tag: BodyTag::Ledge(i),
        });
    }

    physics.create_body(BodyDesc {
        kind: BodyKind::Dynamic,
        position: config.start_position,
        mass: config.agent_mass,
        shape: Shape::Cuboid {
            half_extents: Vec3::repeat(config.agent_half_extent),
        },
        tag: BodyTag::Agent,
    })
}

#[async_trait]
impl<P: PhysicsBackend> Environment for ClimbingEnvironment<P> {
    fn state_dim(&self) -> usize {
        STATE_DIM
    }

    fn max_steps(&self) -> usize {
        self.config.max_steps
    }

    async fn reset(&mut self) -> Result<StateVector> {
        self.physics
            .set_position(self.agent, self.config.start_position)?;
        self.physics.set_velocity(self.agent, Vec3::zeros())?;
        self.physics.refresh_contacts();
        self.progress.reset();
        self.current_zone = None;
        self.phase = Phase::Active;

        let kin = self.kinematics()?;
        self.state = self.observe(&kin);
        self.update_renderer(kin.position);
        Ok(self.state.clone())
    }

    async fn step(&mut self, action: ClimbAction) -> Result<Step> {
        if self.phase == Phase::Terminal {
            return Err(RLError::InvalidInput(
                "step called on a terminated episode; call reset first".to_string(),
            ));
        }

        let action_applied = self.apply_action(action)?;
        self.physics.step(self.config.dt).await?;
        self.progress.jump_cooldown = self.progress.jump_cooldown.saturating_sub(1);

        let kin = self.kinematics()?;
        let outcome = self.calculate_reward(&kin.position, &kin.velocity);
        self.current_zone = self.zones.classify(&kin.position);
        self.progress.step += 1;
        self.progress.cumulative_reward += outcome.reward;

        let termination = self.is_terminal(&kin.position, self.current_zone);
        let done = termination.is_some();
        if let Some(reason) = termination {
            self.phase = Phase::Terminal;
            debug!(
                step = self.progress.step,
                reason = ?reason,
                total_reward = self.progress.cumulative_reward,
                highest_zone = ?self.progress.highest_zone,
                "episode terminated"
            );
        }

        self.state = self.observe(&kin);
        self.update_renderer(kin.position);

        Ok(Step {
            state: self.state.clone(),
            reward: outcome.reward,
            done,
            info: StepInfo {
                step: self.progress.step,
                termination,
                zone: self.current_zone,
                highest_zone: self.progress.highest_zone,
                action_applied,
                reward_component: outcome.component.to_string(),
            },
        })
    }

    fn state(&self) -> StateVector {
        self.state.clone()
    }
}
