//! Interface to the rigid-body physics collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use climb_rl_core::Result;

/// 3D vector used throughout the physics interface
pub type Vec3 = nalgebra::Vector3<f32>;

/// Opaque handle to a body owned by the physics backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// How a body participates in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Integrated under gravity and forces
    Dynamic,
    /// Never moves
    Static,
}

/// Collision shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Axis-aligned box
    Cuboid {
        /// Half extents along x, y, z
        half_extents: Vec3,
    },
    /// Sphere
    Sphere {
        /// Radius
        radius: f32,
    },
}

impl Shape {
    /// Half extents of the shape's axis-aligned bounding box
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        match *self {
            Self::Cuboid { half_extents } => half_extents,
            Self::Sphere { radius } => Vec3::repeat(radius),
        }
    }
}

/// Application-chosen tag used for zone, ledge and ground classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyTag {
    /// The climber
    Agent,
    /// The floor of the course
    Ground,
    /// Standing surface of a zone
    Platform(usize),
    /// Grabbable edge in front of a zone
    Ledge(usize),
    /// Any other obstacle
    Wall,
}

impl BodyTag {
    /// Whether the agent can stand on bodies with this tag
    #[must_use]
    pub fn is_support(self) -> bool {
        matches!(self, Self::Ground | Self::Platform(_))
    }
}

/// Everything needed to create a body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyDesc {
    /// Dynamic or static
    pub kind: BodyKind,
    /// Initial centre position
    pub position: Vec3,
    /// Mass in kilograms (ignored for static bodies)
    pub mass: f32,
    /// Collision shape
    pub shape: Shape,
    /// Classification tag
    pub tag: BodyTag,
}

/// Rigid-body world consumed by the environment
#[async_trait]
pub trait PhysicsBackend: Send {
    /// Create a body and return its handle
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle;

    /// Current centre position
    fn position(&self, handle: BodyHandle) -> Result<Vec3>;

    /// Current linear velocity
    fn velocity(&self, handle: BodyHandle) -> Result<Vec3>;

    /// Teleport a body
    fn set_position(&mut self, handle: BodyHandle, position: Vec3) -> Result<()>;

    /// Overwrite a body's velocity
    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> Result<()>;

    /// Accumulate a force applied during the next step
    fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<()>;

    /// Apply an instantaneous change of momentum
    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> Result<()>;

    /// Advance the world by one fixed tick
    async fn step(&mut self, dt: f32) -> Result<()>;

    /// Recompute contacts for the current poses without advancing time
    ///
    /// Needed after teleporting a body, since contacts otherwise describe
    /// the poses of the last step.
    fn refresh_contacts(&mut self);

    /// Bodies in contact with `handle` after the last step or refresh
    fn colliding_bodies(&self, handle: BodyHandle) -> Result<Vec<BodyHandle>>;

    /// Tag assigned at creation
    fn body_tag(&self, handle: BodyHandle) -> Option<BodyTag>;
}
