//! Minimal axis-aligned rigid-body world for headless runs and tests
//!
//! Every shape is treated as its axis-aligned bounding box. Dynamic bodies are
//! integrated with semi-implicit Euler and pushed out of static bodies along the
//! axis of least penetration. This is enough to stand, walk, jump and fall on a
//! staircase course; it is not a general solver.

use async_trait::async_trait;
use std::collections::HashMap;

use climb_rl_core::{RLError, Result};

use crate::physics::{BodyDesc, BodyHandle, BodyKind, BodyTag, PhysicsBackend, Vec3};

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    tag: BodyTag,
    mass: f32,
    position: Vec3,
    velocity: Vec3,
    half_extents: Vec3,
    force: Vec3,
}

/// Axis-aligned kinematic world
#[derive(Debug, Clone)]
pub struct KinematicWorld {
    bodies: Vec<Body>,
    contacts: HashMap<BodyHandle, Vec<BodyHandle>>,
    gravity: Vec3,
    /// Horizontal velocity damping per second
    linear_damping: f32,
    /// Separation below which two boxes count as touching
    contact_epsilon: f32,
}

impl Default for KinematicWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl KinematicWorld {
    /// Create an empty world with standard gravity
    #[must_use]
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            contacts: HashMap::new(),
            gravity: Vec3::new(0.0, -9.81, 0.0),
            linear_damping: 2.0,
            contact_epsilon: 0.02,
        }
    }

    /// Override gravity
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Override horizontal damping
    #[must_use]
    pub fn with_linear_damping(mut self, damping: f32) -> Self {
        self.linear_damping = damping.max(0.0);
        self
    }

    /// Number of bodies in the world
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn body(&self, handle: BodyHandle) -> Result<&Body> {
        self.bodies
            .get(handle.0 as usize)
            .ok_or_else(|| RLError::Environment(format!("unknown body handle {}", handle.0)))
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut Body> {
        self.bodies
            .get_mut(handle.0 as usize)
            .ok_or_else(|| RLError::Environment(format!("unknown body handle {}", handle.0)))
    }

    fn integrate(&mut self, dt: f32) {
        let damping = (1.0 - self.linear_damping * dt).max(0.0);
        for body in self.bodies.iter_mut().filter(|b| b.kind == BodyKind::Dynamic) {
            let acceleration = self.gravity + body.force / body.mass;
            body.velocity += acceleration * dt;
            body.velocity.x *= damping;
            body.velocity.z *= damping;
            body.position += body.velocity * dt;
            body.force = Vec3::zeros();
        }
    }

    fn resolve_penetrations(&mut self) {
        let statics: Vec<(Vec3, Vec3)> = self
            .bodies
            .iter()
            .filter(|b| b.kind == BodyKind::Static)
            .map(|b| (b.position, b.half_extents))
            .collect();

        for body in self.bodies.iter_mut().filter(|b| b.kind == BodyKind::Dynamic) {
            for (static_pos, static_half) in &statics {
                let delta = body.position - static_pos;
                let overlap = body.half_extents + static_half - delta.abs();
                if overlap.iter().any(|&o| o <= 0.0) {
                    continue;
                }
                let axis = overlap.imin();
                let direction = if delta[axis] >= 0.0 { 1.0 } else { -1.0 };
                body.position[axis] += overlap[axis] * direction;
                if body.velocity[axis] * direction < 0.0 {
                    body.velocity[axis] = 0.0;
                }
            }
        }
    }

    fn rebuild_contacts(&mut self) {
        self.contacts.clear();
        for (i, a) in self.bodies.iter().enumerate() {
            if a.kind != BodyKind::Dynamic {
                continue;
            }
            for (j, b) in self.bodies.iter().enumerate() {
                if i == j {
                    continue;
                }
                let gap = (a.position - b.position).abs() - (a.half_extents + b.half_extents);
                if gap.iter().all(|&g| g <= self.contact_epsilon) {
                    let (ha, hb) = (BodyHandle(i as u32), BodyHandle(j as u32));
                    self.contacts.entry(ha).or_default().push(hb);
                    if b.kind == BodyKind::Static {
                        self.contacts.entry(hb).or_default().push(ha);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PhysicsBackend for KinematicWorld {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(Body {
            kind: desc.kind,
            tag: desc.tag,
            mass: if desc.mass > 0.0 { desc.mass } else { 1.0 },
            position: desc.position,
            velocity: Vec3::zeros(),
            half_extents: desc.shape.half_extents(),
            force: Vec3::zeros(),
        });
        handle
    }

    fn position(&self, handle: BodyHandle) -> Result<Vec3> {
        Ok(self.body(handle)?.position)
    }

    fn velocity(&self, handle: BodyHandle) -> Result<Vec3> {
        Ok(self.body(handle)?.velocity)
    }

    fn set_position(&mut self, handle: BodyHandle, position: Vec3) -> Result<()> {
        self.body_mut(handle)?.position = position;
        Ok(())
    }

    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> Result<()> {
        self.body_mut(handle)?.velocity = velocity;
        Ok(())
    }

    fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.kind == BodyKind::Dynamic {
            body.force += force;
        }
        Ok(())
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> Result<()> {
        let body = self.body_mut(handle)?;
        if body.kind == BodyKind::Dynamic {
            body.velocity += impulse / body.mass;
        }
        Ok(())
    }

    async fn step(&mut self, dt: f32) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(RLError::InvalidInput(format!("invalid physics step {dt}")));
        }
        self.integrate(dt);
        self.resolve_penetrations();
        self.rebuild_contacts();
        Ok(())
    }

    fn refresh_contacts(&mut self) {
        self.rebuild_contacts();
    }

    fn colliding_bodies(&self, handle: BodyHandle) -> Result<Vec<BodyHandle>> {
        self.body(handle)?;
        Ok(self.contacts.get(&handle).cloned().unwrap_or_default())
    }

    fn body_tag(&self, handle: BodyHandle) -> Option<BodyTag> {
        self.bodies.get(handle.0 as usize).map(|b| b.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Shape;
    use approx::assert_relative_eq;

    fn world_with_floor() -> (KinematicWorld, BodyHandle, BodyHandle) {
        let mut world = KinematicWorld::new();
        let floor = world.create_body(BodyDesc {
            kind: BodyKind::Static,
            position: Vec3::new(0.0, -0.5, 0.0),
            mass: 0.0,
            shape: Shape::Cuboid {
                half_extents: Vec3::new(10.0, 0.5, 10.0),
            },
            tag: BodyTag::Ground,
        });
        let cube = world.create_body(BodyDesc {
            kind: BodyKind::Dynamic,
            position: Vec3::new(0.0, 2.0, 0.0),
            mass: 1.0,
            shape: Shape::Cuboid {
                half_extents: Vec3::repeat(0.5),
            },
            tag: BodyTag::Agent,
        });
        (world, floor, cube)
    }

    #[tokio::test]
    async fn test_refresh_drops_contacts_after_teleport() {
        let (mut world, floor, cube) = world_with_floor();
        for _ in 0..240 {
            world.step(1.0 / 60.0).await.unwrap();
        }
        assert!(world.colliding_bodies(cube).unwrap().contains(&floor));

        world.set_position(cube, Vec3::new(0.0, 5.0, 0.0)).unwrap();
        world.refresh_contacts();
        assert!(world.colliding_bodies(cube).unwrap().is_empty());
        assert!(!world.colliding_bodies(floor).unwrap().contains(&cube));
    }

    #[tokio::test]
    async fn test_dynamic_body_comes_to_rest_on_floor() {
        let (mut world, floor, cube) = world_with_floor();
        for _ in 0..240 {
            world.step(1.0 / 60.0).await.unwrap();
        }
        let position = world.position(cube).unwrap();
        assert_relative_eq!(position.y, 0.5, epsilon = 0.05);
        assert!(world.velocity(cube).unwrap().y.abs() < 0.5);
        assert!(world.colliding_bodies(cube).unwrap().contains(&floor));
        assert!(world.colliding_bodies(floor).unwrap().contains(&cube));
    }

    #[tokio::test]
    async fn test_impulse_changes_velocity_by_inverse_mass() {
        let (mut world, floor, cube) = world_with_floor();
        world.apply_impulse(cube, Vec3::new(0.0, 3.0, 0.0)).unwrap();
        assert_relative_eq!(world.velocity(cube).unwrap().y, 3.0);

        // Static bodies ignore forces and impulses
        world.apply_impulse(floor, Vec3::new(0.0, 3.0, 0.0)).unwrap();
        assert_relative_eq!(world.velocity(floor).unwrap().y, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_handle_and_bad_dt_are_errors() {
        let (mut world, _, _) = world_with_floor();
        assert!(matches!(
            world.position(BodyHandle(99)),
            Err(RLError::Environment(_))
        ));
        assert!(world.body_tag(BodyHandle(99)).is_none());
        assert!(world.step(0.0).await.is_err());
    }
}
