//! Optional rendering collaborator

use tracing::trace;

use climb_rl_core::Result;

use crate::physics::Vec3;

/// Visualisation hooks driven once per environment step
pub trait RenderingBackend: Send {
    /// Move the agent's visual to `position`
    fn update_agent_pose(&mut self, position: Vec3);

    /// Point the camera at `target`
    fn update_camera(&mut self, target: Vec3);

    /// Draw a frame
    fn render(&mut self) -> Result<()>;
}

/// Renderer that emits frames as trace events
#[derive(Debug, Default)]
pub struct TraceRenderer {
    agent: Vec3,
    camera: Vec3,
    frames: u64,
}

impl TraceRenderer {
    /// Create a renderer with no frames drawn
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames drawn so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl RenderingBackend for TraceRenderer {
    fn update_agent_pose(&mut self, position: Vec3) {
        self.agent = position;
    }

    fn update_camera(&mut self, target: Vec3) {
        self.camera = target;
    }

    fn render(&mut self) -> Result<()> {
        self.frames += 1;
        trace!(
            frame = self.frames,
            agent = ?(self.agent.x, self.agent.y, self.agent.z),
            camera = ?(self.camera.x, self.camera.y, self.camera.z),
            "frame"
        );
        Ok(())
    }
}
