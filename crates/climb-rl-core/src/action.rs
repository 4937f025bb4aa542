//! Actions available to the climbing agent and the discrete action space

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::RLError;

/// Discrete action taken by the climber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClimbAction {
    /// Sustained push towards +z (up the course)
    Forward,
    /// Sustained push towards -z
    Backward,
    /// Sustained push towards -x
    Left,
    /// Sustained push towards +x
    Right,
    /// Vertical impulse, gated by cooldown and ground contact
    Jump,
    /// Climb assist, gated by ledge contact
    Grab,
}

impl ClimbAction {
    /// Number of discrete actions
    pub const COUNT: usize = 6;

    /// All actions in index order
    pub const ALL: [ClimbAction; Self::COUNT] = [
        Self::Forward,
        Self::Backward,
        Self::Left,
        Self::Right,
        Self::Jump,
        Self::Grab,
    ];

    /// Index of this action in `ALL`
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Backward => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Jump => 4,
            Self::Grab => 5,
        }
    }

    /// Whether this action maps to a sustained directional force
    #[must_use]
    pub fn is_directional(self) -> bool {
        matches!(self, Self::Forward | Self::Backward | Self::Left | Self::Right)
    }
}

impl TryFrom<usize> for ClimbAction {
    type Error = RLError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            RLError::InvalidInput(format!(
                "action index {index} out of range 0..{}",
                Self::COUNT
            ))
        })
    }
}

impl From<ClimbAction> for usize {
    fn from(action: ClimbAction) -> Self {
        action.index()
    }
}

impl fmt::Display for ClimbAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Jump => "jump",
            Self::Grab => "grab",
        };
        f.write_str(name)
    }
}

/// Discrete action space
#[derive(Debug, Clone, Copy)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete action space
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    /// The climbing action space
    #[must_use]
    pub fn climb() -> Self {
        Self::new(ClimbAction::COUNT)
    }

    /// Sample a uniformly random index from the space
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.n)
    }

    /// Check if an index is valid within this space
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.n
    }
}
