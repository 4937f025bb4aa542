//! Normalised state vectors observed by the agents

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Dimension of the climbing state vector
pub const STATE_DIM: usize = 14;

/// Offsets of the named components inside a [`StateVector`]
pub mod layout {
    /// Normalised position (x, y, z)
    pub const POSITION: usize = 0;
    /// Normalised velocity (x, y, z)
    pub const VELOCITY: usize = 3;
    /// Normalised distance to the goal
    pub const GOAL_DISTANCE: usize = 6;
    /// Per-axis sign of the direction to the goal
    pub const GOAL_DIRECTION: usize = 7;
    /// Zone indicator, 0 when off-track
    pub const ZONE: usize = 10;
    /// Normalised distance to the next zone
    pub const NEXT_ZONE_DISTANCE: usize = 11;
    /// 1 when inside a zone
    pub const IN_ZONE: usize = 12;
    /// Fraction of the step budget consumed
    pub const EPISODE_PROGRESS: usize = 13;
}

/// Documented bounds of a state component
#[must_use]
pub fn component_bounds(index: usize) -> (f32, f32) {
    match index {
        layout::GOAL_DISTANCE
        | layout::ZONE
        | layout::NEXT_ZONE_DISTANCE
        | layout::IN_ZONE
        | layout::EPISODE_PROGRESS => (0.0, 1.0),
        _ => (-1.0, 1.0),
    }
}

/// Fixed-dimension normalised state vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector(pub Vec<f32>);

impl StateVector {
    /// Create a state vector from raw components
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self(data)
    }

    /// All-zero state of the given dimension
    #[must_use]
    pub fn zeros(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    /// Number of components
    #[must_use]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Borrow the components
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Component at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// View as an ndarray row
    #[must_use]
    pub fn view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(&self.0[..])
    }

    /// Copy into an owned ndarray
    #[must_use]
    pub fn to_array(&self) -> Array1<f32> {
        Array1::from_vec(self.0.clone())
    }

    /// Reject wrong dimensions, non-finite values and components outside their bounds
    pub fn validate(&self, expected_dim: usize) -> Result<()> {
        if self.dim() != expected_dim {
            return Err(RLError::DimensionMismatch {
                expected: expected_dim,
                actual: self.dim(),
            });
        }
        for (i, &value) in self.0.iter().enumerate() {
            if !value.is_finite() {
                return Err(RLError::InvalidInput(format!(
                    "state component {i} is not finite ({value})"
                )));
            }
            // Only the climbing layout has documented bounds
            if expected_dim == STATE_DIM {
                let (low, high) = component_bounds(i);
                if value < low || value > high {
                    return Err(RLError::InvalidInput(format!(
                        "state component {i} = {value} outside [{low}, {high}]"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<f32>> for StateVector {
    fn from(data: Vec<f32>) -> Self {
        Self(data)
    }
}

impl AsRef<[f32]> for StateVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
