//! Adam optimizer and gradient clipping over flat parameter vectors

use serde::{Deserialize, Serialize};

use climb_rl_core::{RLError, Result};

/// Adam optimizer state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl Adam {
    /// Create an optimizer for `n_params` parameters with default betas
    #[must_use]
    pub fn new(n_params: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            t: 0,
        }
    }

    /// Learning rate
    #[must_use]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Number of steps taken since the last reset
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Clear the moment estimates
    pub fn reset(&mut self) {
        self.m.iter_mut().for_each(|m| *m = 0.0);
        self.v.iter_mut().for_each(|v| *v = 0.0);
        self.t = 0;
    }

    /// Apply one descent step to `params` in place
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        if params.len() != self.m.len() || grads.len() != self.m.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.m.len(),
                actual: if params.len() == self.m.len() {
                    grads.len()
                } else {
                    params.len()
                },
            });
        }

        self.t = self.t.saturating_add(1);
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
        Ok(())
    }
}

/// Scale `grads` so their L2 norm is at most `max_norm`; returns the norm before clipping
pub fn clip_grad_norm(grads: &mut [f32], max_norm: f32) -> f32 {
    let norm = grads.iter().map(|g| g * g).sum::<f32>().sqrt();
    if norm.is_finite() && max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / norm;
        grads.iter_mut().for_each(|g| *g *= scale);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut adam = Adam::new(2, 0.1);
        let mut params = vec![1.0, -1.0];
        adam.step(&mut params, &[2.0, -3.0]).unwrap();
        // First bias-corrected step has magnitude lr
        assert_relative_eq!(params[0], 0.9, epsilon = 1e-5);
        assert_relative_eq!(params[1], -0.9, epsilon = 1e-5);
        assert_eq!(adam.steps(), 1);

        adam.reset();
        assert_eq!(adam.steps(), 0);
        assert!(adam.step(&mut params, &[1.0]).is_err());
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut grads = vec![3.0, 4.0];
        let norm = clip_grad_norm(&mut grads, 1.0);
        assert_relative_eq!(norm, 5.0);
        assert_relative_eq!(grads[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(grads[1], 0.8, epsilon = 1e-6);

        let mut small = vec![0.3, 0.4];
        clip_grad_norm(&mut small, 1.0);
        assert_relative_eq!(small[0], 0.3);
    }
}
