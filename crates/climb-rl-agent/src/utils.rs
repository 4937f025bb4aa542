//! Numeric helpers shared by the agents

use ndarray::ArrayView1;

/// Lower bound applied to probabilities before taking logs
pub const PROB_FLOOR: f32 = 1e-8;

/// Guard added to the standard deviation during standardisation
pub const STD_EPSILON: f32 = 1e-8;

/// Index of the largest value; ties resolve to the lowest index
#[must_use]
pub fn argmax(values: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Numerically stable softmax
#[must_use]
pub fn softmax(logits: ArrayView1<'_, f32>) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Log of a probability clamped to [`PROB_FLOOR`]
#[must_use]
pub fn floored_ln(p: f32) -> f32 {
    p.max(PROB_FLOOR).ln()
}

/// Entropy of a categorical distribution
#[must_use]
pub fn entropy(probs: &[f32]) -> f32 {
    -probs.iter().map(|&p| p * floored_ln(p)).sum::<f32>()
}

/// Compute GAE (Generalized Advantage Estimation)
///
/// Runs backwards with `delta_t = r_t + gamma * V(s_{t+1}) * (1 - done_t) - V(s_t)`
/// and `A_t = delta_t + gamma * lambda * A_{t+1} * (1 - done_t)`; the value past
/// the last step is taken as zero. Callers guarantee equal lengths.
#[must_use]
pub fn gae_advantages(rewards: &[f32], values: &[f32], dones: &[bool], gamma: f32, lambda: f32) -> Vec<f32> {
    let n = rewards.len();
    let mut advantages = vec![0.0; n];
    let mut running = 0.0;

    for i in (0..n).rev() {
        let next_non_terminal = if dones[i] { 0.0 } else { 1.0 };
        let next_value = values.get(i + 1).copied().unwrap_or(0.0);
        let delta = rewards[i] + gamma * next_value * next_non_terminal - values[i];
        running = delta + gamma * lambda * running * next_non_terminal;
        advantages[i] = running;
    }

    advantages
}

/// Shift to zero mean and scale to unit variance
///
/// A constant input standardises to zeros.
#[must_use]
pub fn standardize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt() + STD_EPSILON;
    values.iter().map(|v| (v - mean) / std).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_gae_closed_form() {
        let advantages = gae_advantages(
            &[1.0, 0.0, -1.0],
            &[0.5, 0.5, 0.5],
            &[false, false, true],
            1.0,
            1.0,
        );
        // delta = [1.0, 0.0, -1.5]
        assert_eq!(advantages.len(), 3);
        assert_relative_eq!(advantages[2], -1.5);
        assert_relative_eq!(advantages[1], -1.5);
        assert_relative_eq!(advantages[0], -0.5);
    }

    #[test]
    fn test_gae_resets_at_episode_boundaries() {
        let advantages = gae_advantages(&[1.0, 1.0], &[0.0, 0.0], &[true, true], 0.9, 0.95);
        assert_relative_eq!(advantages[0], 1.0);
        assert_relative_eq!(advantages[1], 1.0);
    }

    #[test]
    fn test_standardize() {
        let z = standardize(&[-0.5, -1.5, -1.5]);
        let mean = z.iter().sum::<f32>() / 3.0;
        let var = z.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 3.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-6);
        assert_relative_eq!(var, 1.0, epsilon = 1e-4);

        assert_eq!(standardize(&[2.0, 2.0]), vec![0.0, 0.0]);
        assert!(standardize(&[]).is_empty());
    }

    #[test]
    fn test_softmax_and_argmax() {
        let logits = array![1.0, 3.0, 3.0, -2.0];
        let probs = softmax(logits.view());
        assert_relative_eq!(probs.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_eq!(argmax(logits.view()), 1);
        assert!(entropy(&probs) > 0.0);
        assert_relative_eq!(entropy(&[1.0, 0.0]), 0.0, epsilon = 1e-6);
    }
}
