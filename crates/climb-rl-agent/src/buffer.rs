//! Experience replay buffer for the value agent

use rand::Rng;
use std::collections::VecDeque;

use climb_rl_core::{RLError, Result, Transition};

/// Bounded replay buffer; the oldest transition is evicted first once full
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    /// Buffer storage, oldest at the front
    buffer: VecDeque<Transition>,
    /// Maximum capacity
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a new replay buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest when at capacity
    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample `batch_size` distinct transitions uniformly
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<&Transition>> {
        if batch_size == 0 {
            return Err(RLError::InvalidInput("batch size must be positive".to_string()));
        }
        if self.buffer.len() < batch_size {
            return Err(RLError::InsufficientData {
                required: batch_size,
                available: self.buffer.len(),
            });
        }

        let indices = rand::seq::index::sample(rng, self.buffer.len(), batch_size);
        Ok(indices.into_iter().map(|i| &self.buffer[i]).collect())
    }

    /// Transitions from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of transitions held
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climb_rl_core::{ClimbAction, StateVector};
    use rand::rngs::StdRng;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn transition(reward: f32) -> Transition {
        Transition::new(
            StateVector::zeros(2),
            ClimbAction::Forward,
            reward,
            StateVector::zeros(2),
            false,
        )
    }

    #[test]
    fn test_retains_most_recent_in_order() {
        let mut buffer = ReplayBuffer::new(5);
        for i in 0..8 {
            buffer.push(transition(i as f32));
        }
        assert_eq!(buffer.len(), 5);
        let rewards: Vec<f32> = buffer.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_sample_is_without_replacement() {
        let mut buffer = ReplayBuffer::new(10);
        for i in 0..10 {
            buffer.push(transition(i as f32));
        }
        let mut rng = StdRng::seed_from_u64(3);
        let batch = buffer.sample(10, &mut rng).unwrap();
        let distinct: HashSet<u32> = batch.iter().map(|t| t.reward as u32).collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn test_sample_errors() {
        let mut buffer = ReplayBuffer::new(4);
        buffer.push(transition(0.0));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            buffer.sample(2, &mut rng),
            Err(RLError::InsufficientData {
                required: 2,
                available: 1
            })
        ));
        assert!(matches!(
            buffer.sample(0, &mut rng),
            Err(RLError::InvalidInput(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_keeps_the_newest_capacity_items(capacity in 1usize..32, extra in 0usize..64) {
            let mut buffer = ReplayBuffer::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                buffer.push(transition(i as f32));
            }
            prop_assert_eq!(buffer.len(), capacity);
            let rewards: Vec<f32> = buffer.iter().map(|t| t.reward).collect();
            let expected: Vec<f32> = (extra..total).map(|i| i as f32).collect();
            prop_assert_eq!(rewards, expected);
        }
    }
}
