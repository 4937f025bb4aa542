//! Observer registries for training events

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

use climb_rl_core::Episode;

use crate::stats::TrainingStats;

/// Payload delivered after each episode
#[derive(Debug, Clone)]
pub struct EpisodeEvent {
    /// The finished episode
    pub episode: Episode,
    /// Statistics including this episode
    pub stats: TrainingStats,
}

type Callback<T> = Box<dyn FnMut(&T) -> anyhow::Result<()> + Send>;

/// Ordered list of observers for one event type
///
/// A failing or panicking observer is logged and skipped; the others still run.
pub struct CallbackRegistry<T> {
    name: &'static str,
    callbacks: Vec<Callback<T>>,
    failures: u64,
}

impl<T> CallbackRegistry<T> {
    /// Create an empty registry; `name` labels log lines
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: Vec::new(),
            failures: 0,
        }
    }

    /// Add an observer
    pub fn register<F>(&mut self, callback: F)
    where
        F: FnMut(&T) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Number of observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no observer is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Observer invocations that failed or panicked
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Deliver `event` to every observer in registration order
    pub fn invoke(&mut self, event: &T) {
        for (index, callback) in self.callbacks.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures += 1;
                    warn!(registry = self.name, index, error = %e, "callback failed");
                }
                Err(payload) => {
                    self.failures += 1;
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(registry = self.name, index, panic = %message, "callback panicked");
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("name", &self.name)
            .field("callbacks", &self.callbacks.len())
            .field("failures", &self.failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_failures_do_not_stop_later_callbacks() {
        let mut registry = CallbackRegistry::<u32>::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        registry.register(|_| Err(anyhow::anyhow!("boom")));
        registry.register(|_| panic!("observer panicked"));
        let counter = seen.clone();
        registry.register(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
            Ok(())
        });

        registry.invoke(&2);
        registry.invoke(&3);

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(registry.failures(), 4);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_empty_registry() {
        let mut registry = CallbackRegistry::<()>::new("empty");
        assert!(registry.is_empty());
        registry.invoke(&());
        assert_eq!(registry.failures(), 0);
    }
}
