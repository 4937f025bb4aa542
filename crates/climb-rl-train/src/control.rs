//! Cooperative run/pause/stop control shared between tasks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not started
    Idle,
    /// Episodes are being played
    Running,
    /// Waiting at the next check point until resumed
    Paused,
    /// Stopped by request
    Stopped,
    /// All requested episodes finished
    Completed,
}

impl RunState {
    /// Whether the run can no longer make progress
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Clonable handle over the run state
///
/// Flags are only observed at episode boundaries and, in interactive mode,
/// between environment steps.
#[derive(Debug, Clone)]
pub struct TrainingControl {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for TrainingControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingControl {
    /// Create a control in the `Idle` state
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Request a pause; returns false unless the run was running
    pub fn pause(&self) -> bool {
        self.transition(RunState::Running, RunState::Paused)
    }

    /// Resume a paused run; returns false unless the run was paused
    pub fn resume(&self) -> bool {
        self.transition(RunState::Paused, RunState::Running)
    }

    /// Request a stop; returns false unless a run is active
    ///
    /// Refused while idle or finished, so a stale request can never cancel
    /// a run that has not started yet.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(*state, RunState::Running | RunState::Paused) {
                *state = RunState::Stopped;
                true
            } else {
                false
            }
        })
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    pub(crate) fn set(&self, state: RunState) {
        self.tx.send_replace(state);
    }

    /// Mark the run completed unless a stop won the race; returns the final state
    pub(crate) fn finish(&self) -> RunState {
        self.tx.send_if_modified(|state| {
            if *state == RunState::Stopped {
                false
            } else {
                *state = RunState::Completed;
                true
            }
        });
        self.state()
    }

    /// Wait until the run is not paused and return the state found
    pub async fn wait_while_paused(&self) -> RunState {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != RunState::Paused {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transitions() {
        let control = TrainingControl::new();
        assert_eq!(control.state(), RunState::Idle);
        assert!(!control.pause());
        assert!(!control.stop());
        assert_eq!(control.state(), RunState::Idle);

        control.set(RunState::Running);
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.resume());
        assert!(control.stop());
        assert!(control.is_stopped());
        assert!(!control.stop());
        assert!(!control.resume());
        assert_eq!(control.finish(), RunState::Stopped);

        control.set(RunState::Paused);
        assert_eq!(control.finish(), RunState::Completed);
        assert!(!control.stop());
        assert_eq!(control.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_wait_while_paused_returns_on_resume() {
        let control = TrainingControl::new();
        control.set(RunState::Running);
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, RunState::Running);
    }

    #[tokio::test]
    async fn test_stop_releases_a_paused_waiter() {
        let control = TrainingControl::new();
        control.set(RunState::Running);
        control.pause();
        let other = control.clone();
        let waiter = tokio::spawn(async move { other.wait_while_paused().await });
        control.stop();
        assert_eq!(waiter.await.unwrap(), RunState::Stopped);
    }
}
