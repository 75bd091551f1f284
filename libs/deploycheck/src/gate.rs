//! One-shot readiness gate between the runtime's event delivery and the
//! task running the deployment scenario.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

/// The gate was not signaled within the allowed time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("deployment signal did not arrive within {} seconds", waited.as_secs_f64())]
pub struct DeploymentTimeoutError {
    pub waited: Duration,
}

/// Single-use latch: starts closed, opens once on [`signal`](Self::signal), never closes again.
///
/// Supports exactly one producer (the event handler) and one consumer (the
/// scenario). The flag is sticky, so a signal sent before anyone waits is not lost.
#[derive(Debug)]
pub struct DeploymentGate {
    ready: watch::Sender<bool>,
}

impl Default for DeploymentGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self { ready }
    }

    /// Open the gate. Safe to call from any thread, with or without a Tokio runtime.
    ///
    /// Returns `true` for the call that opened it, `false` if it was already open.
    pub fn signal(&self) -> bool {
        let was_ready = self.ready.send_replace(true);
        if !was_ready {
            tracing::debug!("deployment gate opened");
        }
        !was_ready
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the gate is open or `max_wait` elapses.
    pub async fn await_ready(&self, max_wait: Duration) -> Result<(), DeploymentTimeoutError> {
        let mut rx = self.ready.subscribe();
        let opened = matches!(
            tokio::time::timeout(max_wait, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        // The sender lives in `self`, so the channel cannot close while we wait.
        if opened {
            Ok(())
        } else {
            Err(DeploymentTimeoutError { waited: max_wait })
        }
    }
}
