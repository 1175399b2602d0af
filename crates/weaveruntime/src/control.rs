use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use weavecore::FlowError;

/// Pause, resume, step, and stop controls for every run started with this
/// handle. The engine owns one shared handle; a host that wants to steer a
/// single run passes its own to [`Engine::run_with_control`](crate::Engine::run_with_control).
///
/// All gates sit at node-start boundaries: a node that is already executing
/// runs to completion even while paused.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    paused: watch::Sender<bool>,
    step: Notify,
    /// Parent of every live run's abort token. Replaced on stop so later
    /// runs start clean.
    runs: watch::Sender<CancellationToken>,
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (runs, _) = watch::channel(CancellationToken::new());
        Self {
            inner: Arc::new(ControlInner {
                paused,
                step: Notify::new(),
                runs,
            }),
        }
    }

    pub fn pause(&self) {
        tracing::info!("Run paused");
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        tracing::info!("Run resumed");
        self.inner.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Release one node in debug mode. A step issued before the engine
    /// reaches the gate is kept for the next node.
    pub fn step(&self) {
        self.inner.step.notify_one();
    }

    /// Cancel every run in flight on this handle. Pending pause and step
    /// waits unwind at once; runs started afterwards are unaffected.
    pub fn stop(&self) {
        tracing::info!("Run stop requested");
        self.inner.runs.send_replace(CancellationToken::new()).cancel();
        self.inner.step.notify_waiters();
    }

    /// Abort token for a new run.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        self.inner.runs.borrow().child_token()
    }

    /// Blocks while paused. Cancellation wins over a pending resume.
    pub(crate) async fn wait_until_resumed(&self, abort: &CancellationToken) -> Result<(), FlowError> {
        let mut paused = self.inner.paused.subscribe();
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(FlowError::Cancelled),
            res = paused.wait_for(|p| !*p) => {
                // the sender lives in `self`, so the channel cannot close here
                let _ = res;
                Ok(())
            }
        }
    }

    pub(crate) async fn wait_for_step(&self, abort: &CancellationToken) -> Result<(), FlowError> {
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(FlowError::Cancelled),
            _ = self.inner.step.notified() => Ok(()),
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
