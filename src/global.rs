//! Global throttle gate.
//!
//! One gate is owned by whatever composes the executors; every request waits on it immediately
//! before transmitting. A global 429 closes it for the advertised delay. Executors only share a
//! gate when they are handed the same `Arc<GlobalThrottle>`.

use crate::{Sleeper, TokioSleeper};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug)]
pub struct GlobalThrottle {
    open: watch::Sender<bool>,
    generation: AtomicU64,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for GlobalThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalThrottle {
    /// A gate that starts open.
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(TokioSleeper))
    }

    /// A gate whose scheduled reopen waits through `sleeper`.
    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        let (open, _) = watch::channel(true);
        Self { open, generation: AtomicU64::new(0), sleeper }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Suspend until the gate is open. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        // the sender lives in `self`, so this can only fail if `self` is gone
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Close the gate and schedule it to reopen after `duration`.
    ///
    /// A later trip supersedes the schedule of an earlier one. Returns the trip's generation for
    /// [`reopen_if`](Self::reopen_if). Requires a tokio runtime.
    pub fn trip(self: &Arc<Self>, duration: Duration) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.open.send_replace(false);
        debug!(
            target: "bucketwise::global",
            wait_ms = duration.as_millis() as u64,
            "global throttle closed"
        );

        let gate = Arc::downgrade(self);
        let pause = self.sleeper.sleep(duration);
        tokio::spawn(async move {
            pause.await;
            if let Some(gate) = gate.upgrade() {
                gate.reopen_if(generation);
            }
        });
        generation
    }

    /// Reopen only if no trip has happened since the one that returned `generation`.
    pub fn reopen_if(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "bucketwise::global", generation, "superseded trip left the gate closed");
            return false;
        }
        self.reopen();
        true
    }

    /// Open the gate now. Idempotent.
    pub fn reopen(&self) {
        let was_open = self.open.send_replace(true);
        if !was_open {
            debug!(target: "bucketwise::global", "global throttle reopened");
        }
    }
}
