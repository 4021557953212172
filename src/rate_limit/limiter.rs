//! Per-bucket limiter.
//!
//! A [`Limiter`] is both a FIFO mutex (one request in flight per bucket) and the bucket's
//! remaining/reset accounting. Holding a [`LimiterPermit`] grants the right to transmit; dropping
//! it hands the bucket to the next queued caller, in arrival order. When the last response said
//! the bucket is empty, [`LimiterPermit::throttle`] waits out the reset before transmitting, even
//! though no 429 has been seen.

use crate::rate_limit::headers::RateLimitHeaders;
use crate::Sleeper;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Accounting {
    limit: u32,
    remaining: u32,
    reset_after: Duration,
    expires: Option<Instant>,
}

impl Default for Accounting {
    fn default() -> Self {
        Self { limit: 1, remaining: 1, reset_after: Duration::ZERO, expires: None }
    }
}

/// Point-in-time view of a limiter's accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    pub expires: Option<Instant>,
}

/// Rate-limit state and serializing gate for one bucket key.
#[derive(Debug, Default)]
pub struct Limiter {
    gate: Arc<AsyncMutex<()>>,
    accounting: Mutex<Accounting>,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of the bucket. Waiters are served in arrival order.
    ///
    /// Cancelling the returned future before it resolves leaves the queue untouched.
    pub async fn acquire(self: &Arc<Self>) -> LimiterPermit {
        let guard = self.gate.clone().lock_owned().await;
        LimiterPermit { limiter: Arc::clone(self), _guard: guard }
    }

    /// Record the accounting carried by a non-429 response.
    pub fn update(&self, headers: &RateLimitHeaders, reset_in: Duration) {
        let mut accounting = self.accounting();
        accounting.limit = headers.limit.max(1);
        accounting.remaining = headers.remaining;
        accounting.reset_after = reset_in;
        accounting.expires = Some(Instant::now() + reset_in);
    }

    pub fn remaining(&self) -> u32 {
        self.accounting().remaining
    }

    /// True when the next acquire will have to wait for the reset.
    pub fn is_exhausted(&self) -> bool {
        let accounting = self.accounting();
        accounting.remaining == 0 && accounting.expires.is_some_and(|e| e > Instant::now())
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let accounting = self.accounting();
        LimiterSnapshot {
            limit: accounting.limit,
            remaining: accounting.remaining,
            reset_after: accounting.reset_after,
            expires: accounting.expires,
        }
    }

    /// How long the holder must wait before transmitting, refilling the bucket if the window
    /// has already passed.
    fn pending_wait(&self) -> Option<Duration> {
        let mut accounting = self.accounting();
        if accounting.remaining > 0 {
            return None;
        }
        let now = Instant::now();
        match accounting.expires {
            Some(expires) if expires > now => Some(expires - now),
            _ => {
                accounting.remaining = accounting.limit;
                None
            }
        }
    }

    fn refill(&self) {
        let mut accounting = self.accounting();
        accounting.remaining = accounting.limit;
        accounting.expires = None;
    }

    fn accounting(&self) -> std::sync::MutexGuard<'_, Accounting> {
        self.accounting.lock().expect("limiter accounting poisoned")
    }
}

/// Exclusive right to transmit on a bucket. Released on drop.
#[derive(Debug)]
pub struct LimiterPermit {
    limiter: Arc<Limiter>,
    _guard: OwnedMutexGuard<()>,
}

impl LimiterPermit {
    /// If the bucket is exhausted, sleep until it resets, then refill it.
    pub async fn throttle(&self, sleeper: &dyn Sleeper) {
        if let Some(wait) = self.limiter.pending_wait() {
            debug!(
                target: "bucketwise::limiter",
                wait_ms = wait.as_millis() as u64,
                "bucket exhausted; waiting for reset before transmitting"
            );
            sleeper.sleep(wait).await;
            self.limiter.refill();
        }
    }

    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }
}
