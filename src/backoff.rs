//! Backoff schedules for retryable server and network failures.
//!
//! Attempt semantics: `attempt` is the zero-based index of the attempt that just failed, so the
//! first retry waits `delay(0)`. The default server-error schedule is `1 + attempt * 2` seconds:
//!
//! ```rust
//! use std::time::Duration;
//! use bucketwise::Backoff;
//!
//! let backoff = Backoff::server_error();
//! assert_eq!(backoff.delay(0), Duration::from_secs(1));
//! assert_eq!(backoff.delay(1), Duration::from_secs(3));
//! assert_eq!(backoff.delay(2), Duration::from_secs(5));
//! ```
//!
//! Delays saturate at [`MAX_BACKOFF`] instead of overflowing.

use std::fmt;
use std::time::Duration;

/// Upper bound applied to every computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    MaxMustBePositive,
    MaxLessThanInitial { initial: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanInitial { initial, max } => {
                write!(f, "max ({:?}) must be >= initial ({:?})", max, initial)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Linear { initial: Duration, step: Duration, max: Option<Duration> },
}

/// Delay schedule indexed by failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay after every failure.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `initial + step * attempt`.
    pub fn linear(initial: Duration, step: Duration) -> Self {
        Self { kind: BackoffKind::Linear { initial, step, max: None } }
    }

    /// The schedule used for 500/502/504/524 responses and connection resets.
    pub fn server_error() -> Self {
        Self::linear(Duration::from_secs(1), Duration::from_secs(2))
    }

    /// Cap a linear schedule. Constant schedules are returned unchanged.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self.kind {
            BackoffKind::Linear { initial, step, .. } => {
                if max < initial {
                    return Err(BackoffError::MaxLessThanInitial { initial, max });
                }
                Ok(Self { kind: BackoffKind::Linear { initial, step, max: Some(max) } })
            }
            constant @ BackoffKind::Constant { .. } => Ok(Self { kind: constant }),
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: usize) -> Duration {
        match &self.kind {
            BackoffKind::Constant { delay } => (*delay).min(MAX_BACKOFF),
            BackoffKind::Linear { initial, step, max } => {
                let attempt = attempt.min(u32::MAX as usize) as u32;
                let grown = step
                    .checked_mul(attempt)
                    .and_then(|extra| initial.checked_add(extra))
                    .unwrap_or(MAX_BACKOFF);
                let capped = max.map(|m| grown.min(m)).unwrap_or(grown);
                capped.min(MAX_BACKOFF)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::server_error()
    }
}
