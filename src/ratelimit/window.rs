//! Sliding window call history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{Result, TurnstileError};

/// What happens to a call attempt that was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectedCalls {
    /// Rejected attempts stay in the history and keep the window full.
    #[default]
    Count,
    /// Rejected attempts are dropped again; only admitted calls occupy the window.
    Discard,
}

/// Window length, call limit and rejection policy shared by every key of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    window: Duration,
    limit: u32,
    rejected: RejectedCalls,
}

impl WindowPolicy {
    /// Create a new policy.
    ///
    /// A zero window would prune every call immediately, so it is refused.
    /// So is a window too long to add to an [`Instant`]. A zero limit is
    /// valid and rejects everything.
    pub fn new(window: Duration, limit: u32) -> Result<Self> {
        if window.is_zero() {
            return Err(TurnstileError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }

        if Instant::now().checked_add(window).is_none() {
            return Err(TurnstileError::Config(format!(
                "rate limit window of {}s is out of range",
                window.as_secs()
            )));
        }

        Ok(Self {
            window,
            limit,
            rejected: RejectedCalls::default(),
        })
    }

    /// Set the policy for rejected call attempts.
    pub fn with_rejected(mut self, rejected: RejectedCalls) -> Self {
        self.rejected = rejected;
        self
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the per-window call limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Get the rejected call policy.
    pub fn rejected(&self) -> RejectedCalls {
        self.rejected
    }

    /// Most entries a history ever needs to hold to decide exactly.
    fn capacity(&self) -> usize {
        self.limit as usize + 1
    }
}

/// Outcome of recording one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the call is admitted
    pub admitted: bool,
    /// Calls inside the window after this one, saturating at `limit + 1`
    pub count: usize,
    /// The limit the call was checked against
    pub limit: u32,
    /// Time until the next call could be admitted (rejections only)
    pub retry_after: Option<Duration>,
}

/// Recent call instants for one client, oldest first.
#[derive(Debug, Default)]
pub struct CallHistory {
    calls: VecDeque<Instant>,
}

impl CallHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call at `now` and decide whether it is admitted.
    ///
    /// The call is appended before counting, so the attempt that tips the
    /// window over the limit is itself part of the count.
    pub fn record(&mut self, now: Instant, policy: &WindowPolicy) -> Decision {
        // Callers read the clock before taking the key lock, so `now` can
        // trail the newest entry slightly. Clamp to keep the deque sorted.
        let now = match self.calls.back() {
            Some(&last) if last > now => last,
            _ => now,
        };

        self.calls.push_back(now);
        self.prune(now, policy.window);

        // Only the newest `limit + 1` entries can change a decision.
        while self.calls.len() > policy.capacity() {
            self.calls.pop_front();
        }

        let count = self.calls.len();
        let admitted = count <= policy.limit as usize;

        if !admitted && policy.rejected == RejectedCalls::Discard {
            self.calls.pop_back();
        }

        let retry_after = if admitted {
            None
        } else {
            self.retry_after(now, policy)
        };

        Decision {
            admitted,
            count,
            limit: policy.limit,
            retry_after,
        }
    }

    /// Drop every call that is no longer inside the window ending at `now`.
    ///
    /// The window is `(now - window, now]`: a call exactly one window old has
    /// expired.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };

        while let Some(&oldest) = self.calls.front() {
            if oldest > cutoff {
                break;
            }
            self.calls.pop_front();
        }
    }

    /// Count the calls inside the window ending at `now` without modifying the history.
    pub fn count_at(&self, now: Instant, window: Duration) -> usize {
        match now.checked_sub(window) {
            Some(cutoff) => self.calls.iter().rev().take_while(|&&t| t > cutoff).count(),
            None => self.calls.len(),
        }
    }

    /// Number of recorded calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are recorded.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The newest recorded call.
    pub fn last_call(&self) -> Option<Instant> {
        self.calls.back().copied()
    }

    /// Time until a call would be admitted again.
    ///
    /// A new call fits once the `limit`-th newest entry has left the window.
    fn retry_after(&self, now: Instant, policy: &WindowPolicy) -> Option<Duration> {
        let limit = policy.limit as usize;
        if limit == 0 || self.calls.len() < limit {
            return None;
        }

        let blocking = self.calls[self.calls.len() - limit];
        blocking
            .checked_add(policy.window)
            .map(|expiry| expiry.saturating_duration_since(now))
    }
}
