//! Explicit deadline values.
//!
//! A [`Deadline`] is a plain instant handed to each invocation. Nothing is
//! registered process-wide, so two requests served by the same warm worker
//! cannot trip each other's timers.

use std::time::Duration;
use tokio::time::Instant;

/// A wall-clock instant after which an invocation must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Expire `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Expire at a fixed instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// Derive a deadline from a platform-reported remaining budget, keeping
    /// `margin` in reserve so the handler can still answer before the
    /// platform kills it. A budget smaller than the margin yields an already
    /// expired deadline.
    pub fn from_remaining(remaining: Duration, margin: Duration) -> Self {
        Self::after(remaining.saturating_sub(margin))
    }

    /// Millisecond variant of [`Deadline::from_remaining`], matching how
    /// serverless runtimes usually report the remaining time.
    pub fn from_remaining_millis(remaining_ms: u64, margin: Duration) -> Self {
        Self::from_remaining(Duration::from_millis(remaining_ms), margin)
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}
