//! Clock abstraction for deterministic and wall-clock execution.
//!
//! The scheduler is agnostic to its time source. [`VirtualClock`] is the
//! test-controlled default: time stands still until advanced, either
//! explicitly or by the dispatch loop jumping to the next deadline.
//! [`MonotonicClock`] anchors logical time on [`std::time::Instant`] and
//! refuses to be advanced, which is what makes `run_until_idle` return
//! with strictly-future tasks still pending under real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::Time;

/// A monotonic time source.
pub trait Clock {
    /// Returns the current logical time.
    fn now(&self) -> Time;

    /// Requests that the clock jump forward to `deadline`.
    ///
    /// Returns true if the clock honored the request (virtual time).
    /// A real-time clock returns false and is left untouched; time
    /// passes on its own there.
    fn advance_to(&self, deadline: Time) -> bool;
}

/// Test-controlled virtual clock.
///
/// Time only moves through [`advance`](VirtualClock::advance) /
/// [`advance_to`](Clock::advance_to). Advancement is monotone: a request
/// to move backwards leaves the clock where it is.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now_nanos: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock at the given start time.
    #[must_use]
    pub fn starting_at(start: Time) -> Self {
        Self {
            now_nanos: AtomicU64::new(start.as_nanos()),
        }
    }

    /// Advances the clock by `delta`, saturating at the end of the time
    /// domain.
    pub fn advance(&self, delta: Duration) {
        let target = self.now().saturating_add(delta);
        self.now_nanos.fetch_max(target.as_nanos(), Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now_nanos.load(Ordering::SeqCst))
    }

    fn advance_to(&self, deadline: Time) -> bool {
        // fetch_max keeps advancement monotone.
        self.now_nanos.fetch_max(deadline.as_nanos(), Ordering::SeqCst);
        true
    }
}

/// Wall-clock time source anchored on [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    /// Creates a monotonic clock anchored at the current instant; logical
    /// time starts at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Time {
        Time::ZERO.saturating_add(self.anchor.elapsed())
    }

    fn advance_to(&self, _deadline: Time) -> bool {
        false
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> Time {
        (**self).now()
    }

    fn advance_to(&self, deadline: Time) -> bool {
        (**self).advance_to(deadline)
    }
}
