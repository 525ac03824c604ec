//! Interval-based rate limiting.
//!
//! Bounds how *often* calls may start, independently of how many may run at
//! once. The endpoint penalizes bursts even when concurrency is low.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum wall-clock gap between successive call starts.
///
/// Each caller reserves the next free slot under a short lock and then
/// sleeps until that slot outside the lock, so waiting callers are admitted
/// in reservation order, exactly `interval` apart.
///
/// Admission alone does not bound the gap between *actual* starts when the
/// caller blocks on something else afterwards (a saturated semaphore), so
/// [`IntervalLimiter::mark_start`] re-checks spacing right before the call.
#[derive(Debug)]
pub struct IntervalLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    last_start: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
            last_start: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next admission slot and return the instant it opened.
    pub async fn until_ready(&self) -> Instant {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
        slot
    }

    /// Wait until at least `interval` has passed since the previous recorded
    /// start, then record now as a start. Starts are serialized through the
    /// lock, so two callers can never start closer than `interval`.
    pub async fn mark_start(&self) -> Instant {
        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        let now = Instant::now();
        *last = Some(now);

        // Later admissions are measured from the real start.
        let mut next = self.next_slot.lock().await;
        let earliest = now + self.interval;
        if next.map_or(true, |slot| slot < earliest) {
            *next = Some(earliest);
        }
        now
    }
}
