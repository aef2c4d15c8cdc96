//! Self-rescheduling loop timer with an "at most" override
//!
//! The timer ticks at a fine granularity and fires its loop whenever the
//! deadline has passed. The next deadline is the previous deadline plus the
//! loop period (not "now" plus the period), so average cadence stays
//! independent of how long each loop takes. `at_most` pulls the next firing
//! forward; the timer returns to its normal cadence afterwards.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Loop scheduling state shared between the driving task and callers that
/// want the next loop to happen sooner.
pub struct LoopTimer {
    tick: Duration,
    period: Duration,
    next_fire: Mutex<Instant>,
}

impl LoopTimer {
    pub fn new(tick: Duration, period: Duration) -> Self {
        Self {
            tick,
            period,
            next_fire: Mutex::new(Instant::now() + period),
        }
    }

    /// Sleep one tick.
    pub async fn wait_tick(&self) {
        tokio::time::sleep(self.tick).await;
    }

    /// Whether the loop deadline has passed.
    pub fn due(&self) -> bool {
        let next = self.next_fire.lock().unwrap();
        Instant::now() >= *next
    }

    /// Schedule the next firing from the previous deadline.
    pub fn advance(&self) {
        let mut next = self.next_fire.lock().unwrap();
        *next += self.period;
    }

    /// Request that the next loop runs no later than `d` from now. Safe to
    /// call concurrently with the driving task; a later deadline is never
    /// installed over an earlier one.
    pub fn at_most(&self, d: Duration) {
        let cap = Instant::now() + d;
        let mut next = self.next_fire.lock().unwrap();
        if *next > cap {
            *next = cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow_timer() -> LoopTimer {
        LoopTimer::new(Duration::from_millis(1), Duration::from_secs(3600))
    }

    #[test]
    fn test_not_due_before_period() {
        let t = slow_timer();
        assert!(!t.due());
    }

    #[test]
    fn test_at_most_pulls_deadline_forward() {
        let t = slow_timer();
        t.at_most(Duration::ZERO);
        assert!(t.due());
    }

    #[test]
    fn test_at_most_never_pushes_deadline_back() {
        let t = slow_timer();
        t.at_most(Duration::ZERO);
        t.at_most(Duration::from_secs(7200));
        assert!(t.due());
    }

    #[test]
    fn test_advance_reschedules_a_full_period_out() {
        let t = slow_timer();
        t.at_most(Duration::ZERO);
        assert!(t.due());
        t.advance();
        assert!(!t.due());
    }

    #[tokio::test]
    async fn test_wait_tick_sleeps_roughly_one_tick() {
        let t = LoopTimer::new(Duration::from_millis(5), Duration::from_secs(3600));
        let start = Instant::now();
        t.wait_tick().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
