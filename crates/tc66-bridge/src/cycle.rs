//! Poll cycle timing.
//!
//! Each cycle is measured from just before the request until the readings
//! have been handed to the publish scheduler. The wait before the next cycle
//! is the configured interval minus that duration. A cycle that overruns the
//! interval is followed immediately by the next one; no time debt is carried
//! over.

use std::time::Duration;

use tokio::time::Instant;

/// Timing record for one iteration of the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollCycle {
    number: u64,
    started: Instant,
}

impl PollCycle {
    /// Start timing cycle `number` (1-based).
    pub fn start(number: u64) -> Self {
        Self {
            number,
            started: Instant::now(),
        }
    }

    /// One-based cycle number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Time since the cycle started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What to do between two cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPlan {
    /// Interval is zero: poll back to back.
    Immediate,
    /// The cycle took at least the whole interval.
    Skip {
        /// How far past the interval the cycle ran.
        overrun: Duration,
    },
    /// Sleep for the rest of the interval.
    Sleep(Duration),
}

/// Compute the wait after a cycle that took `duration`.
///
/// ```
/// use std::time::Duration;
/// use tc66_bridge::cycle::{WaitPlan, next_wait};
///
/// let plan = next_wait(Duration::from_millis(2000), Duration::from_millis(300));
/// assert_eq!(plan, WaitPlan::Sleep(Duration::from_millis(1700)));
/// ```
pub fn next_wait(interval: Duration, duration: Duration) -> WaitPlan {
    if interval.is_zero() {
        WaitPlan::Immediate
    } else if duration >= interval {
        WaitPlan::Skip {
            overrun: duration - interval,
        }
    } else {
        WaitPlan::Sleep(interval - duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_wait_is_remaining_interval() {
        assert_eq!(next_wait(ms(2000), ms(300)), WaitPlan::Sleep(ms(1700)));
        assert_eq!(next_wait(ms(2000), ms(0)), WaitPlan::Sleep(ms(2000)));
        assert_eq!(next_wait(ms(2000), ms(1999)), WaitPlan::Sleep(ms(1)));
    }

    #[test]
    fn test_overrun_skips_wait() {
        assert_eq!(
            next_wait(ms(2000), ms(2500)),
            WaitPlan::Skip { overrun: ms(500) }
        );
    }

    #[test]
    fn test_exact_interval_skips_wait() {
        assert_eq!(
            next_wait(ms(2000), ms(2000)),
            WaitPlan::Skip { overrun: ms(0) }
        );
    }

    #[test]
    fn test_zero_interval_never_waits() {
        assert_eq!(next_wait(Duration::ZERO, ms(0)), WaitPlan::Immediate);
        assert_eq!(next_wait(Duration::ZERO, ms(5000)), WaitPlan::Immediate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cycle_measures_elapsed() {
        let cycle = PollCycle::start(3);
        tokio::time::sleep(ms(300)).await;
        assert_eq!(cycle.number(), 3);
        assert_eq!(cycle.elapsed(), ms(300));
    }
}
