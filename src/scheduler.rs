//! Drift-free periodic schedule.
//!
//! The anchor is captured once, before the first cycle.  Every wake target
//! is the previous target plus the period, so time spent sampling and
//! publishing never accumulates into the cadence:
//!
//! ```text
//!  anchor        t0+P          t0+2P         t0+3P
//!    │── work ──▶ sleep ──│── work ──▶ sleep ──│── work ─ ...
//! ```
//!
//! Matches FreeRTOS `vTaskDelayUntil`: when a cycle overruns its target the
//! sleep returns immediately and the schedule stays on the original grid
//! (targets are never skipped or re-anchored).

use core::time::Duration;

/// Absolute-time periodic schedule over a monotonic clock.
#[derive(Debug, Clone)]
pub struct PeriodicSchedule {
    period: Duration,
    last_target: Duration,
    overruns: u64,
}

impl PeriodicSchedule {
    /// Anchor the schedule at `now` (the monotonic wake reference).
    pub fn new(now: Duration, period: Duration) -> Self {
        Self {
            period,
            last_target: now,
            overruns: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Most recent wake target (the anchor before the first advance).
    pub fn last_target(&self) -> Duration {
        self.last_target
    }

    /// Advance to the next wake target.  `now` is only used to detect an
    /// overrun; it never moves the grid.
    pub fn advance(&mut self, now: Duration) -> Duration {
        self.last_target = self.last_target.saturating_add(self.period);
        if now > self.last_target {
            self.overruns += 1;
        }
        self.last_target
    }

    /// Cycles whose work finished after their wake target.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}
