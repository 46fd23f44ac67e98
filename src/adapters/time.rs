//! Clock adapter and SNTP wall-clock sync.
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`
//!   (microsecond precision, counts from boot); wall clock from the libc
//!   clock that SNTP sets.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` for host-side
//!   testing and simulation.

use core::time::Duration;

use log::{info, warn};

use crate::app::ports::Clock;
use crate::telemetry::UnixTime;

/// SNTP sync polls before giving up and continuing unsynced.
pub const SNTP_ATTEMPTS: u32 = 10;
pub const SNTP_POLL: Duration = Duration::from_secs(2);

/// Wall clock earlier than 2020-01-01 was never synced.
const EPOCH_2020: UnixTime = 1_577_836_800;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Whether the wall clock looks like it has been set.
    pub fn wall_clock_valid(&self) -> bool {
        self.unix_time() >= EPOCH_2020
    }
}

impl Clock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn monotonic(&self) -> Duration {
        // SAFETY: plain read of the ESP-IDF high-resolution timer.
        let us = unsafe { esp_idf_sys::esp_timer_get_time() };
        Duration::from_micros(us.max(0) as u64)
    }

    #[cfg(not(target_os = "espidf"))]
    fn monotonic(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.monotonic();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }

    fn unix_time(&self) -> UnixTime {
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_secs() as UnixTime,
            Err(e) => -(e.duration().as_secs() as UnixTime),
        }
    }
}

/// Keeps SNTP running for as long as it lives.
pub struct SntpGuard {
    #[cfg(target_os = "espidf")]
    _sntp: esp_idf_svc::sntp::EspSntp<'static>,
}

/// Start SNTP and wait for the first sync.
///
/// Polls [`SNTP_ATTEMPTS`] times, [`SNTP_POLL`] apart.  An unsynced clock
/// is not fatal: sync keeps running in the background and early samples
/// carry whatever time the RTC holds.  `None` only if SNTP could not start.
#[cfg(target_os = "espidf")]
pub fn sync_wall_clock() -> Option<SntpGuard> {
    use esp_idf_svc::sntp::{EspSntp, SyncStatus};

    let sntp = match EspSntp::new_default() {
        Ok(s) => s,
        Err(e) => {
            warn!("Time: SNTP init failed: {}", e);
            return None;
        }
    };
    info!("Time: waiting for SNTP sync");
    for attempt in 1..=SNTP_ATTEMPTS {
        if sntp.get_sync_status() == SyncStatus::Completed {
            info!("Time: synced after {} poll(s)", attempt);
            return Some(SntpGuard { _sntp: sntp });
        }
        std::thread::sleep(SNTP_POLL);
    }
    warn!(
        "Time: not synced after {} polls, continuing",
        SNTP_ATTEMPTS
    );
    Some(SntpGuard { _sntp: sntp })
}

/// Simulation: the host clock is already set.
#[cfg(not(target_os = "espidf"))]
pub fn sync_wall_clock() -> Option<SntpGuard> {
    if SystemClock::new().wall_clock_valid() {
        info!("Time(sim): host clock in use");
    } else {
        warn!("Time(sim): host clock predates 2020");
    }
    Some(SntpGuard {})
}
