//! Connectivity gate: sticky one-way bits shared between event callbacks
//! and the bring-up sequence.
//!
//! ```text
//!  link event ctx ──on_event()──▶ ┌───────────────────┐
//!                                 │ Connected  [ ]    │ ──wait()──▶ Bootstrap
//!  broker event ctx ─mark_data──▶ │ DataReady  [ ]    │
//!                     _ready()    └───────────────────┘
//! ```
//!
//! Each bit has exactly one writer: the link-event handler owns
//! `Connected`, the broker-event handler owns `DataReady`.  Bits are only
//! cleared by [`ConnectivityGate::clear`] at the start of a bring-up
//! attempt.  Waiters park on a condition variable which writers notify.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use log::{info, warn};

use crate::app::events::LinkEvent;

/// How often a cancellable wait re-checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The two gate bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateFlag {
    /// IP address acquired on the link.
    Connected = 0b01,
    /// The broker acknowledged a publish on the live session.
    DataReady = 0b10,
}

impl GateFlag {
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// Result of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Set,
    TimedOut,
    Cancelled,
}

/// Cooperative shutdown signal checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sticky connectivity bits plus link observability counters.
#[derive(Debug, Default)]
pub struct ConnectivityGate {
    bits: AtomicU8,
    ipv6_acquired: AtomicBool,
    address_losses: AtomicU32,
    park: Mutex<()>,
    cond: Condvar,
}

impl ConnectivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset both bits before a bring-up attempt.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
        self.ipv6_acquired.store(false, Ordering::Release);
    }

    pub fn is_set(&self, flag: GateFlag) -> bool {
        self.bits.load(Ordering::Acquire) & flag.mask() != 0
    }

    /// Link-event handler.  Safe to call from the driver's event task
    /// while another thread is blocked in [`wait`](Self::wait).
    pub fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::GotAddress(ip) => {
                info!(
                    "Gate: got IP {} netmask {} gateway {}",
                    ip.addr, ip.netmask, ip.gateway
                );
                for (i, dns) in ip.dns.iter().enumerate() {
                    if let Some(server) = dns {
                        info!("Gate: DNS{} {}", i + 1, server);
                    }
                }
                self.set(GateFlag::Connected);
            }
            LinkEvent::LostAddress => {
                // Known gap: no re-bring-up, and `Connected` stays set.
                let n = self.address_losses.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Gate: lost IP address (#{}), link recovery is not implemented", n);
            }
            LinkEvent::UserInterrupted => {
                info!("Gate: PPP session interrupted by user");
            }
            LinkEvent::GotIpv6(addr) => {
                self.ipv6_acquired.store(true, Ordering::Release);
                info!("Gate: got IPv6 {}", addr);
            }
        }
    }

    /// Broker-event side: the first acknowledged publish marks the data
    /// path as proven.  Refused while `Connected` is clear.
    pub fn mark_data_ready(&self) -> bool {
        if !self.is_set(GateFlag::Connected) {
            warn!("Gate: DataReady refused, link not connected");
            return false;
        }
        self.set(GateFlag::DataReady)
    }

    /// Block until `flag` is set or `timeout` elapses (`None` waits forever).
    /// Returns the flag state at return.  `Some(Duration::ZERO)` never blocks.
    pub fn wait(&self, flag: GateFlag, timeout: Option<Duration>) -> bool {
        self.wait_inner(flag, timeout, None) == WaitOutcome::Set
    }

    /// As [`wait`](Self::wait), but also returns when `cancel` fires.
    pub fn wait_cancellable(
        &self,
        flag: GateFlag,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> WaitOutcome {
        self.wait_inner(flag, timeout, Some(cancel))
    }

    /// Whether an IPv6 address was reported since the last `clear()`.
    pub fn ipv6_acquired(&self) -> bool {
        self.ipv6_acquired.load(Ordering::Acquire)
    }

    /// Number of `LostAddress` events seen since boot.
    pub fn address_losses(&self) -> u32 {
        self.address_losses.load(Ordering::Relaxed)
    }

    // ── Internal ──────────────────────────────────────────────

    /// Returns `true` if this call flipped the bit.
    fn set(&self, flag: GateFlag) -> bool {
        let prev = self.bits.fetch_or(flag.mask(), Ordering::AcqRel);
        if prev & flag.mask() != 0 {
            return false;
        }
        // Notify under the park lock so a waiter cannot check-then-park
        // across this store and miss the wakeup.
        let _guard = self.park.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
        true
    }

    fn wait_inner(
        &self,
        flag: GateFlag,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> WaitOutcome {
        if self.is_set(flag) {
            return WaitOutcome::Set;
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return WaitOutcome::Cancelled;
        }
        if timeout == Some(Duration::ZERO) {
            return WaitOutcome::TimedOut;
        }

        // A timeout too large to represent is treated as unbounded.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut guard = self.park.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_set(flag) {
                return WaitOutcome::Set;
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return WaitOutcome::Cancelled;
            }

            let mut slice = cancel.map(|_| CANCEL_POLL_INTERVAL);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                let remaining = deadline - now;
                slice = Some(slice.map_or(remaining, |s| s.min(remaining)));
            }

            guard = match slice {
                Some(slice) => {
                    self.cond
                        .wait_timeout(guard, slice)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}
