//! Periodic telemetry publisher.
//!
//! One task, one fixed period.  Every cycle samples the battery first and
//! the location second, encodes each on its own and hands each to the
//! session independently:
//!
//! ```text
//!  ┌──────────── cycle n ────────────┐
//!  battery ─encode─▶ publish ─┐
//!                             ├─▶ sleep_until(target(n-1) + P)
//!  location ─encode─▶ publish ┘
//! ```
//!
//! Failures are logged and counted per sample; nothing here is fatal.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::gate::CancelToken;
use crate::scheduler::PeriodicSchedule;
use crate::telemetry::TelemetrySample;

use super::ports::{Clock, TelemetrySource};
use super::session::{PublishJob, PublishSink};

/// Running publisher counters.  Shared so other tasks can read them while
/// the publisher loop is running.
#[derive(Debug, Default)]
pub struct PublishStats {
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    overruns: AtomicU64,
    cycles: AtomicU64,
}

/// Point-in-time copy of [`PublishStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples accepted by the session.
    pub published: u64,
    /// Samples the session refused (not connected, transport error).
    pub failed: u64,
    /// Samples that could not be encoded.
    pub dropped: u64,
    /// Cycles that finished after their wake target.
    pub overruns: u64,
    pub cycles: u64,
}

impl PublishStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one sample's publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Published(u32),
    Failed,
    Dropped,
}

pub struct TelemetryPublisher<S, C, P: ?Sized> {
    source: S,
    clock: C,
    sink: Arc<P>,
    period: Duration,
    stats: Arc<PublishStats>,
}

impl<S, C, P> TelemetryPublisher<S, C, P>
where
    S: TelemetrySource,
    C: Clock,
    P: PublishSink + ?Sized,
{
    pub fn new(source: S, clock: C, sink: Arc<P>, period: Duration) -> Self {
        Self {
            source,
            clock,
            sink,
            period,
            stats: Arc::new(PublishStats::default()),
        }
    }

    /// Handle to the live counters.
    pub fn stats(&self) -> Arc<PublishStats> {
        Arc::clone(&self.stats)
    }

    /// Sample, encode and publish both kinds once.  Battery always goes
    /// first; the location attempt does not depend on the battery result.
    pub fn run_cycle(&mut self) -> [SampleOutcome; 2] {
        let battery = TelemetrySample::BatteryStatus(self.source.battery_status());
        let battery = self.publish_sample(&battery);

        let location = TelemetrySample::Location(self.source.location());
        let location = self.publish_sample(&location);

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        [battery, location]
    }

    /// Run until `cancel` fires.  The wake reference is taken once here and
    /// every later target is derived from it.
    pub fn run(mut self, cancel: &CancelToken) -> StatsSnapshot {
        let mut schedule = PeriodicSchedule::new(self.clock.monotonic(), self.period);
        info!("Publisher: started, period {} ms", self.period.as_millis());

        while !cancel.is_cancelled() {
            self.run_cycle();

            let target = schedule.advance(self.clock.monotonic());
            let overruns = schedule.overruns();
            if overruns > self.stats.overruns.load(Ordering::Relaxed) {
                self.stats.overruns.store(overruns, Ordering::Relaxed);
                warn!("Publisher: cycle overran its period ({} total)", overruns);
            }
            self.clock.sleep_until(target);
        }

        let stats = self.stats.snapshot();
        info!(
            "Publisher: stopped after {} cycles ({} published, {} failed, {} dropped)",
            stats.cycles, stats.published, stats.failed, stats.dropped
        );
        stats
    }

    fn publish_sample(&self, sample: &TelemetrySample) -> SampleOutcome {
        let topic = sample.topic();
        let job = match PublishJob::for_sample(sample) {
            Ok(job) => job,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Publisher: dropped {} sample: {}", topic, e);
                return SampleOutcome::Dropped;
            }
        };
        debug!("Publisher: {} -> {} bytes", topic, job.payload.len());

        match self.sink.publish(job) {
            Ok(msg_id) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                info!("Publisher: sent {}, msg_id={}", topic, msg_id);
                SampleOutcome::Published(msg_id)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Publisher: publish to {} failed: {}", topic, e);
                SampleOutcome::Failed
            }
        }
    }
}
