//! Bring-up sequencer.
//!
//! Runs once at boot and never goes backwards:
//!
//! ```text
//!  Init ─▶ LinkBringUp ─▶ [SimUnlock] ─▶ SignalQualityCheck ─▶ ModeSwitch
//!                                                                  │
//!  Steady ◀─ WaitDataReady ◀─ StartPublisher ◀─ StartSession ◀─ WaitConnected
//! ```
//!
//! Every stage is fatal on error except SimUnlock, which gets one retry
//! after [`SIM_UNLOCK_RETRY_DELAY`].  The two waits block on the
//! [`ConnectivityGate`] without a timeout and return early only when the
//! cancel token fires.

use core::time::Duration;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::error::{BootError, LinkError};
use crate::gate::{CancelToken, ConnectivityGate, GateFlag, WaitOutcome};

use super::events::LinkEventHandler;
use super::ports::{LinkDriver, MqttConnector};
use super::session::SessionManager;

/// Delay before the single SIM unlock retry.
pub const SIM_UNLOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bring-up stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    Init,
    LinkBringUp,
    SimUnlock,
    SignalQualityCheck,
    ModeSwitch,
    WaitConnected,
    StartSession,
    StartPublisher,
    WaitDataReady,
    Steady,
}

pub struct Bootstrap<'a> {
    config: &'a TrackerConfig,
    gate: Arc<ConnectivityGate>,
    cancel: CancelToken,
    retry_delay: Duration,
    trail: Vec<BootStage>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(config: &'a TrackerConfig, gate: Arc<ConnectivityGate>) -> Self {
        Self {
            config,
            gate,
            cancel: CancelToken::new(),
            retry_delay: SIM_UNLOCK_RETRY_DELAY,
            trail: Vec::with_capacity(10),
        }
    }

    /// Abort the gate waits when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Stages entered so far, in order.
    pub fn trail(&self) -> &[BootStage] {
        &self.trail
    }

    /// Drive the whole sequence.  `start_publisher` receives the live
    /// session and must start the periodic task without blocking.
    ///
    /// Returns the session once the first publish has been acknowledged.
    pub fn run<L, M, F>(
        &mut self,
        link: &mut L,
        connector: &mut M,
        start_publisher: F,
    ) -> Result<Arc<SessionManager>, BootError>
    where
        L: LinkDriver + ?Sized,
        M: MqttConnector + ?Sized,
        F: FnOnce(Arc<SessionManager>) -> Result<(), BootError>,
    {
        let result = self.sequence(link, connector, start_publisher);
        if let Err(e) = &result {
            let stage = self.trail.last().copied().unwrap_or(BootStage::Init);
            error!("Boot: failed during {:?}: {}", stage, e);
        }
        result
    }

    fn sequence<L, M, F>(
        &mut self,
        link: &mut L,
        connector: &mut M,
        start_publisher: F,
    ) -> Result<Arc<SessionManager>, BootError>
    where
        L: LinkDriver + ?Sized,
        M: MqttConnector + ?Sized,
        F: FnOnce(Arc<SessionManager>) -> Result<(), BootError>,
    {
        self.enter(BootStage::Init);
        self.config.validate()?;
        self.gate.clear();

        self.enter(BootStage::LinkBringUp);
        let gate = Arc::clone(&self.gate);
        let handler: LinkEventHandler = Box::new(move |event| gate.on_event(event));
        link.start(handler)?;

        if link.sim_pin_required()? {
            self.enter(BootStage::SimUnlock);
            self.unlock_sim(link)?;
        }

        self.enter(BootStage::SignalQualityCheck);
        match link.signal_quality()? {
            Some(q) => match q.rssi_dbm() {
                Some(dbm) => info!(
                    "Boot: signal rssi={} ({} dBm) ber={:?}",
                    q.rssi.unwrap_or_default(),
                    dbm,
                    q.ber
                ),
                None => warn!("Boot: signal quality unknown"),
            },
            None => debug!("Boot: link has no signal quality report"),
        }

        self.enter(BootStage::ModeSwitch);
        link.enter_data_mode()?;

        self.enter(BootStage::WaitConnected);
        self.wait(GateFlag::Connected)?;

        self.enter(BootStage::StartSession);
        let session = Arc::new(SessionManager::new(Arc::clone(&self.gate)));
        session.start(connector, &self.config.broker_uri)?;

        self.enter(BootStage::StartPublisher);
        start_publisher(Arc::clone(&session))?;

        self.enter(BootStage::WaitDataReady);
        self.wait(GateFlag::DataReady)?;

        self.enter(BootStage::Steady);
        Ok(session)
    }

    fn unlock_sim<L: LinkDriver + ?Sized>(&self, link: &mut L) -> Result<(), BootError> {
        let pin = self.config.link.sim_pin().ok_or(LinkError::PinRequired)?;
        match link.unlock_sim(pin) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "Boot: SIM unlock failed ({}), retrying in {} ms",
                    e,
                    self.retry_delay.as_millis()
                );
                std::thread::sleep(self.retry_delay);
                link.unlock_sim(pin)?;
                Ok(())
            }
        }
    }

    fn wait(&self, flag: GateFlag) -> Result<(), BootError> {
        match self.gate.wait_cancellable(flag, None, &self.cancel) {
            WaitOutcome::Set => Ok(()),
            WaitOutcome::Cancelled => Err(BootError::Cancelled),
            // Unbounded waits only return on set or cancel.
            WaitOutcome::TimedOut => Err(BootError::Cancelled),
        }
    }

    fn enter(&mut self, stage: BootStage) {
        debug_assert!(self.trail.last().is_none_or(|prev| *prev < stage));
        info!("Boot: {:?}", stage);
        self.trail.push(stage);
    }
}
