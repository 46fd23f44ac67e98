//! Cellular modem link over UART + PPP.
//!
//! Implements [`LinkDriver`] for SIM800 / SIM7600 / BG96 class modems.
//!
//! ```text
//!  start()            AT sync, echo off, flow control, identify
//!  sim_pin_required() AT+CPIN?
//!  unlock_sim()       AT+CPIN="<pin>"
//!  signal_quality()   AT+CSQ
//!  enter_data_mode()  AT+CGDCONT=1,"IP","<apn>"  →  ATD*99#  →  CONNECT  →  PPP
//! ```
//!
//! After `CONNECT` the UART carries PPP frames and every command-mode call
//! fails with [`LinkError::DataModeActive`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`UartPort`] wraps the esp-idf-hal UART
//!   driver; IP events come from the PPP netif via [`super::ip_events`].
//! - **all other targets**: [`SimModemPort`] answers AT commands in memory
//!   and the driver reports a synthetic PPP address itself.

use std::sync::Arc;

use log::{info, warn};

use crate::app::events::LinkEventHandler;
use crate::app::ports::{LinkDriver, SignalQuality};
use crate::config::{Apn, FlowControl, ModemModel, SimPin};
use crate::error::LinkError;

use super::at::commands::{
    Attention, DialPacketService, DisableEcho, EnterPin, GetModelId, GetPinStatus,
    GetSignalQuality, PinStatusCode, SetFlowControl, SetPdpContext,
};
use super::at::{AtChannel, SerialPort};

const SYNC_ATTEMPTS: u32 = 5;

pub struct ModemDriver<P: SerialPort + 'static> {
    port: Arc<P>,
    /// Open from `start()` until the switch to data mode.
    at: Option<AtChannel<P>>,
    apn: Apn,
    model: ModemModel,
    flow_control: FlowControl,
    data_mode: bool,
    #[cfg(target_os = "espidf")]
    ppp: Option<super::ppp::PppNetif>,
    #[cfg(not(target_os = "espidf"))]
    sim_handler: Option<LinkEventHandler>,
}

impl<P: SerialPort + 'static> ModemDriver<P> {
    pub fn new(port: P, apn: Apn, model: ModemModel, flow_control: FlowControl) -> Self {
        Self {
            port: Arc::new(port),
            at: None,
            apn,
            model,
            flow_control,
            data_mode: false,
            #[cfg(target_os = "espidf")]
            ppp: None,
            #[cfg(not(target_os = "espidf"))]
            sim_handler: None,
        }
    }

    pub fn in_data_mode(&self) -> bool {
        self.data_mode
    }

    pub fn port(&self) -> &Arc<P> {
        &self.port
    }

    /// The AT channel, opened on first use.
    fn at(&mut self) -> Result<&mut AtChannel<P>, LinkError> {
        if self.data_mode {
            warn!("Modem: command refused, PPP session active");
            return Err(LinkError::DataModeActive);
        }
        if self.at.is_none() {
            self.at = Some(AtChannel::open(Arc::clone(&self.port))?);
        }
        self.at.as_mut().ok_or(LinkError::InitFailed)
    }

    fn sync(&mut self) -> Result<(), LinkError> {
        let at = self.at()?;
        for attempt in 1..=SYNC_ATTEMPTS {
            match at.send(&Attention) {
                Ok(_) => return Ok(()),
                Err(e) => warn!("Modem: sync attempt {}/{} failed: {}", attempt, SYNC_ATTEMPTS, e),
            }
        }
        Err(LinkError::InitFailed)
    }

    fn identify(&mut self) -> Result<(), LinkError> {
        let model = self.model;
        match self.at()?.send(&GetModelId) {
            Ok(id) => {
                info!("Modem: module '{}' (configured {})", id.model, model.name());
                if model != ModemModel::Generic
                    && !id.model.to_ascii_uppercase().contains(model.name())
                {
                    warn!("Modem: module does not match configured model");
                }
            }
            Err(e) => warn!("Modem: identification failed: {}", e),
        }
        Ok(())
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_register(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        use esp_idf_sys::{esp_err_t, esp_netif_init, ESP_OK};

        // SAFETY: idempotent IDF init; required before the PPP netif exists.
        let ret = unsafe { esp_netif_init() };
        if ret != ESP_OK as esp_err_t {
            log::error!("Modem: esp_netif_init failed ({})", ret);
            return Err(LinkError::InitFailed);
        }
        super::ip_events::subscribe(on_event)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_register(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        self.sim_handler = Some(on_event);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_ppp(&mut self) -> Result<(), LinkError> {
        let netif = super::ppp::PppNetif::start(Arc::clone(&self.port))?;
        self.ppp = Some(netif);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_ppp(&mut self) -> Result<(), LinkError> {
        use crate::app::events::{IpInfo, LinkEvent};
        use std::net::Ipv4Addr;

        info!("Modem(sim): PPP up");
        if let Some(handler) = &self.sim_handler {
            handler(LinkEvent::GotAddress(IpInfo {
                addr: Ipv4Addr::new(10, 64, 12, 7),
                netmask: Ipv4Addr::new(255, 255, 255, 255),
                gateway: Ipv4Addr::new(10, 64, 64, 64),
                dns: [Some(Ipv4Addr::new(8, 8, 8, 8).into()), None],
            }));
        }
        Ok(())
    }
}

impl<P: SerialPort + 'static> LinkDriver for ModemDriver<P> {
    fn start(&mut self, on_event: LinkEventHandler) -> Result<(), LinkError> {
        if self.data_mode {
            return Err(LinkError::DataModeActive);
        }
        info!("Modem: starting {} on APN '{}'", self.model.name(), self.apn);
        self.platform_register(on_event)?;
        self.sync()?;

        let (dce_by_dte, dte_by_dce) = match self.flow_control {
            FlowControl::None => (0, 0),
            FlowControl::Software => (1, 1),
            FlowControl::Hardware => (2, 2),
        };
        let at = self.at()?;
        at.send(&DisableEcho)?;
        at.send(&SetFlowControl {
            dce_by_dte,
            dte_by_dce,
        })?;
        self.identify()
    }

    fn sim_pin_required(&mut self) -> Result<bool, LinkError> {
        let status = self.at()?.send(&GetPinStatus)?;
        match status.status() {
            Some(PinStatusCode::Ready) => Ok(false),
            Some(PinStatusCode::SimPin) => Ok(true),
            Some(PinStatusCode::SimPuk) => {
                warn!("Modem: SIM blocked, PUK required");
                Err(LinkError::PinRejected)
            }
            None => {
                warn!("Modem: unhandled SIM state '{}'", status.code);
                Err(LinkError::CommandRejected)
            }
        }
    }

    fn unlock_sim(&mut self, pin: &str) -> Result<(), LinkError> {
        let pin = SimPin::try_from(pin).map_err(|()| LinkError::PinRejected)?;
        match self.at()?.send(&EnterPin { pin }) {
            Ok(_) => {
                info!("Modem: SIM unlocked");
                Ok(())
            }
            Err(LinkError::CommandRejected) => Err(LinkError::PinRejected),
            Err(e) => Err(e),
        }
    }

    fn signal_quality(&mut self) -> Result<Option<SignalQuality>, LinkError> {
        let report = self.at()?.send(&GetSignalQuality)?;
        Ok(Some(SignalQuality {
            rssi: (report.rssi <= 31).then_some(report.rssi),
            ber: (report.ber <= 7).then_some(report.ber),
        }))
    }

    fn enter_data_mode(&mut self) -> Result<(), LinkError> {
        let pdp = SetPdpContext {
            cid: 1,
            pdp_type: "IP".try_into().map_err(|()| LinkError::ModeSwitchFailed)?,
            apn: self.apn.clone(),
        };
        let at = self.at()?;
        at.send(&pdp).map_err(|_| LinkError::ModeSwitchFailed)?;
        at.send(&DialPacketService)
            .map_err(|_| LinkError::ModeSwitchFailed)?;

        // The rx task must release the port before PPP reads from it.
        if let Some(at) = self.at.take() {
            at.close();
        }
        self.data_mode = true;
        info!("Modem: data mode, starting PPP");
        self.platform_start_ppp()
    }
}

// ───────────────────────────────────────────────────────────────
// UART port (device)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use uart::UartPort;

#[cfg(target_os = "espidf")]
mod uart {
    use core::time::Duration;

    use esp_idf_hal::delay::TickType;
    use esp_idf_hal::gpio::AnyIOPin;
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_hal::uart::{self, Uart, UartDriver};
    use esp_idf_hal::units::Hertz;
    use log::error;

    use crate::config::{FlowControl, UartConfig};
    use crate::error::LinkError;

    use super::SerialPort;

    pub struct UartPort {
        driver: UartDriver<'static>,
    }

    impl UartPort {
        pub fn new<U: Uart>(
            uart: impl Peripheral<P = U> + 'static,
            cfg: &UartConfig,
        ) -> Result<Self, LinkError> {
            let hw_flow = cfg.flow_control == FlowControl::Hardware;
            let config = uart::config::Config::default()
                .baudrate(Hertz(cfg.baud_rate))
                .flow_control(if hw_flow {
                    uart::config::FlowControl::CTSRTS
                } else {
                    uart::config::FlowControl::None
                });

            // SAFETY: pin numbers were validated as distinct GPIOs and are
            // used by nothing else.
            let (tx, rx, cts, rts) = unsafe {
                (
                    AnyIOPin::new(cfg.tx_pin),
                    AnyIOPin::new(cfg.rx_pin),
                    hw_flow.then(|| AnyIOPin::new(cfg.cts_pin)),
                    hw_flow.then(|| AnyIOPin::new(cfg.rts_pin)),
                )
            };

            let driver = UartDriver::new(uart, tx, rx, cts, rts, &config).map_err(|e| {
                error!("Modem: UART init failed: {}", e);
                LinkError::InitFailed
            })?;
            Ok(Self { driver })
        }
    }

    impl SerialPort for UartPort {
        fn write_all(&self, mut data: &[u8]) -> Result<(), LinkError> {
            while !data.is_empty() {
                let n = self
                    .driver
                    .write(data)
                    .map_err(|_| LinkError::CommandRejected)?;
                data = &data[n..];
            }
            Ok(())
        }

        fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
            self.driver
                .read(buf, TickType::from(timeout).ticks())
                .map_err(|_| LinkError::Timeout)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated modem (host)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub use sim::SimModemPort;

#[cfg(not(target_os = "espidf"))]
mod sim {
    use core::time::Duration;
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};

    use crate::error::LinkError;

    use super::SerialPort;

    struct State {
        line: Vec<u8>,
        out: VecDeque<u8>,
        locked: bool,
        data_mode: bool,
        pin_attempts: u32,
        commands: Vec<String>,
    }

    /// In-memory modem answering the AT subset the driver uses.
    pub struct SimModemPort {
        pin: Option<String>,
        /// Wrong-PIN answers to give before accepting the right one.
        reject_pin_times: u32,
        csq: (u8, u8),
        refuse_dial: bool,
        state: Mutex<State>,
    }

    impl SimModemPort {
        /// A modem with an unlocked SIM.
        pub fn new() -> Self {
            Self {
                pin: None,
                reject_pin_times: 0,
                csq: (20, 0),
                refuse_dial: false,
                state: Mutex::new(State {
                    line: Vec::new(),
                    out: VecDeque::new(),
                    locked: false,
                    data_mode: false,
                    pin_attempts: 0,
                    commands: Vec::new(),
                }),
            }
        }

        /// Lock the SIM behind `pin`.
        pub fn with_pin(mut self, pin: &str) -> Self {
            self.pin = Some(pin.to_owned());
            self.state_mut().locked = true;
            self
        }

        /// Answer `+CME ERROR` to the first `n` PIN attempts.
        pub fn rejecting_pin(mut self, n: u32) -> Self {
            self.reject_pin_times = n;
            self
        }

        pub fn with_csq(mut self, rssi: u8, ber: u8) -> Self {
            self.csq = (rssi, ber);
            self
        }

        pub fn refusing_dial(mut self) -> Self {
            self.refuse_dial = true;
            self
        }

        /// Every command line received so far.
        pub fn commands(&self) -> Vec<String> {
            self.lock().commands.clone()
        }

        fn state_mut(&mut self) -> &mut State {
            self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn answer(&self, state: &mut State, cmd: &str) -> String {
            if state.data_mode {
                // PPP frames in data mode; nothing to answer.
                return String::new();
            }
            match cmd {
                "AT" | "ATE0" => "\r\nOK\r\n".into(),
                c if c.starts_with("AT+IFC=") => "\r\nOK\r\n".into(),
                "AT+CGMM" => "\r\nSIMCOM_SIM7600\r\n\r\nOK\r\n".into(),
                "AT+CPIN?" => {
                    let code = if state.locked { "SIM PIN" } else { "READY" };
                    format!("\r\n+CPIN: {code}\r\n\r\nOK\r\n")
                }
                c if c.starts_with("AT+CPIN=") => {
                    state.pin_attempts += 1;
                    let given = c.trim_start_matches("AT+CPIN=").trim_matches('"');
                    let accepted = state.pin_attempts > self.reject_pin_times
                        && self.pin.as_deref() == Some(given);
                    if accepted {
                        state.locked = false;
                        "\r\nOK\r\n".into()
                    } else {
                        "\r\n+CME ERROR: 16\r\n".into()
                    }
                }
                "AT+CSQ" => format!("\r\n+CSQ: {},{}\r\n\r\nOK\r\n", self.csq.0, self.csq.1),
                c if c.starts_with("AT+CGDCONT=") => "\r\nOK\r\n".into(),
                "ATD*99#" if self.refuse_dial => "\r\nERROR\r\n".into(),
                "ATD*99#" => {
                    state.data_mode = true;
                    "\r\nCONNECT 115200\r\n".into()
                }
                _ => "\r\nERROR\r\n".into(),
            }
        }
    }

    impl Default for SimModemPort {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SerialPort for SimModemPort {
        fn write_all(&self, data: &[u8]) -> Result<(), LinkError> {
            let mut state = self.lock();
            for &byte in data {
                if byte == b'\n' {
                    continue;
                }
                if byte == b'\r' {
                    let cmd = String::from_utf8_lossy(&state.line).into_owned();
                    state.line.clear();
                    let reply = self.answer(&mut state, &cmd);
                    state.commands.push(cmd);
                    state.out.extend(reply.bytes());
                } else {
                    state.line.push(byte);
                }
            }
            Ok(())
        }

        fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
            let n = {
                let mut state = self.lock();
                let n = buf.len().min(state.out.len());
                for (slot, byte) in buf.iter_mut().zip(state.out.drain(..n)) {
                    *slot = byte;
                }
                n
            };
            if n == 0 {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
            }
            Ok(n)
        }
    }
}
