//! AT command layer for the cellular modem, built on the `atat` blocking
//! client.
//!
//! ```text
//!  send(&GetSignalQuality) ──▶ atat::blocking::Client ──▶ PortWriter ──▶ UART
//!                                      ▲
//!                                ResponseSlot
//!                                      │
//!  UART ──▶ at-rx task ──▶ atat::Ingress (DefaultDigester + CONNECT) ──┘
//! ```
//!
//! Only command mode is handled here.  Once `ATD*99#` answers `CONNECT`
//! the serial port carries PPP frames: the channel must be closed (which
//! stops the rx task) before the PPP netif takes over the port.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use atat::blocking::{AtatClient, Client};
use atat::digest::ParseError;
use atat::{AtatCmd, AtatIngress, Config, DefaultDigester, Ingress, ResponseSlot, UrcChannel};
use log::{debug, error, info, warn};

use crate::error::LinkError;
use crate::task::{self, Core, TaskSpec};

use self::commands::Urc;

/// Largest single response the digester buffers.
const RES_BUF: usize = 256;
/// Room for the longest command we write (`AT+CGDCONT` with a 64-byte APN).
const CMD_BUF: usize = 128;
const URC_CAPACITY: usize = 4;
const URC_SUBSCRIBERS: usize = 1;
const RX_POLL: Duration = Duration::from_millis(20);

const AT_RX_TASK: TaskSpec = TaskSpec {
    name: "at-rx\0",
    core: Core::Pro,
    priority: 10,
    stack_kb: 4,
};

/// Byte-level serial link to the modem.
///
/// `read` returns `Ok(0)` when nothing arrived within `timeout`.
pub trait SerialPort: Send + Sync {
    fn write_all(&self, data: &[u8]) -> Result<(), LinkError>;
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;
}

/// A typed AT command with a log-safe name.
///
/// Arguments never reach the log; only `NAME` does.
pub trait Command: AtatCmd {
    const NAME: &'static str;
}

type AtIngress = Ingress<'static, DefaultDigester<Urc>, Urc, RES_BUF, URC_CAPACITY, URC_SUBSCRIBERS>;

/// Buffers shared by the client and the ingress for the channel's lifetime.
struct Buffers {
    res_slot: ResponseSlot<RES_BUF>,
    urc_channel: UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
    ingress: [u8; RES_BUF],
    cmd: [u8; CMD_BUF],
}

/// `embedded_io::Write` view of a [`SerialPort`] for the atat client.
pub struct PortWriter<P: ?Sized>(Arc<P>);

impl<P: SerialPort + ?Sized> embedded_io::ErrorType for PortWriter<P> {
    type Error = embedded_io::ErrorKind;
}

impl<P: SerialPort + ?Sized> embedded_io::Write for PortWriter<P> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0
            .write_all(buf)
            .map(|()| buf.len())
            .map_err(|_| embedded_io::ErrorKind::Other)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct AtChannel<P: SerialPort + 'static> {
    client: Client<'static, PortWriter<P>, RES_BUF>,
    running: Arc<AtomicBool>,
    rx: Option<JoinHandle<()>>,
}

impl<P: SerialPort + 'static> AtChannel<P> {
    /// Start the rx task on `port` and return a client bound to it.
    ///
    /// The buffers are leaked: a channel is opened once per modem bring-up.
    pub fn open(port: Arc<P>) -> Result<Self, LinkError> {
        let Buffers {
            res_slot,
            urc_channel,
            ingress,
            cmd,
        } = Box::leak(Box::new(Buffers {
            res_slot: ResponseSlot::new(),
            urc_channel: UrcChannel::new(),
            ingress: [0; RES_BUF],
            cmd: [0; CMD_BUF],
        }));
        let res_slot: &'static ResponseSlot<RES_BUF> = res_slot;
        let urc_channel: &'static UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS> = urc_channel;

        let digester = DefaultDigester::<Urc>::new().with_custom_success(connect_result);
        let ingress = Ingress::new(digester, ingress, res_slot, urc_channel);
        let client = Client::new(PortWriter(Arc::clone(&port)), res_slot, cmd, Config::default());

        let running = Arc::new(AtomicBool::new(true));
        let rx = {
            let running = Arc::clone(&running);
            task::spawn_on_core(AT_RX_TASK, move || rx_pump(&*port, ingress, urc_channel, &running))
                .map_err(|e| {
                    error!("Modem: AT rx task spawn failed: {}", e);
                    LinkError::InitFailed
                })?
        };

        Ok(Self {
            client,
            running,
            rx: Some(rx),
        })
    }

    /// Send `cmd` and wait for its final result code.
    pub fn send<C: Command>(&mut self, cmd: &C) -> Result<C::Response, LinkError> {
        debug!("Modem: >> {}", C::NAME);
        match self.client.send(cmd) {
            Ok(resp) => {
                debug!("Modem: << {} OK", C::NAME);
                Ok(resp)
            }
            Err(atat::Error::Timeout) => {
                warn!("Modem: `{}` timed out", C::NAME);
                Err(LinkError::Timeout)
            }
            Err(e) => {
                warn!("Modem: `{}` -> {:?}", C::NAME, e);
                Err(LinkError::CommandRejected)
            }
        }
    }

    /// Stop the rx task so the port can carry PPP frames.
    pub fn close(mut self) {
        self.stop_rx();
    }

    fn stop_rx(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(rx) = self.rx.take() {
            if rx.join().is_err() {
                error!("Modem: AT rx task panicked");
            }
        }
    }
}

impl<P: SerialPort + 'static> Drop for AtChannel<P> {
    fn drop(&mut self) {
        self.stop_rx();
    }
}

fn rx_pump<P: SerialPort + ?Sized>(
    port: &P,
    mut ingress: AtIngress,
    urc_channel: &'static UrcChannel<Urc, URC_CAPACITY, URC_SUBSCRIBERS>,
    running: &AtomicBool,
) {
    let mut urcs = match urc_channel.subscribe() {
        Ok(sub) => Some(sub),
        Err(e) => {
            warn!("Modem: URC subscription failed: {:?}", e);
            None
        }
    };

    while running.load(Ordering::Acquire) {
        match port.read(ingress.write_buf(), RX_POLL) {
            Ok(0) => {}
            Ok(n) => {
                if let Err(e) = ingress.try_advance(n) {
                    warn!("Modem: response dropped: {:?}", e);
                }
            }
            Err(e) => {
                warn!("Modem: UART read failed: {}", e);
                std::thread::sleep(RX_POLL);
            }
        }

        while let Some(Urc::Registration(reg)) = urcs.as_mut().and_then(|s| s.try_next_message_pure()) {
            info!("Modem: network registration status {}", reg.stat);
        }
    }
    debug!("Modem: AT rx stopped");
}

/// `CONNECT[ <rate>]` ends a dial successfully; the default digester only
/// knows `OK`.
fn connect_result(buf: &[u8]) -> Result<(&[u8], usize), ParseError> {
    const CONNECT: &[u8] = b"CONNECT";

    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or(ParseError::Incomplete)?;
    let rest = &buf[start..];
    if !rest.starts_with(CONNECT) {
        return if CONNECT.starts_with(rest) {
            Err(ParseError::Incomplete)
        } else {
            Err(ParseError::NoMatch)
        };
    }
    let end = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ParseError::Incomplete)?;
    Ok((&rest[..end], start + end + 2))
}

// ───────────────────────────────────────────────────────────────
// Command set
// ───────────────────────────────────────────────────────────────

pub mod commands {
    use core::fmt;

    use atat::atat_derive::{AtatCmd, AtatResp, AtatUrc};
    use atat::{Error, InternalError};
    use heapless::String;

    use crate::config::{Apn, SimPin};

    use super::Command;

    /// Empty response for commands that only answer `OK`.
    #[derive(Debug, Clone, PartialEq, AtatResp)]
    pub struct NoResponse;

    /// `AT`: liveness check.
    #[derive(Clone, AtatCmd)]
    #[at_cmd("", NoResponse, timeout_ms = 1000)]
    pub struct Attention;

    /// `ATE0`: stop echoing commands.
    #[derive(Clone, AtatCmd)]
    #[at_cmd("E0", NoResponse, timeout_ms = 1000)]
    pub struct DisableEcho;

    /// `AT+IFC=<dce_by_dte>,<dte_by_dce>`: 0 none, 1 XON/XOFF, 2 RTS/CTS.
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+IFC", NoResponse, timeout_ms = 1000)]
    pub struct SetFlowControl {
        #[at_arg(position = 0)]
        pub dce_by_dte: u8,
        #[at_arg(position = 1)]
        pub dte_by_dce: u8,
    }

    /// `AT+CGMM`: model identification.
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+CGMM", ModelId, timeout_ms = 1000)]
    pub struct GetModelId;

    #[derive(Debug, Clone, AtatResp)]
    pub struct ModelId {
        #[at_arg(position = 0)]
        pub model: String<32>,
    }

    /// `AT+CPIN?`
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+CPIN?", PinStatus, timeout_ms = 1000)]
    pub struct GetPinStatus;

    #[derive(Debug, Clone, AtatResp)]
    pub struct PinStatus {
        #[at_arg(position = 0)]
        pub code: String<16>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PinStatusCode {
        Ready,
        SimPin,
        SimPuk,
    }

    impl PinStatus {
        /// `None` for codes the driver does not handle (PH-SIM PIN, SIM PIN2, ...).
        pub fn status(&self) -> Option<PinStatusCode> {
            match self.code.as_str() {
                "READY" => Some(PinStatusCode::Ready),
                "SIM PIN" => Some(PinStatusCode::SimPin),
                "SIM PUK" => Some(PinStatusCode::SimPuk),
                _ => None,
            }
        }
    }

    /// `AT+CPIN="<pin>"`
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+CPIN", NoResponse, timeout_ms = 5000)]
    pub struct EnterPin {
        #[at_arg(position = 0)]
        pub pin: SimPin,
    }

    impl fmt::Debug for EnterPin {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("EnterPin(***)")
        }
    }

    /// `AT+CSQ`
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+CSQ", SignalQualityReport, timeout_ms = 1000)]
    pub struct GetSignalQuality;

    /// Raw `+CSQ: <rssi>,<ber>`; 99 means "not known".
    #[derive(Debug, Clone, AtatResp)]
    pub struct SignalQualityReport {
        #[at_arg(position = 0)]
        pub rssi: u8,
        #[at_arg(position = 1)]
        pub ber: u8,
    }

    /// `AT+CGDCONT=<cid>,"<type>","<apn>"`
    #[derive(Clone, AtatCmd)]
    #[at_cmd("+CGDCONT", NoResponse, timeout_ms = 1000)]
    pub struct SetPdpContext {
        #[at_arg(position = 0)]
        pub cid: u8,
        #[at_arg(position = 1)]
        pub pdp_type: String<8>,
        #[at_arg(position = 2)]
        pub apn: Apn,
    }

    /// `ATD*99#`: dial the packet service; success is `CONNECT`.
    #[derive(Debug, Clone)]
    pub struct DialPacketService;

    impl atat::AtatCmd for DialPacketService {
        type Response = NoResponse;

        const MAX_LEN: usize = 16;
        const MAX_TIMEOUT_MS: u32 = 30_000;

        fn write(&self, buf: &mut [u8]) -> usize {
            const CMD: &[u8] = b"ATD*99#\r\n";
            buf[..CMD.len()].copy_from_slice(CMD);
            CMD.len()
        }

        fn parse(&self, resp: Result<&[u8], InternalError>) -> Result<NoResponse, Error> {
            match resp {
                Ok(line) if line.starts_with(b"CONNECT") => Ok(NoResponse),
                Ok(_) => Err(Error::Parse),
                Err(e) => Err(Error::from(e)),
            }
        }
    }

    /// `+CREG: <stat>` network registration change.
    #[derive(Debug, Clone, AtatResp)]
    pub struct RegistrationUrc {
        #[at_arg(position = 0)]
        pub stat: u8,
    }

    #[derive(Debug, Clone, AtatUrc)]
    pub enum Urc {
        #[at_urc("+CREG")]
        Registration(RegistrationUrc),
    }

    impl Command for Attention {
        const NAME: &'static str = "AT";
    }
    impl Command for DisableEcho {
        const NAME: &'static str = "ATE0";
    }
    impl Command for SetFlowControl {
        const NAME: &'static str = "AT+IFC";
    }
    impl Command for GetModelId {
        const NAME: &'static str = "AT+CGMM";
    }
    impl Command for GetPinStatus {
        const NAME: &'static str = "AT+CPIN?";
    }
    impl Command for EnterPin {
        const NAME: &'static str = "AT+CPIN=***";
    }
    impl Command for GetSignalQuality {
        const NAME: &'static str = "AT+CSQ";
    }
    impl Command for SetPdpContext {
        const NAME: &'static str = "AT+CGDCONT";
    }
    impl Command for DialPacketService {
        const NAME: &'static str = "ATD*99#";
    }
}
