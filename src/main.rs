//! BikeTrack Firmware: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiLink / ModemDriver   MqttClientConnector   SystemClock    │
//! │  (LinkDriver)             (MqttConnector)       (Clock)        │
//! │  RandomTelemetrySource (TelemetrySource)                       │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  Bootstrap · ConnectivityGate · SessionManager          │    │
//! │  │  TelemetryPublisher (own task, drift-free period)       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{error, info, warn};

use biketrack::adapters::device_id;
use biketrack::adapters::modem::{ModemDriver, UartPort};
use biketrack::adapters::mqtt::MqttClientConnector;
use biketrack::adapters::stub_sensors::RandomTelemetrySource;
use biketrack::adapters::time::{self, SystemClock};
use biketrack::adapters::wifi::WifiLink;
use biketrack::app::bootstrap::Bootstrap;
use biketrack::app::ports::LinkDriver;
use biketrack::app::publisher::{PublishStats, TelemetryPublisher};
use biketrack::config::{LinkConfig, TrackerConfig};
use biketrack::error::BootError;
use biketrack::gate::{CancelToken, ConnectivityGate};
use biketrack::task::{self, PUBLISHER_TASK};

/// How often the main task logs a health line once steady.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  BikeTrack v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");
    info!("[APP] Free memory: {} bytes", free_heap());
    info!("[APP] IDF version: {}", idf_version());

    if let Err(e) = run() {
        error!("Fatal: {:#}, restarting", e);
        std::thread::sleep(Duration::from_secs(1));
        // SAFETY: plain FFI; does not return.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
    Ok(())
}

fn run() -> Result<()> {
    // ── 2. Configuration ──────────────────────────────────────
    let config = TrackerConfig::from_build_env()?;
    info!(
        "Config: broker {}, period {}s",
        config.broker_uri, config.publish_period_secs
    );

    // ── 3. Peripherals + link driver ──────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    let mut link: Box<dyn LinkDriver> = match &config.link {
        LinkConfig::Wifi { ssid, password } => {
            let nvs = EspDefaultNvsPartition::take()?;
            let esp_wifi = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?;
            let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
            Box::new(WifiLink::new(wifi, ssid.clone(), password.clone()))
        }
        LinkConfig::Cellular {
            apn, model, uart, ..
        } => {
            let port = UartPort::new(peripherals.uart1, uart)?;
            Box::new(ModemDriver::new(port, apn.clone(), *model, uart.flow_control))
        }
    };

    // ── 4. Bring-up ───────────────────────────────────────────
    let gate = Arc::new(ConnectivityGate::new());
    let cancel = CancelToken::new();
    let mut connector = MqttClientConnector::new(device_id::client_id(&device_id::read_mac()));
    let period = config.publish_period();

    let mut publisher_stats: Option<Arc<PublishStats>> = None;
    let mut boot = Bootstrap::new(&config, Arc::clone(&gate)).with_cancel(cancel.clone());
    let _session = boot.run(link.as_mut(), &mut connector, |session| {
        let clock = SystemClock::new();
        let source = RandomTelemetrySource::with_os_rng(SystemClock::new());
        let publisher = TelemetryPublisher::new(source, clock, session, period);
        publisher_stats = Some(publisher.stats());

        let cancel = cancel.clone();
        task::spawn_on_core(PUBLISHER_TASK, move || {
            // Sample timestamps need a real wall clock.
            let _sntp = time::sync_wall_clock();
            publisher.run(&cancel)
        })
        .map(drop)
        .map_err(|e| {
            error!("Boot: publisher spawn failed: {}", e);
            BootError::Spawn
        })
    })?;

    // ── 5. Steady state ───────────────────────────────────────
    info!("Steady: telemetry flowing");
    loop {
        std::thread::sleep(HEALTH_INTERVAL);
        if let Some(stats) = &publisher_stats {
            let s = stats.snapshot();
            info!(
                "Health: cycles={} published={} failed={} dropped={} overruns={} heap={}",
                s.cycles,
                s.published,
                s.failed,
                s.dropped,
                s.overruns,
                free_heap()
            );
        }
        let losses = gate.address_losses();
        if losses > 0 {
            warn!("Health: link lost its address {} time(s), no re-bring-up", losses);
        }
    }
}

fn free_heap() -> u32 {
    // SAFETY: plain FFI read.
    unsafe { esp_idf_svc::sys::esp_get_free_heap_size() }
}

fn idf_version() -> String {
    // SAFETY: returns a pointer to a static null-terminated string.
    unsafe { core::ffi::CStr::from_ptr(esp_idf_svc::sys::esp_get_idf_version()) }
        .to_string_lossy()
        .into_owned()
}
