//! End-to-end bring-up with the host simulation adapters: AT modem over an
//! in-memory UART, Wi-Fi station, loopback MQTT client, system clock.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use biketrack::adapters::modem::{ModemDriver, SimModemPort};
use biketrack::adapters::mqtt::{ClientId, MqttClientConnector};
use biketrack::adapters::stub_sensors::RandomTelemetrySource;
use biketrack::adapters::time::SystemClock;
use biketrack::adapters::wifi::WifiLink;
use biketrack::app::bootstrap::{BootStage, Bootstrap};
use biketrack::app::ports::LinkDriver;
use biketrack::app::publisher::{StatsSnapshot, TelemetryPublisher};
use biketrack::app::session::MqttState;
use biketrack::config::{FlowControl, LinkConfig, ModemModel, TrackerConfig, UartConfig};
use biketrack::error::{BootError, LinkError};
use biketrack::gate::{CancelToken, ConnectivityGate, GateFlag};
use biketrack::task::{self, PUBLISHER_TASK};

const PERIOD: Duration = Duration::from_millis(20);

fn connector() -> MqttClientConnector {
    MqttClientConnector::new(ClientId::try_from("biketrack-test").unwrap())
}

fn cellular(pin: Option<&str>) -> TrackerConfig {
    TrackerConfig {
        link: LinkConfig::Cellular {
            apn: "internet".try_into().unwrap(),
            model: ModemModel::Sim7600,
            uart: UartConfig::default(),
            sim_pin: pin.map(|p| p.try_into().unwrap()),
        },
        ..TrackerConfig::default()
    }
}

/// Bring up `link` and run a real publisher thread on the system clock.
fn boot_and_publish(
    config: &TrackerConfig,
    link: &mut dyn LinkDriver,
) -> (Result<(), BootError>, Option<StatsSnapshot>) {
    let gate = Arc::new(ConnectivityGate::new());
    let cancel = CancelToken::new();
    let mut handle: Option<JoinHandle<StatsSnapshot>> = None;

    let mut boot = Bootstrap::new(config, Arc::clone(&gate))
        .with_cancel(cancel.clone())
        .with_retry_delay(Duration::from_millis(1));
    let result = boot.run(link, &mut connector(), |session| {
        let publisher = TelemetryPublisher::new(
            RandomTelemetrySource::with_os_rng(SystemClock::new()),
            SystemClock::new(),
            session,
            PERIOD,
        );
        let cancel = cancel.clone();
        handle = Some(
            task::spawn_on_core(PUBLISHER_TASK, move || publisher.run(&cancel))
                .map_err(|_| BootError::Spawn)?,
        );
        Ok(())
    });

    let result = result.map(|session| {
        assert_eq!(boot.trail().last(), Some(&BootStage::Steady));
        assert_eq!(session.state(), MqttState::Connected);
        assert!(gate.is_set(GateFlag::DataReady));
        std::thread::sleep(PERIOD * 5);
    });

    cancel.cancel();
    let stats = handle.map(|h| h.join().unwrap());
    (result, stats)
}

#[test]
fn cellular_bring_up_with_pin_retry_publishes() {
    let config = cellular(Some("1234"));
    let mut modem = ModemDriver::new(
        SimModemPort::new().with_pin("1234").rejecting_pin(1),
        "internet".try_into().unwrap(),
        ModemModel::Sim7600,
        FlowControl::Hardware,
    );

    let (result, stats) = boot_and_publish(&config, &mut modem);
    assert_eq!(result, Ok(()));
    assert!(modem.in_data_mode());
    assert_eq!(modem.signal_quality(), Err(LinkError::DataModeActive));

    let stats = stats.unwrap();
    assert!(stats.cycles >= 2, "{stats:?}");
    assert_eq!(stats.published, stats.cycles * 2);
    assert_eq!(stats.failed, 0);
}

#[test]
fn cellular_dial_refused_is_fatal() {
    let config = cellular(None);
    let mut modem = ModemDriver::new(
        SimModemPort::new().refusing_dial(),
        "internet".try_into().unwrap(),
        ModemModel::Generic,
        FlowControl::None,
    );

    let (result, stats) = boot_and_publish(&config, &mut modem);
    assert_eq!(result, Err(BootError::Link(LinkError::ModeSwitchFailed)));
    assert!(stats.is_none());
    assert!(!modem.in_data_mode());
}

#[test]
fn wifi_bring_up_survives_a_failed_association() {
    let config = TrackerConfig {
        link: LinkConfig::Wifi {
            ssid: "HomeWiFi".try_into().unwrap(),
            password: "mysecret8".try_into().unwrap(),
        },
        ..TrackerConfig::default()
    };
    let mut wifi = WifiLink::new(
        "HomeWiFi".try_into().unwrap(),
        "mysecret8".try_into().unwrap(),
    )
    .failing_connects(1);

    let (result, stats) = boot_and_publish(&config, &mut wifi);
    assert_eq!(result, Ok(()));
    assert!(stats.unwrap().published >= 2);
}
