//! Integration tests for the bring-up sequence against mock link and
//! broker adapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biketrack::app::bootstrap::{BootStage, Bootstrap};
use biketrack::app::events::LinkEvent;
use biketrack::app::session::{MqttState, PublishJob, SessionManager};
use biketrack::config::{LinkConfig, ModemModel, SimPin, TrackerConfig, UartConfig};
use biketrack::error::{BootError, LinkError, SessionError};
use biketrack::gate::{CancelToken, ConnectivityGate, GateFlag};
use biketrack::telemetry::{Location, TelemetrySample};

use crate::mock_hw::{sample_ip, LinkCall, MockConnector, MockLink};

fn cellular_config(pin: Option<&str>) -> TrackerConfig {
    TrackerConfig {
        link: LinkConfig::Cellular {
            apn: "internet".try_into().unwrap(),
            model: ModemModel::Sim7600,
            uart: UartConfig::default(),
            sim_pin: pin.map(|p| SimPin::try_from(p).unwrap()),
        },
        ..TrackerConfig::default()
    }
}

/// Publisher stand-in: one location publish, acknowledged by the mock.
fn publish_once(session: Arc<SessionManager>) -> Result<(), BootError> {
    let job = PublishJob::for_sample(&TelemetrySample::Location(Location::default())).unwrap();
    session.publish(job).unwrap();
    Ok(())
}

fn fast_boot<'a>(config: &'a TrackerConfig, gate: &Arc<ConnectivityGate>) -> Bootstrap<'a> {
    Bootstrap::new(config, Arc::clone(gate)).with_retry_delay(Duration::from_millis(1))
}

// ── Happy path ────────────────────────────────────────────────

#[test]
fn stages_run_in_strict_order() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let session = boot.run(&mut link, &mut broker, publish_once).unwrap();

    assert_eq!(
        boot.trail(),
        &[
            BootStage::Init,
            BootStage::LinkBringUp,
            BootStage::SignalQualityCheck,
            BootStage::ModeSwitch,
            BootStage::WaitConnected,
            BootStage::StartSession,
            BootStage::StartPublisher,
            BootStage::WaitDataReady,
            BootStage::Steady,
        ]
    );
    assert_eq!(
        link.calls,
        vec![
            LinkCall::Start,
            LinkCall::SimPinRequired,
            LinkCall::SignalQuality,
            LinkCall::EnterDataMode,
        ]
    );
    assert_eq!(session.state(), MqttState::Connected);
    assert!(gate.is_set(GateFlag::Connected));
    assert!(gate.is_set(GateFlag::DataReady));
    assert_eq!(broker.connects, 1);
}

#[test]
fn locked_sim_adds_unlock_stage() {
    let config = cellular_config(Some("1234"));
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.pin_required = true;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    boot.run(&mut link, &mut broker, publish_once).unwrap();

    assert_eq!(boot.trail()[2], BootStage::SimUnlock);
    assert_eq!(link.calls[2], LinkCall::UnlockSim("1234".into()));
}

#[test]
fn link_without_signal_report_still_boots() {
    let config = TrackerConfig {
        link: LinkConfig::Wifi {
            ssid: "HomeWiFi".try_into().unwrap(),
            password: "mysecret8".try_into().unwrap(),
        },
        ..TrackerConfig::default()
    };
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.signal = None;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    assert!(boot.run(&mut link, &mut broker, publish_once).is_ok());
    assert!(boot.trail().contains(&BootStage::SignalQualityCheck));
}

// ── SIM unlock ────────────────────────────────────────────────

#[test]
fn pin_retry_succeeds_on_second_attempt() {
    let config = cellular_config(Some("1234"));
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.pin_required = true;
    link.pin_rejections = 1;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    assert!(boot.run(&mut link, &mut broker, publish_once).is_ok());
    assert_eq!(link.unlock_attempts(), 2);
}

#[test]
fn pin_rejected_twice_is_fatal() {
    let config = cellular_config(Some("0000"));
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.pin_required = true;
    link.pin_rejections = 2;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();

    assert_eq!(err, BootError::Link(LinkError::PinRejected));
    assert_eq!(link.unlock_attempts(), 2);
    assert!(!link.calls.contains(&LinkCall::EnterDataMode));
    assert_eq!(boot.trail().last(), Some(&BootStage::SimUnlock));
    assert_eq!(broker.connects, 0);
}

#[test]
fn locked_sim_without_pin_is_fatal() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.pin_required = true;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();

    assert_eq!(err, BootError::Link(LinkError::PinRequired));
    assert_eq!(link.unlock_attempts(), 0);
}

// ── Fatal link / session errors ───────────────────────────────

#[test]
fn driver_start_failure_is_fatal() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.fail_start = true;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();

    assert_eq!(err, BootError::Link(LinkError::InitFailed));
    assert_eq!(link.calls, vec![LinkCall::Start]);
}

#[test]
fn mode_switch_failure_is_fatal() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.fail_mode_switch = true;
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();

    assert_eq!(err, BootError::Link(LinkError::ModeSwitchFailed));
    assert_eq!(boot.trail().last(), Some(&BootStage::ModeSwitch));
    assert!(!gate.is_set(GateFlag::Connected));
    assert_eq!(broker.connects, 0);
}

#[test]
fn transport_init_failure_is_fatal() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    let mut broker = MockConnector::new();
    broker.fail_init = true;

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();

    assert_eq!(err, BootError::Session(SessionError::TransportInit));
    assert_eq!(boot.trail().last(), Some(&BootStage::StartSession));
}

#[test]
fn publisher_spawn_failure_is_fatal() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    let mut broker = MockConnector::new();

    let mut boot = fast_boot(&config, &gate);
    let err = boot
        .run(&mut link, &mut broker, |_| Err(BootError::Spawn))
        .unwrap_err();

    assert_eq!(err, BootError::Spawn);
    assert_eq!(boot.trail().last(), Some(&BootStage::StartPublisher));
}

// ── Gate ordering ─────────────────────────────────────────────

#[test]
fn publisher_never_starts_before_connected() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.address_on_connect = false;
    let mut broker = MockConnector::new();

    let emitted = Arc::new(AtomicBool::new(false));
    let emitter = link.emitter();
    let late_address = {
        let emitted = Arc::clone(&emitted);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            emitted.store(true, Ordering::SeqCst);
            assert!(emitter.emit(LinkEvent::GotAddress(sample_ip())));
        })
    };

    let observed = Arc::new(Mutex::new(None));
    let mut boot = fast_boot(&config, &gate);
    {
        let observed = Arc::clone(&observed);
        let gate = Arc::clone(&gate);
        let emitted = Arc::clone(&emitted);
        boot.run(&mut link, &mut broker, move |session| {
            *observed.lock().unwrap() =
                Some((gate.is_set(GateFlag::Connected), emitted.load(Ordering::SeqCst)));
            publish_once(session)
        })
        .unwrap();
    }
    late_address.join().unwrap();

    assert_eq!(*observed.lock().unwrap(), Some((true, true)));
}

#[test]
fn lost_address_during_bring_up_does_not_block_it() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    let mut broker = MockConnector::new();
    let emitter = link.emitter();

    let mut boot = fast_boot(&config, &gate);
    boot.run(&mut link, &mut broker, move |session| {
        emitter.emit(LinkEvent::LostAddress);
        publish_once(session)
    })
    .unwrap();

    assert!(gate.is_set(GateFlag::Connected));
    assert_eq!(gate.address_losses(), 1);
}

// ── Cancellation ──────────────────────────────────────────────

#[test]
fn cancel_while_waiting_for_address() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    link.address_on_connect = false;
    let mut broker = MockConnector::new();

    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let mut boot = fast_boot(&config, &gate).with_cancel(cancel);
    let err = boot
        .run(&mut link, &mut broker, |_| panic!("publisher must not start"))
        .unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err, BootError::Cancelled);
    assert_eq!(boot.trail().last(), Some(&BootStage::WaitConnected));
    assert_eq!(broker.connects, 0);
}

#[test]
fn data_ready_requires_an_acknowledgement() {
    let config = cellular_config(None);
    let gate = Arc::new(ConnectivityGate::new());
    let mut link = MockLink::new();
    let mut broker = MockConnector::new();
    broker.acknowledge = false;

    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let mut boot = fast_boot(&config, &gate).with_cancel(cancel);
    let err = boot.run(&mut link, &mut broker, publish_once).unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err, BootError::Cancelled);
    assert_eq!(boot.trail().last(), Some(&BootStage::WaitDataReady));
    assert!(gate.is_set(GateFlag::Connected));
    assert!(!gate.is_set(GateFlag::DataReady));
    assert_eq!(broker.log.len(), 1);
}
