//! Integration tests for SessionManager → TelemetryPublisher → broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use biketrack::adapters::stub_sensors::RandomTelemetrySource;
use biketrack::app::events::BrokerEvent;
use biketrack::app::ports::{Clock, MqttConnector, QoS, TelemetrySource};
use biketrack::app::publisher::{SampleOutcome, TelemetryPublisher};
use biketrack::app::session::{MqttState, PublishJob, SessionManager};
use biketrack::error::{PublishError, SessionError};
use biketrack::gate::{CancelToken, ConnectivityGate, GateFlag};
use biketrack::telemetry::{
    BatteryStatus, Location, TelemetrySample, UnixTime, MAX_CELLS, MAX_THERMISTORS, TOPIC_BATTERY,
    TOPIC_GPS,
};

use crate::mock_hw::{sample_ip, MockConnector};

const NOON_2024: UnixTime = 1_718_452_800; // 2024-06-15T12:00:00Z

struct FixedSource;

impl TelemetrySource for FixedSource {
    fn battery_status(&mut self) -> BatteryStatus {
        BatteryStatus {
            connected_cells: 4,
            soc: 87.5,
            timestamp: NOON_2024,
            no_idle_timestamp: NOON_2024 - 60,
            ..BatteryStatus::default()
        }
    }

    fn location(&mut self) -> Location {
        Location {
            latitude: 52.52,
            longitude: 13.405,
            timestamp: NOON_2024,
        }
    }
}

/// Virtual clock: sleeps jump straight to the deadline; cancels the run
/// after `cancel_after` sleeps.
struct VirtualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<usize>,
    cancel_after: usize,
    cancel: CancelToken,
}

impl VirtualClock {
    fn new(cancel_after: usize, cancel: &CancelToken) -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(0),
            cancel_after,
            cancel: cancel.clone(),
        }
    }
}

impl Clock for VirtualClock {
    fn monotonic(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep_until(&self, deadline: Duration) {
        let mut sleeps = self.sleeps.lock().unwrap();
        *sleeps += 1;
        if *sleeps >= self.cancel_after {
            self.cancel.cancel();
        }
        let mut now = self.now.lock().unwrap();
        *now = (*now).max(deadline);
    }

    fn unix_time(&self) -> UnixTime {
        NOON_2024
    }
}

fn connected_session(broker: &mut MockConnector) -> (Arc<ConnectivityGate>, Arc<SessionManager>) {
    let gate = Arc::new(ConnectivityGate::new());
    gate.on_event(biketrack::app::events::LinkEvent::GotAddress(sample_ip()));
    let session = Arc::new(SessionManager::new(Arc::clone(&gate)));
    session.start(broker, "mqtt://broker.test").unwrap();
    (gate, session)
}

fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

// ── Wire format ───────────────────────────────────────────────

#[test]
fn cycle_publishes_battery_then_location_at_qos1() {
    let mut broker = MockConnector::new();
    let (_gate, session) = connected_session(&mut broker);
    let cancel = CancelToken::new();
    let mut publisher = TelemetryPublisher::new(
        FixedSource,
        VirtualClock::new(1, &cancel),
        Arc::clone(&session),
        Duration::from_secs(10),
    );

    let outcomes = publisher.run_cycle();
    assert_eq!(
        outcomes,
        [SampleOutcome::Published(1), SampleOutcome::Published(2)]
    );

    let sent = broker.log.all();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].topic, TOPIC_BATTERY);
    assert_eq!(sent[1].topic, TOPIC_GPS);
    assert!(sent.iter().all(|p| p.qos == QoS::AtLeastOnce && !p.retain));

    let battery = json(&sent[0].payload);
    assert_eq!(battery["connected_cells"], 4);
    assert_eq!(battery["soc"], 87.5);
    assert_eq!(battery["cell_voltages"].as_array().unwrap().len(), MAX_CELLS);
    assert_eq!(battery["bat_temps"].as_array().unwrap().len(), MAX_THERMISTORS);
    assert_eq!(battery["timestamp"], "2024-06-15T12:00:00Z");
    assert_eq!(battery["no_idle_timestamp"], "2024-06-15T11:59:00Z");

    let location = json(&sent[1].payload);
    assert_eq!(location["latitude"].as_f64().unwrap() as f32, 52.52);
    assert_eq!(location["longitude"].as_f64().unwrap() as f32, 13.405);
    assert_eq!(location["timestamp"], "2024-06-15T12:00:00Z");
}

#[test]
fn stub_source_payloads_are_valid_json() {
    let mut broker = MockConnector::new();
    let (_gate, session) = connected_session(&mut broker);
    let cancel = CancelToken::new();
    let source = RandomTelemetrySource::with_os_rng(VirtualClock::new(1, &cancel));
    let mut publisher = TelemetryPublisher::new(
        source,
        VirtualClock::new(1, &cancel),
        session,
        Duration::from_secs(1),
    );

    for _ in 0..5 {
        publisher.run_cycle();
    }
    for p in broker.log.all() {
        let v = json(&p.payload);
        assert_eq!(v["timestamp"], "2024-06-15T12:00:00Z");
    }
    assert_eq!(publisher.stats().snapshot().published, 10);
}

// ── Failure handling ──────────────────────────────────────────

#[test]
fn publishes_fail_fast_until_broker_connects() {
    let mut broker = MockConnector::new();
    broker.connect_immediately = false;
    let (_gate, session) = connected_session(&mut broker);
    assert_eq!(session.state(), MqttState::Connecting);

    let cancel = CancelToken::new();
    let mut publisher = TelemetryPublisher::new(
        FixedSource,
        VirtualClock::new(1, &cancel),
        Arc::clone(&session),
        Duration::from_secs(10),
    );
    assert_eq!(
        publisher.run_cycle(),
        [SampleOutcome::Failed, SampleOutcome::Failed]
    );
    assert_eq!(broker.log.len(), 0);

    let stats = publisher.stats().snapshot();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.published, 0);
}

#[test]
fn disconnect_stops_publishing_and_reconnect_resumes() {
    let mut broker = MockConnector::new();
    let (gate, session) = connected_session(&mut broker);

    let job = || PublishJob::for_sample(&TelemetrySample::Location(Location::default())).unwrap();
    assert!(session.publish(job()).is_ok());
    assert!(gate.is_set(GateFlag::DataReady));

    // Simulate the broker dropping us by replaying the client's events
    // through a second session sharing the gate.
    let flaky = SessionManager::new(Arc::clone(&gate));
    let mut recorder = EventCapture::default();
    flaky.start(&mut recorder, "mqtt://broker.test").unwrap();
    recorder.emit(BrokerEvent::Connected);
    assert_eq!(flaky.state(), MqttState::Connected);
    recorder.emit(BrokerEvent::Disconnected);
    assert_eq!(flaky.state(), MqttState::Disconnected);
    assert_eq!(flaky.publish(job()), Err(PublishError::NotConnected));
    recorder.emit(BrokerEvent::Connected);
    assert!(flaky.publish(job()).is_ok());

    // DataReady is sticky across broker flaps.
    assert!(gate.is_set(GateFlag::DataReady));
}

#[test]
fn stopped_session_rejects_publish_and_can_restart() {
    let mut broker = MockConnector::new();
    let (_gate, session) = connected_session(&mut broker);
    assert_eq!(
        session.start(&mut broker, "mqtt://broker.test"),
        Err(SessionError::AlreadyStarted)
    );

    session.stop();
    assert_eq!(session.state(), MqttState::Uninitialized);
    let job = PublishJob::for_sample(&TelemetrySample::Location(Location::default())).unwrap();
    assert_eq!(session.publish(job), Err(PublishError::NotConnected));

    session.start(&mut broker, "mqtt://broker.test").unwrap();
    assert_eq!(session.state(), MqttState::Connected);
    assert_eq!(broker.connects, 2);
}

#[test]
fn concurrent_publishers_need_no_external_lock() {
    let mut broker = MockConnector::new();
    let (_gate, session) = connected_session(&mut broker);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let job = PublishJob::for_sample(&TelemetrySample::Location(
                        Location::default(),
                    ))
                    .unwrap();
                    session.publish(job).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(broker.log.len(), 100);
    assert_eq!(session.acknowledged(), 100);
}

// ── Run loop ──────────────────────────────────────────────────

#[test]
fn run_loop_stops_on_cancel_with_stats() {
    let mut broker = MockConnector::new();
    let (_gate, session) = connected_session(&mut broker);
    let cancel = CancelToken::new();
    let publisher = TelemetryPublisher::new(
        FixedSource,
        VirtualClock::new(3, &cancel),
        session,
        Duration::from_secs(10),
    );

    let stats = publisher.run(&cancel);
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.published, 6);
    assert_eq!(stats.overruns, 0);
    assert_eq!(
        broker.log.topics(),
        [TOPIC_BATTERY, TOPIC_GPS].repeat(3)
    );
}

// ── Helpers ───────────────────────────────────────────────────

/// Connector that never talks to anything; the test drives the
/// broker events by hand.
#[derive(Default)]
struct EventCapture {
    handler: Option<biketrack::app::events::BrokerEventHandler>,
}

impl EventCapture {
    fn emit(&self, event: BrokerEvent) {
        (self.handler.as_ref().unwrap())(event);
    }
}

struct NullClient;

impl biketrack::app::ports::MqttTransport for NullClient {
    fn publish(&self, _: &str, _: &[u8], _: QoS, _: bool) -> Result<u32, PublishError> {
        Ok(1)
    }
}

impl MqttConnector for EventCapture {
    fn connect(
        &mut self,
        _broker_uri: &str,
        on_event: biketrack::app::events::BrokerEventHandler,
    ) -> Result<Box<dyn biketrack::app::ports::MqttTransport>, SessionError> {
        self.handler = Some(on_event);
        Ok(Box::new(NullClient))
    }
}
