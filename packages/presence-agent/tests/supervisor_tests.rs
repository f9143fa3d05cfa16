//! End-to-end tests: a full Supervisor over mock hardware and a mock relay,
//! driven on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use presence_agent::kernel::{MockHardware, MockRelay, Sample, ScriptedSensor, StreamScript};
use presence_agent::supervisor::ExitReason;
use presence_agent::{Config, ErrorKind, Supervisor};
use relay_client::{AckStatus, StreamFrame};
use tokio::time::Instant;

const WEBHOOK: &str = "https://relay.local:4173/api/camera";
const STREAM: &str = "https://relay.local:4173/api/turnstile";
const ACK: &str = "https://relay.local:4173/api/ack";

fn config(extra: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("DEVICE_NAME", "device1"),
        ("ACTION_WEBHOOK_URLS", WEBHOOK),
        ("THRESHOLD_MM", "400"),
        ("HOLD_DURATION_MS", "1000"),
        ("POLL_INTERVAL_MS", "100"),
        ("LED_PIN", "17"),
        ("SOLENOID_PIN", "27"),
    ];
    vars.extend_from_slice(extra);
    Config::from_lookup(|key| {
        vars.iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap()
}

fn command_frame(request_id: &str, action: &str, device: &str) -> StreamFrame {
    StreamFrame {
        kind: Some("command".into()),
        request_id: Some(request_id.into()),
        action: Some(action.into()),
        device: Some(device.into()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn presence_sequence_drives_actuators_and_webhook() {
    let sensor = ScriptedSensor::from_distances(&[0, 350, 350]);
    let hardware = MockHardware::new(sensor.clone());
    let relay = MockRelay::new();

    let supervisor =
        Supervisor::start(&config(&[]), &hardware, Arc::new(relay.clone())).unwrap();
    let cleanup = supervisor.cleanup();

    let started = Instant::now();
    let report = supervisor
        .run(tokio::time::sleep(Duration::from_millis(3_000)))
        .await;

    assert_eq!(report.reason, ExitReason::Shutdown);
    assert!(report.abandoned.is_empty());

    let actions: Vec<(String, Duration)> = relay
        .actions()
        .into_iter()
        .map(|(_, body, at)| (body.action, at.duration_since(started)))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("start_camera".to_string(), Duration::from_millis(100)),
            // last qualifying reading at 200ms; first tick past the 1000ms hold
            ("stop_camera".to_string(), Duration::from_millis(1_300)),
        ]
    );
    assert!(relay
        .actions()
        .iter()
        .all(|(url, body, _)| url == WEBHOOK && body.device == "device1"));

    // on, off, then the unconditional safe-state write at shutdown
    let led = hardware.output("led").unwrap();
    assert_eq!(led.writes(), vec![true, false, false]);
    assert_eq!(hardware.camera.start_count(), 1);
    assert_eq!(hardware.camera.stop_count(), 1);

    assert!(cleanup.has_run());
    assert!(!cleanup.run().await);
    assert_eq!(sensor.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn sensor_failures_never_stop_the_loop() {
    let sensor = ScriptedSensor::new([
        Sample::Fail,
        Sample::Distance(300),
        Sample::Fail,
        Sample::Fail,
        Sample::Distance(310),
    ]);
    let hardware = MockHardware::new(sensor.clone());
    let relay = MockRelay::new();

    let supervisor =
        Supervisor::start(&config(&[]), &hardware, Arc::new(relay.clone())).unwrap();
    supervisor
        .run(tokio::time::sleep(Duration::from_millis(1_000)))
        .await;

    // Failures inside the hold window do not end presence
    assert_eq!(relay.action_names_for(WEBHOOK), vec!["start_camera"]);
    assert!(sensor.poll_count() >= 10);
}

#[tokio::test(start_paused = true)]
async fn failed_webhook_does_not_roll_back_actuators() {
    let sensor = ScriptedSensor::from_distances(&[300]);
    let hardware = MockHardware::new(sensor);
    let relay = MockRelay::new();
    relay.fail_next_actions(100);

    let supervisor =
        Supervisor::start(&config(&[]), &hardware, Arc::new(relay.clone())).unwrap();
    let actuators = supervisor.actuators();

    let observed = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        actuators.camera_on()
    });
    supervisor
        .run(tokio::time::sleep(Duration::from_millis(800)))
        .await;

    assert!(observed.await.unwrap());
    assert!(relay.actions().is_empty());
    assert!(relay.action_attempts().len() >= 1);
}

#[tokio::test(start_paused = true)]
async fn remote_commands_are_filtered_deduplicated_and_acknowledged() {
    let relay = MockRelay::new().with_stream(StreamScript::Frames(vec![
        StreamFrame {
            kind: Some("connected".into()),
            ..Default::default()
        },
        command_frame("r1", "start_camera", "device1"),
        command_frame("r1", "start_camera", "device1"),
        command_frame("r2", "stop_camera", "device2"),
        command_frame("r3", "reboot", "device1"),
    ]));
    let hardware = MockHardware::new(ScriptedSensor::new([]));

    let supervisor = Supervisor::start(
        &config(&[("COMMAND_STREAM_URL", STREAM), ("ACK_URL", ACK)]),
        &hardware,
        Arc::new(relay.clone()),
    )
    .unwrap();
    let actuators = supervisor.actuators();

    let camera_during_run = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        actuators.camera_on()
    });
    supervisor
        .run(tokio::time::sleep(Duration::from_secs(2)))
        .await;

    assert!(camera_during_run.await.unwrap());
    assert_eq!(hardware.camera.start_count(), 1);

    let acks = relay.acks();
    let ids: Vec<&str> = acks.iter().map(|a| a.request_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r1", "r3"]);
    assert_eq!(acks[0].status, AckStatus::Executed);
    assert_eq!(acks[0].message, acks[1].message);
    assert_eq!(acks[2].status, AckStatus::Failed);
    assert!(acks.iter().all(|a| a.device_id == "device1"));

    // device2's stop never reached the camera; only cleanup stopped it
    assert_eq!(hardware.camera.stop_count(), 1);
    assert!(!hardware.camera.is_running());
}

#[tokio::test(start_paused = true)]
async fn stream_drop_is_reconnected() {
    let relay = MockRelay::new()
        .with_stream(StreamScript::Refuse)
        .with_stream(StreamScript::Frames(vec![]))
        .with_stream(StreamScript::Frames(vec![command_frame("r1", "unlock", "all")]));
    let hardware = MockHardware::new(ScriptedSensor::new([]));

    let supervisor = Supervisor::start(
        &config(&[("COMMAND_STREAM_URL", STREAM), ("UNLOCK_DURATION_MS", "3000")]),
        &hardware,
        Arc::new(relay.clone()),
    )
    .unwrap();
    supervisor
        .run(tokio::time::sleep(Duration::from_secs(10)))
        .await;

    let started = relay.connect_attempts()[0];
    let offsets: Vec<u64> = relay
        .connect_attempts()
        .iter()
        .map(|at| at.duration_since(started).as_secs())
        .collect();
    // refused (1s), an empty stream does not reset (2s), a stream with a frame does (1s)
    assert_eq!(offsets, vec![0, 1, 3, 4]);

    // The unlock energised the solenoid, and the pulse released it 3s later
    let solenoid = hardware.output("solenoid").unwrap();
    assert_eq!(&solenoid.writes()[..2], &[true, false]);
}

#[test]
fn startup_fails_when_an_output_is_missing() {
    let hardware = MockHardware::new(ScriptedSensor::new([])).failing("led");

    let err = Supervisor::start(&config(&[]), &hardware, Arc::new(MockRelay::new()))
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::StartupResourceFailure);
    assert!(err.to_string().contains("led"));
    assert_eq!(hardware.sensor.close_count(), 1);
}
