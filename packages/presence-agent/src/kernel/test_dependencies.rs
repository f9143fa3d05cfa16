// Test dependencies - mock implementations for testing
//
// Provides mock hardware and a mock relay transport that can be handed to the
// Supervisor (or to individual components) in tests. Every mock records its
// calls behind an Arc so a clone kept by the test sees what the agent did.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use relay_client::{AckRequest, ActionRequest, HeartbeatRequest, RelayError, StreamFrame};
use tokio::time::Instant;

use super::traits::{BaseCamera, BaseDigitalOutput, BaseHardware, BaseRelay, SensorSource};
use crate::error::{AgentError, DeviceError, ErrorKind};
use crate::types::Reading;

// =============================================================================
// Scripted Sensor
// =============================================================================

/// One scripted sensor result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Distance(u32),
    OutOfRange,
    Fail,
}

/// Sensor that replays a script, one sample per poll, then reports out of range.
#[derive(Clone, Default)]
pub struct ScriptedSensor {
    samples: Arc<Mutex<VecDeque<Sample>>>,
    polls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(samples.into_iter().collect())),
            ..Default::default()
        }
    }

    /// Script from raw distances; 0 means out of range.
    pub fn from_distances(distances: &[u32]) -> Self {
        Self::new(distances.iter().map(|d| match d {
            0 => Sample::OutOfRange,
            d => Sample::Distance(*d),
        }))
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for ScriptedSensor {
    async fn poll(&mut self) -> Reading {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let sample = self.samples.lock().unwrap().pop_front();
        match sample {
            Some(Sample::Distance(mm)) => Reading::measured(mm, now),
            Some(Sample::Fail) => Reading::failed(ErrorKind::SensorIoFailure, now),
            Some(Sample::OutOfRange) | None => Reading::out_of_range(now),
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording Output
// =============================================================================

/// Digital output that records every write.
#[derive(Clone)]
pub struct RecordingOutput {
    pin: u8,
    writes: Arc<Mutex<Vec<bool>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingOutput {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            writes: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    /// Last level written, `false` if never written.
    pub fn level(&self) -> bool {
        self.writes.lock().unwrap().last().copied().unwrap_or(false)
    }
}

impl BaseDigitalOutput for RecordingOutput {
    fn write(&self, high: bool) -> Result<(), DeviceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Io(format!("write to pin {} failed", self.pin)));
        }
        self.writes.lock().unwrap().push(high);
        Ok(())
    }

    fn pin(&self) -> u8 {
        self.pin
    }
}

// =============================================================================
// Mock Camera
// =============================================================================

#[derive(Clone, Default)]
pub struct MockCamera {
    busy: Arc<AtomicBool>,
    hang_stops: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another process holding the device.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Make `stop()` never return, like a capture process stuck on the device.
    pub fn set_stop_hangs(&self, hangs: bool) {
        self.hang_stops.store(hangs, Ordering::SeqCst);
    }

    /// The capture process died on its own.
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Successful starts only.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Stops that released a running camera.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseCamera for MockCamera {
    async fn start(&self) -> Result<(), DeviceError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(DeviceError::Busy("held by another process".into()));
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.hang_stops.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn is_running(&self) -> bool {
        MockCamera::is_running(self)
    }
}

// =============================================================================
// Mock Relay
// =============================================================================

/// What the next `open_command_stream` call does.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Connection refused.
    Refuse,
    /// Connect, deliver these frames, then drop the connection.
    Frames(Vec<StreamFrame>),
}

/// Relay transport that records outbound calls and replays scripted streams.
///
/// Once the stream script is exhausted, connections succeed and stay silent.
#[derive(Clone, Default)]
pub struct MockRelay {
    actions: Arc<Mutex<Vec<(String, ActionRequest, Instant)>>>,
    acks: Arc<Mutex<Vec<AckRequest>>>,
    heartbeats: Arc<Mutex<Vec<(HeartbeatRequest, Instant)>>>,
    action_attempts: Arc<Mutex<Vec<(String, Instant)>>>,
    connect_attempts: Arc<Mutex<Vec<Instant>>>,
    streams: Arc<Mutex<VecDeque<StreamScript>>>,
    fail_actions: Arc<AtomicU32>,
    fail_heartbeats: Arc<AtomicU32>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behaviour of the next command stream connection.
    pub fn with_stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    /// Fail the next `count` action POSTs with a 503.
    pub fn fail_next_actions(&self, count: u32) {
        self.fail_actions.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_heartbeats(&self, count: u32) {
        self.fail_heartbeats.store(count, Ordering::SeqCst);
    }

    /// Successfully delivered actions: (url, body, time).
    pub fn actions(&self) -> Vec<(String, ActionRequest, Instant)> {
        self.actions.lock().unwrap().clone()
    }

    /// Action names delivered to `url`, in order.
    pub fn action_names_for(&self, url: &str) -> Vec<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| u == url)
            .map(|(_, body, _)| body.action.clone())
            .collect()
    }

    /// Every action POST attempt, including failed ones.
    pub fn action_attempts(&self) -> Vec<(String, Instant)> {
        self.action_attempts.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<AckRequest> {
        self.acks.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> Vec<(HeartbeatRequest, Instant)> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.connect_attempts.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BaseRelay for MockRelay {
    async fn post_action(&self, url: &str, body: &ActionRequest) -> Result<(), RelayError> {
        let now = Instant::now();
        self.action_attempts
            .lock()
            .unwrap()
            .push((url.to_string(), now));

        if take_failure(&self.fail_actions) {
            return Err(RelayError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.actions
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone(), now));
        Ok(())
    }

    async fn post_ack(&self, _url: &str, body: &AckRequest) -> Result<(), RelayError> {
        self.acks.lock().unwrap().push(body.clone());
        Ok(())
    }

    async fn post_heartbeat(&self, _url: &str, body: &HeartbeatRequest) -> Result<(), RelayError> {
        if take_failure(&self.fail_heartbeats) {
            return Err(RelayError::Network("connection reset".into()));
        }
        self.heartbeats
            .lock()
            .unwrap()
            .push((body.clone(), Instant::now()));
        Ok(())
    }

    async fn open_command_stream(
        &self,
        _url: &str,
    ) -> Result<BoxStream<'static, Result<StreamFrame, RelayError>>, RelayError> {
        self.connect_attempts.lock().unwrap().push(Instant::now());

        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Refuse) => Err(RelayError::Network("connection refused".into())),
            Some(StreamScript::Frames(frames)) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

// =============================================================================
// Mock Hardware
// =============================================================================

/// Hardware whose every resource is a mock the test can inspect.
#[derive(Clone)]
pub struct MockHardware {
    pub sensor: ScriptedSensor,
    pub camera: MockCamera,
    outputs: Arc<Mutex<Vec<(String, RecordingOutput)>>>,
    failing_resource: Option<String>,
}

impl MockHardware {
    pub fn new(sensor: ScriptedSensor) -> Self {
        Self {
            sensor,
            camera: MockCamera::new(),
            outputs: Arc::new(Mutex::new(Vec::new())),
            failing_resource: None,
        }
    }

    /// Make acquisition of `resource` ("sensor", "camera" or an output name) fail.
    pub fn failing(mut self, resource: &str) -> Self {
        self.failing_resource = Some(resource.to_string());
        self
    }

    /// The output opened under `name`, if any.
    pub fn output(&self, name: &str) -> Option<RecordingOutput> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, output)| output.clone())
    }

    fn check(&self, resource: &str) -> Result<(), AgentError> {
        match &self.failing_resource {
            Some(failing) if failing == resource => {
                Err(AgentError::startup(resource, "device not found"))
            }
            _ => Ok(()),
        }
    }
}

impl BaseHardware for MockHardware {
    fn open_sensor(&self) -> Result<Box<dyn SensorSource>, AgentError> {
        self.check("sensor")?;
        Ok(Box::new(self.sensor.clone()))
    }

    fn open_output(&self, name: &str, pin: u8) -> Result<Arc<dyn BaseDigitalOutput>, AgentError> {
        self.check(name)?;
        let output = RecordingOutput::new(pin);
        self.outputs
            .lock()
            .unwrap()
            .push((name.to_string(), output.clone()));
        Ok(Arc::new(output))
    }

    fn open_camera(&self) -> Result<Option<Arc<dyn BaseCamera>>, AgentError> {
        self.check("camera")?;
        Ok(Some(Arc::new(self.camera.clone())))
    }
}
