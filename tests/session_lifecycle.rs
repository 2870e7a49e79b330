use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spotter::{
    AnnotatedFrame, BoundingBox, Clock, CooldownPolicy, Detection, Detector, DisplaySink, Frame,
    FrameSource, InferenceResult, ManualClock, RetryPolicy, SessionConfig, SessionController,
    SessionError, SessionExit, SessionState, SourceStats, SpeechSink,
};

const WAIT_LIMIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct SourceLog {
    connects: AtomicUsize,
    releases: AtomicUsize,
    captured: AtomicU64,
    failing: AtomicBool,
    refuse_connect: AtomicBool,
    unplugged: AtomicBool,
}

/// Behaves like a capture device with a single stream: connecting while
/// already streaming fails, as a busy V4L2 node does.
struct FakeSource {
    source_log: Arc<SourceLog>,
    sequence: u64,
    streaming: bool,
}

impl FakeSource {
    fn new(source_log: Arc<SourceLog>) -> Self {
        Self {
            source_log,
            sequence: 0,
            streaming: false,
        }
    }
}

impl FrameSource for FakeSource {
    fn connect(&mut self) -> Result<()> {
        if self.source_log.refuse_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("no such device"));
        }
        if self.streaming {
            return Err(anyhow!("device or resource busy"));
        }
        self.streaming = true;
        self.source_log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.source_log.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("read timed out"));
        }
        self.sequence += 1;
        self.source_log.captured.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(RgbImage::new(16, 16), self.sequence))
    }

    fn is_healthy(&self) -> bool {
        self.streaming && !self.source_log.unplugged.load(Ordering::SeqCst)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.source_log.captured.load(Ordering::SeqCst),
            failures: 0,
            origin: "fake://camera".to_string(),
        }
    }

    fn release(&mut self) {
        self.streaming = false;
        self.source_log.releases.fetch_add(1, Ordering::SeqCst);
    }
}

type Script = Box<dyn FnMut(u64) -> Result<InferenceResult> + Send>;

struct FakeDetector {
    script: Script,
    calls: Arc<AtomicU64>,
    refuse_warm_up: bool,
}

impl FakeDetector {
    fn scripted(script: impl FnMut(u64) -> Result<InferenceResult> + Send + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Arc::new(AtomicU64::new(0)),
            refuse_warm_up: false,
        }
    }

    /// Reports a wheel at 0.9 on every frame.
    fn always_wheel() -> Self {
        Self::scripted(|_| Ok(wheel(0.9)))
    }
}

impl Detector for FakeDetector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn infer(&mut self, frame: &Frame, _confidence_threshold: f32) -> Result<InferenceResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(frame.sequence)
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.refuse_warm_up {
            return Err(anyhow!("model file missing"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Published {
    sequence: u64,
    alerted: bool,
    overlays: bool,
}

#[derive(Clone, Default)]
struct RecordingDisplay {
    frames: Arc<Mutex<Vec<Published>>>,
    releases: Arc<AtomicUsize>,
    broken: bool,
}

impl RecordingDisplay {
    fn published(&self) -> Vec<Published> {
        self.frames.lock().unwrap().clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn publish(&mut self, frame: AnnotatedFrame) -> Result<()> {
        if self.broken {
            return Err(anyhow!("window closed"));
        }
        self.frames.lock().unwrap().push(Published {
            sequence: frame.sequence,
            alerted: frame.alerted,
            overlays: frame.has_overlays(),
        });
        Ok(())
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct RecordingSpeech {
    clock: Arc<ManualClock>,
    spoken: Arc<Mutex<Vec<(Instant, String)>>>,
    releases: Arc<AtomicUsize>,
    broken: bool,
}

impl RecordingSpeech {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            spoken: Arc::default(),
            releases: Arc::default(),
            broken: false,
        }
    }

    fn spoken(&self) -> Vec<(Instant, String)> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechSink for RecordingSpeech {
    fn announce(&mut self, text: &str) -> Result<()> {
        if self.broken {
            return Err(anyhow!("audio device busy"));
        }
        self.spoken
            .lock()
            .unwrap()
            .push((self.clock.now(), text.to_string()));
        Ok(())
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn wheel(confidence: f32) -> InferenceResult {
    InferenceResult::new(vec![Detection::new(
        "wheel",
        confidence,
        BoundingBox::new(2.0, 2.0, 10.0, 10.0),
    )])
}

fn test_config() -> SessionConfig {
    SessionConfig {
        target_label: "wheel".to_string(),
        confidence_threshold: 0.25,
        cooldown: Duration::from_secs(5),
        min_iteration_spacing: Duration::from_millis(100),
        cooldown_policy: CooldownPolicy::Annotate,
        cooldown_poll: Duration::from_secs(1),
        alert_message: "Wheel detected".to_string(),
        retry: RetryPolicy {
            max_consecutive_failures: 2,
            backoff: Duration::from_millis(10),
        },
    }
}

struct Rig {
    controller: SessionController,
    clock: Arc<ManualClock>,
    source_log: Arc<SourceLog>,
    display: RecordingDisplay,
    speech: RecordingSpeech,
}

fn rig_with(config: SessionConfig, detector: FakeDetector, display: RecordingDisplay) -> Rig {
    let clock = Arc::new(ManualClock::new());
    let source_log = Arc::new(SourceLog::default());
    let speech = RecordingSpeech::new(clock.clone());
    let controller = SessionController::new(
        config,
        FakeSource::new(source_log.clone()),
        detector,
        display.clone(),
        speech.clone(),
    )
    .with_clock(clock.clone());
    Rig {
        controller,
        clock,
        source_log,
        display,
        speech,
    }
}

fn rig(detector: FakeDetector) -> Rig {
    rig_with(test_config(), detector, RecordingDisplay::default())
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn second_start_is_rejected_while_running() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    assert_eq!(rig.controller.state(), SessionState::Running);
    assert_eq!(rig.controller.start(), Err(SessionError::AlreadyRunning));
    assert_eq!(rig.controller.start(), Err(SessionError::AlreadyRunning));

    wait_until("frames", || rig.controller.stats().frames_processed >= 5);
    rig.controller.stop().unwrap();

    let stats = rig.controller.stats();
    assert_eq!(stats.max_active_workers, 1);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(rig.source_log.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_joins_worker_before_returning() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    wait_until("frames", || rig.display.published().len() >= 5);
    rig.controller.stop().unwrap();

    assert_eq!(rig.controller.state(), SessionState::Idle);
    assert_eq!(rig.controller.last_exit(), Some(SessionExit::Stopped));
    let published = rig.display.published().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.display.published().len(), published);
}

#[test]
fn shutdown_releases_resources_exactly_once() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 3);
    rig.controller.shutdown();
    rig.controller.shutdown();

    assert_eq!(rig.controller.state(), SessionState::Idle);
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 1);
    assert_eq!(rig.display.releases.load(Ordering::SeqCst), 1);
    assert_eq!(rig.speech.releases.load(Ordering::SeqCst), 1);
    assert_eq!(rig.controller.start(), Err(SessionError::ShutDown));

    drop(rig.controller);
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_while_running_stops_and_releases() {
    let rig = rig(FakeDetector::always_wheel());
    let Rig {
        mut controller,
        source_log,
        display,
        ..
    } = rig;

    controller.start().unwrap();
    wait_until("frames", || controller.stats().frames_processed >= 2);
    drop(controller);

    assert_eq!(source_log.releases.load(Ordering::SeqCst), 1);
    assert_eq!(display.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_when_idle_is_not_running() {
    let mut rig = rig(FakeDetector::always_wheel());
    assert_eq!(rig.controller.stop(), Err(SessionError::NotRunning));

    rig.controller.start().unwrap();
    rig.controller.stop().unwrap();
    assert_eq!(rig.controller.stop(), Err(SessionError::NotRunning));
}

#[test]
fn unavailable_source_keeps_session_idle() {
    let mut rig = rig(FakeDetector::always_wheel());
    rig.source_log.refuse_connect.store(true, Ordering::SeqCst);

    let err = rig.controller.start().unwrap_err();
    assert!(matches!(err, SessionError::SourceUnavailable(_)), "{:?}", err);
    assert_eq!(rig.controller.state(), SessionState::Idle);
    assert_eq!(rig.controller.stats().max_active_workers, 0);
    assert!(rig.display.published().is_empty());

    // The device came back.
    rig.source_log.refuse_connect.store(false, Ordering::SeqCst);
    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 1);
    rig.controller.stop().unwrap();
}

#[test]
fn warm_up_failure_is_detector_unavailable() {
    let mut detector = FakeDetector::always_wheel();
    detector.refuse_warm_up = true;
    let mut rig = rig(detector);

    let err = rig.controller.start().unwrap_err();
    assert!(matches!(err, SessionError::DetectorUnavailable(_)), "{:?}", err);
    assert_eq!(rig.controller.state(), SessionState::Idle);
    assert_eq!(rig.source_log.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn alerts_respect_cooldown_while_frames_keep_flowing() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    wait_until("virtual time", || rig.clock.elapsed() >= Duration::from_secs(12));
    rig.controller.stop().unwrap();

    let spoken = rig.speech.spoken();
    assert!(spoken.len() >= 2, "expected repeated alerts, got {}", spoken.len());
    for pair in spoken.windows(2) {
        let gap = pair[1].0.duration_since(pair[0].0);
        assert!(gap >= Duration::from_secs(5), "alerts {:?} apart", gap);
    }
    assert!(spoken.iter().all(|(_, text)| text == "Wheel detected"));

    let published = rig.display.published();
    let alerted = published.iter().filter(|p| p.alerted).count();
    assert_eq!(alerted, spoken.len());
    assert!(published.len() > spoken.len() * 10);
    // Frames inside the cooldown still carry their boxes.
    assert!(published.iter().filter(|p| !p.alerted).all(|p| p.overlays));
    assert_eq!(rig.controller.stats().alerts_fired, spoken.len() as u64);
}

#[test]
fn quick_restart_does_not_reannounce() {
    let config = SessionConfig {
        cooldown: Duration::from_secs(600),
        ..test_config()
    };
    let mut rig = rig_with(config, FakeDetector::always_wheel(), RecordingDisplay::default());

    rig.controller.start().unwrap();
    wait_until("first alert", || !rig.speech.spoken().is_empty());
    rig.controller.stop().unwrap();

    rig.controller.start().unwrap();
    let frames = rig.controller.stats().frames_processed;
    wait_until("frames", || rig.controller.stats().frames_processed >= frames + 5);
    rig.controller.stop().unwrap();

    assert!(rig.clock.elapsed() < Duration::from_secs(600));
    assert_eq!(rig.speech.spoken().len(), 1);
}

#[test]
fn below_threshold_and_other_labels_never_alert() {
    let detector = FakeDetector::scripted(|sequence| {
        Ok(InferenceResult::new(vec![
            Detection::new("wheel", 0.2, BoundingBox::new(0.0, 0.0, 4.0, 4.0)),
            Detection::new(
                "tire",
                0.99,
                BoundingBox::new(4.0, 4.0, 8.0, 8.0 + (sequence % 2) as f32),
            ),
        ]))
    });
    let mut rig = rig(detector);

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 20);
    rig.controller.stop().unwrap();

    assert!(rig.speech.spoken().is_empty());
    assert!(rig.display.published().iter().all(|p| !p.alerted));
}

#[test]
fn skip_frames_policy_pauses_inference_during_cooldown() {
    let detector = FakeDetector::always_wheel();
    let infer_calls = detector.calls.clone();
    let config = SessionConfig {
        cooldown_policy: CooldownPolicy::SkipFrames,
        ..test_config()
    };
    let mut rig = rig_with(config, detector, RecordingDisplay::default());

    rig.controller.start().unwrap();
    wait_until("virtual time", || rig.clock.elapsed() >= Duration::from_secs(12));
    rig.controller.stop().unwrap();

    let spoken = rig.speech.spoken();
    assert!(spoken.len() >= 2);
    for pair in spoken.windows(2) {
        assert!(pair[1].0.duration_since(pair[0].0) >= Duration::from_secs(5));
    }
    let inferred = infer_calls.load(Ordering::SeqCst);
    let captured = rig.source_log.captured.load(Ordering::SeqCst);
    // Every inference on an always-present target fires, so nothing is
    // inferred inside a cooldown window.
    assert_eq!(inferred, spoken.len() as u64);
    assert!(captured > inferred);
    assert_eq!(rig.display.published().len() as u64, inferred);
}

#[test]
fn lost_source_ends_session_and_allows_restart() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 3);
    rig.source_log.failing.store(true, Ordering::SeqCst);
    wait_until("idle", || rig.controller.state() == SessionState::Idle);

    match rig.controller.last_exit() {
        Some(SessionExit::SourceLost(reason)) => assert!(reason.contains("read timed out")),
        other => panic!("unexpected exit {:?}", other),
    }
    // max_consecutive_failures = 2 tolerated, the third ends the session.
    assert_eq!(rig.controller.stats().source_failures, 3);
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 1);

    rig.source_log.failing.store(false, Ordering::SeqCst);
    let frames = rig.controller.stats().frames_processed;
    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= frames + 3);
    rig.controller.stop().unwrap();
    assert_eq!(rig.source_log.connects.load(Ordering::SeqCst), 2);
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 2);
    assert_eq!(rig.controller.stats().max_active_workers, 1);
}

#[test]
fn restart_after_stop_reopens_the_source() {
    let mut rig = rig(FakeDetector::always_wheel());

    for round in 1..=3 {
        rig.controller.start().unwrap();
        wait_until("frames", || rig.controller.stats().frames_processed >= round * 2);
        rig.controller.stop().unwrap();
        assert_eq!(rig.source_log.connects.load(Ordering::SeqCst), round as usize);
        assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), round as usize);
    }

    rig.controller.shutdown();
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 3);
    assert_eq!(rig.display.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn unhealthy_source_ends_session_without_retrying() {
    let mut rig = rig(FakeDetector::always_wheel());

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 2);
    rig.source_log.unplugged.store(true, Ordering::SeqCst);
    wait_until("idle", || rig.controller.state() == SessionState::Idle);

    match rig.controller.last_exit() {
        Some(SessionExit::SourceLost(reason)) => assert!(reason.contains("fake://camera")),
        other => panic!("unexpected exit {:?}", other),
    }
    assert_eq!(rig.controller.stats().source_failures, 0);
    assert_eq!(rig.source_log.releases.load(Ordering::SeqCst), 1);

    rig.source_log.unplugged.store(false, Ordering::SeqCst);
    rig.controller.start().unwrap();
    assert!(rig.controller.is_running());
    rig.controller.stop().unwrap();
}

#[test]
fn source_stats_follow_captures() {
    let mut rig = rig(FakeDetector::always_wheel());
    assert!(rig.controller.source_stats().is_none());

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 4);
    rig.controller.stop().unwrap();

    let stats = rig.controller.source_stats().expect("source stats");
    assert_eq!(stats.origin, "fake://camera");
    assert_eq!(stats.frames_captured, rig.source_log.captured.load(Ordering::SeqCst));
    assert!(stats.frames_captured >= 4);
}

#[test]
fn transient_capture_failures_are_retried() {
    let config = SessionConfig {
        retry: RetryPolicy {
            max_consecutive_failures: u32::MAX,
            backoff: Duration::from_millis(10),
        },
        ..test_config()
    };
    let mut rig = rig_with(config, FakeDetector::always_wheel(), RecordingDisplay::default());
    rig.source_log.failing.store(true, Ordering::SeqCst);

    rig.controller.start().unwrap();
    wait_until("a failure", || rig.controller.stats().source_failures >= 1);
    rig.source_log.failing.store(false, Ordering::SeqCst);
    wait_until("frames", || rig.controller.stats().frames_processed >= 3);

    assert!(rig.controller.is_running());
    rig.controller.stop().unwrap();
}

#[test]
fn sink_failures_do_not_end_the_session() {
    let clock = Arc::new(ManualClock::new());
    let source_log = Arc::new(SourceLog::default());
    let display = RecordingDisplay {
        broken: true,
        ..RecordingDisplay::default()
    };
    let mut speech = RecordingSpeech::new(clock.clone());
    speech.broken = true;
    let mut controller = SessionController::new(
        test_config(),
        FakeSource::new(source_log.clone()),
        FakeDetector::always_wheel(),
        display,
        speech,
    )
    .with_clock(clock.clone());

    controller.start().unwrap();
    wait_until("virtual time", || clock.elapsed() >= Duration::from_secs(6));
    assert!(controller.is_running());
    controller.stop().unwrap();

    let stats = controller.stats();
    let windows = clock.elapsed().as_secs() / 5 + 1;
    assert!(stats.frames_processed >= 10);
    // Alert state advances even when speaking fails, so the cooldown still holds.
    assert!(stats.alerts_fired >= 1 && stats.alerts_fired <= windows);
    assert!(stats.sink_failures >= stats.frames_processed);
}

#[test]
fn detector_errors_drop_the_frame_only() {
    let detector = FakeDetector::scripted(|sequence| {
        if sequence % 2 == 0 {
            Err(anyhow!("inference backend hiccup"))
        } else {
            Ok(InferenceResult::empty())
        }
    });
    let mut rig = rig(detector);

    rig.controller.start().unwrap();
    wait_until("frames", || rig.controller.stats().frames_processed >= 5);
    rig.controller.stop().unwrap();

    let stats = rig.controller.stats();
    assert!(stats.detector_failures >= 4);
    assert!(rig
        .display
        .published()
        .iter()
        .all(|p| p.sequence % 2 == 1 && !p.overlays));
}

#[test]
fn worker_panic_is_reported() {
    let detector = FakeDetector::scripted(|sequence| {
        if sequence == 3 {
            panic!("detector bug");
        }
        Ok(InferenceResult::empty())
    });
    let mut rig = rig(detector);

    rig.controller.start().unwrap();
    wait_until("idle", || rig.controller.state() == SessionState::Idle);

    assert_eq!(rig.controller.stop(), Err(SessionError::WorkerPanicked));
    assert_eq!(rig.controller.start(), Err(SessionError::WorkerPanicked));
    assert_eq!(rig.controller.stats().active_workers, 0);
    rig.controller.shutdown();
}
