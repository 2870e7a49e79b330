//! Detection session controller.
//!
//! A `SessionController` owns the frame source, detector, annotator and sinks,
//! and runs the capture → infer → debounce → annotate → publish loop on a
//! single background thread.
//!
//! State machine:
//!
//! ```text
//! Idle --start()--> Running --stop()--> Stopping --(loop exits)--> Idle
//!                   Running --(source lost)------------------------> Idle
//! ```
//!
//! - At most one worker exists at a time; `start` while not `Idle` is rejected.
//! - `stop` blocks until the worker has been joined, so nothing is published
//!   after it returns and resource release never races an iteration.
//! - Each session releases the frame source when its loop ends, so the next
//!   `start` reconnects a closed device.
//! - Cancellation is cooperative: the worker checks the stop signal at the top
//!   of every iteration and while pacing, never mid-iteration.

mod cancel;
mod clock;
mod error;
mod worker;

use serde::Deserialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::AlertState;
use crate::annotate::Annotator;
use crate::detect::Detector;
use crate::ingest::{FrameSource, SourceStats};
use crate::sink::{DisplaySink, SpeechSink};

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SessionError;

use worker::{Resources, Worker};

/// What the loop does while the alert cooldown is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// Keep inferring and publishing annotated frames; only announcements are suppressed.
    #[default]
    Annotate,
    /// Discard captured frames without inference or publication until the
    /// cooldown ends, checking every `cooldown_poll`.
    SkipFrames,
}

/// How the loop reacts to capture failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures in a row tolerated before the session ends with `SourceLost`.
    pub max_consecutive_failures: u32,
    pub backoff: Duration,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub target_label: String,
    pub confidence_threshold: f32,
    pub cooldown: Duration,
    /// Minimum time between the starts of two iterations.
    pub min_iteration_spacing: Duration,
    pub cooldown_policy: CooldownPolicy,
    pub cooldown_poll: Duration,
    pub alert_message: String,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        crate::config::SpotterConfig::default().session()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// Why the most recent session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionExit {
    Stopped,
    SourceLost(String),
}

impl SessionExit {
    /// The lost-source condition as an error value, if any.
    pub fn as_error(&self) -> Option<SessionError> {
        match self {
            SessionExit::Stopped => None,
            SessionExit::SourceLost(reason) => Some(SessionError::SourceLost(reason.clone())),
        }
    }
}

/// Counters snapshot, cumulative over the controller's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub alerts_fired: u64,
    pub source_failures: u64,
    pub detector_failures: u64,
    pub sink_failures: u64,
    pub active_workers: usize,
    /// Highest number of loops ever observed running at once.
    pub max_active_workers: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub frames_processed: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub source_failures: AtomicU64,
    pub detector_failures: AtomicU64,
    pub sink_failures: AtomicU64,
    pub active_workers: AtomicUsize,
    pub max_active_workers: AtomicUsize,
}

/// State shared between the controller and its worker.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    last_exit: Mutex<Option<SessionExit>>,
    source_stats: Mutex<Option<SourceStats>>,
    pub counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            last_exit: Mutex::new(None),
            source_stats: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move `from -> to` atomically. Returns the state observed before.
    fn transition(&self, from: SessionState, to: SessionState) -> SessionState {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *guard;
        if previous == from {
            *guard = to;
        }
        previous
    }

    pub fn set_last_exit(&self, exit: SessionExit) {
        *self.last_exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit);
    }

    fn last_exit(&self) -> Option<SessionExit> {
        self.last_exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_source_stats(&self, stats: SourceStats) {
        *self
            .source_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stats);
    }

    fn source_stats(&self) -> Option<SourceStats> {
        self.source_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stats(&self) -> SessionStats {
        let c = &self.counters;
        SessionStats {
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            alerts_fired: c.alerts_fired.load(Ordering::Relaxed),
            source_failures: c.source_failures.load(Ordering::Relaxed),
            detector_failures: c.detector_failures.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
            active_workers: c.active_workers.load(Ordering::SeqCst),
            max_active_workers: c.max_active_workers.load(Ordering::SeqCst),
        }
    }
}

struct WorkerHandle {
    cancel: CancelHandle,
    join: JoinHandle<Resources>,
}

/// Start/stop control surface for detection sessions.
///
/// All control methods take `&mut self`: the controller is meant to be owned
/// by the foreground thread. Only the worker runs on another thread.
pub struct SessionController {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    resources: Option<Resources>,
    worker: Option<WorkerHandle>,
    resources_lost: bool,
    shut_down: bool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        source: impl FrameSource + 'static,
        detector: impl Detector + 'static,
        display: impl DisplaySink + 'static,
        speech: impl SpeechSink + 'static,
    ) -> Self {
        let alert = AlertState::new(config.cooldown);
        Self {
            config,
            clock: Arc::new(SystemClock),
            shared: Arc::new(Shared::new()),
            resources: Some(Resources {
                source: Box::new(source),
                detector: Box::new(detector),
                display: Box::new(display),
                speech: Box::new(speech),
                annotator: Annotator::new(),
                alert,
                warmed_up: false,
                source_connected: false,
            }),
            worker: None,
            resources_lost: false,
            shut_down: false,
        }
    }

    /// Replace the time source (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        if let Some(resources) = self.resources.as_mut() {
            resources.annotator = annotator;
        }
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Why the most recent session ended; `None` before the first one ends.
    pub fn last_exit(&self) -> Option<SessionExit> {
        self.shared.last_exit()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Frame source counters as of the last capture; `None` before the first start.
    pub fn source_stats(&self) -> Option<SourceStats> {
        self.shared.source_stats()
    }

    /// Start a session: `Idle -> Running`.
    ///
    /// The source is connected (and the detector warmed up on first use) on
    /// the calling thread, so those failures are returned here rather than
    /// surfacing inside the loop.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.shut_down {
            return Err(SessionError::ShutDown);
        }
        self.reap_finished()?;
        if self.state() != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }
        let mut resources = match self.resources.take() {
            Some(resources) => resources,
            None if self.resources_lost => return Err(SessionError::WorkerPanicked),
            None => return Err(SessionError::ShutDown),
        };

        if !resources.warmed_up {
            if let Err(err) = resources.detector.warm_up() {
                self.resources = Some(resources);
                return Err(SessionError::DetectorUnavailable(format!("{:#}", err)));
            }
            resources.warmed_up = true;
        }
        if let Err(err) = resources.source.connect() {
            log::error!("Camera not detected or cannot be opened: {:#}", err);
            self.resources = Some(resources);
            return Err(SessionError::SourceUnavailable(format!("{:#}", err)));
        }
        resources.source_connected = true;
        self.shared.set_source_stats(resources.source.stats());

        let detector_name = resources.detector.name();
        let (cancel, token) = cancel_pair();
        let worker = Worker {
            config: self.config.clone(),
            clock: self.clock.clone(),
            cancel: token,
            shared: self.shared.clone(),
        };
        self.shared.set_state(SessionState::Running);
        let spawned = std::thread::Builder::new()
            .name("spotter-session".to_string())
            .spawn(move || worker.run(resources));
        match spawned {
            Ok(join) => {
                self.worker = Some(WorkerHandle { cancel, join });
                log::info!(
                    "session started (target={}, threshold={:.2}, cooldown={:?}, detector={})",
                    self.config.target_label,
                    self.config.confidence_threshold,
                    self.config.cooldown,
                    detector_name
                );
                Ok(())
            }
            Err(err) => {
                self.shared.set_state(SessionState::Idle);
                self.resources_lost = true;
                Err(SessionError::Spawn(err.to_string()))
            }
        }
    }

    /// Stop the running session and wait for the worker to exit.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let previous = self
            .shared
            .transition(SessionState::Running, SessionState::Stopping);
        if previous == SessionState::Idle {
            // The loop may have ended on its own; collect it before reporting.
            self.reap_finished()?;
            return Err(SessionError::NotRunning);
        }
        let Some(worker) = self.worker.take() else {
            self.shared.set_state(SessionState::Idle);
            return Err(SessionError::NotRunning);
        };
        log::info!("stopping session");
        let joined = self.join_worker(worker);
        self.shared.set_state(SessionState::Idle);
        joined
    }

    /// Stop if running, then release the sinks and drop the detector.
    ///
    /// The frame source is released by each session as it ends, so here it is
    /// only released if a connect was never followed by a session.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        match self.stop() {
            Ok(()) | Err(SessionError::NotRunning) => {}
            Err(err) => log::warn!("session stop during shutdown failed: {}", err),
        }
        if let Some(mut resources) = self.resources.take() {
            if resources.source_connected {
                resources.source.release();
            }
            resources.display.release();
            resources.speech.release();
            log::info!("session resources released");
        }
        self.shut_down = true;
    }

    /// Join a worker that has already marked the session idle.
    fn reap_finished(&mut self) -> Result<(), SessionError> {
        if self.state() != SessionState::Idle {
            return Ok(());
        }
        match self.worker.take() {
            Some(worker) => self.join_worker(worker),
            None => Ok(()),
        }
    }

    fn join_worker(&mut self, worker: WorkerHandle) -> Result<(), SessionError> {
        let WorkerHandle { mut cancel, join } = worker;
        cancel.cancel();
        match join.join() {
            Ok(resources) => {
                self.resources = Some(resources);
                Ok(())
            }
            Err(_) => {
                log::error!("session worker panicked");
                self.resources_lost = true;
                Err(SessionError::WorkerPanicked)
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
