//! The detect-annotate-alert loop run on the session worker thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::cancel::CancelToken;
use super::clock::Clock;
use super::{CooldownPolicy, SessionConfig, SessionExit, SessionState, Shared};
use crate::alert::{should_alert, AlertState};
use crate::annotate::Annotator;
use crate::detect::Detector;
use crate::ingest::FrameSource;
use crate::sink::{DisplaySink, SpeechSink};

/// Everything a session owns. Moved onto the worker at start and handed back
/// through the join handle when the loop exits.
pub(crate) struct Resources {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub display: Box<dyn DisplaySink>,
    pub speech: Box<dyn SpeechSink>,
    pub annotator: Annotator,
    /// Kept across sessions so a quick restart does not re-announce.
    pub alert: AlertState,
    pub warmed_up: bool,
    /// Set by a successful `connect`, cleared when the session releases the source.
    pub source_connected: bool,
}

pub(crate) struct Worker {
    pub config: SessionConfig,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelToken,
    pub shared: Arc<Shared>,
}

/// Marks the worker inactive and the session idle, even on panic.
struct ExitGuard<'a> {
    shared: &'a Shared,
}

impl<'a> ExitGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let active = shared.counters.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        shared
            .counters
            .max_active_workers
            .fetch_max(active, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .counters
            .active_workers
            .fetch_sub(1, Ordering::SeqCst);
        self.shared.set_state(SessionState::Idle);
    }
}

impl Worker {
    /// Run until cancelled or the source is lost. Returns the resources.
    pub(crate) fn run(self, mut res: Resources) -> Resources {
        let exit = {
            let _guard = ExitGuard::enter(&self.shared);
            let exit = self.run_loop(&mut res);
            self.shared.set_source_stats(res.source.stats());
            res.source.release();
            res.source_connected = false;
            self.shared.set_last_exit(exit.clone());
            exit
        };
        match &exit {
            SessionExit::Stopped => log::info!("session loop stopped"),
            SessionExit::SourceLost(reason) => log::error!("session ended, source lost: {}", reason),
        }
        res
    }

    fn run_loop(&self, res: &mut Resources) -> SessionExit {
        let config = &self.config;
        let counters = &self.shared.counters;
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return SessionExit::Stopped;
            }
            if !res.source.is_healthy() {
                return SessionExit::SourceLost(format!(
                    "{} is no longer available",
                    res.source.stats().origin
                ));
            }
            let started = self.clock.now();

            let captured = res.source.next_frame();
            self.shared.set_source_stats(res.source.stats());
            let frame = match captured {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(err) => {
                    consecutive_failures += 1;
                    counters.source_failures.fetch_add(1, Ordering::Relaxed);
                    if consecutive_failures > config.retry.max_consecutive_failures {
                        return SessionExit::SourceLost(format!(
                            "{} consecutive capture failures, last: {:#}",
                            consecutive_failures, err
                        ));
                    }
                    log::warn!(
                        "failed to capture frame ({}/{}): {:#}",
                        consecutive_failures,
                        config.retry.max_consecutive_failures,
                        err
                    );
                    if self.clock.wait(config.retry.backoff, &self.cancel) {
                        return SessionExit::Stopped;
                    }
                    continue;
                }
            };

            let now = self.clock.now();
            if config.cooldown_policy == CooldownPolicy::SkipFrames && res.alert.in_cooldown(now) {
                let pause = config.cooldown_poll.min(res.alert.cooldown_remaining(now));
                log::debug!("in cooldown, skipping frame #{}", frame.sequence);
                if self.clock.wait(pause, &self.cancel) {
                    return SessionExit::Stopped;
                }
                continue;
            }

            match res.detector.infer(&frame, config.confidence_threshold) {
                Ok(result) => {
                    let decision = should_alert(
                        &result,
                        &config.target_label,
                        config.confidence_threshold,
                        now,
                        res.alert,
                    );

                    for detection in result.above(config.confidence_threshold) {
                        if detection.label == config.target_label {
                            log::info!(
                                "{} detected with confidence: {:.2}",
                                detection.label,
                                detection.confidence
                            );
                        }
                    }

                    let annotated = res.annotator.annotate(
                        &frame,
                        &result,
                        config.confidence_threshold,
                        decision.fire,
                    );
                    drop(frame);

                    if let Err(err) = res.display.publish(annotated) {
                        counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                        log::warn!("display publish failed: {:#}", err);
                    }

                    if decision.fire {
                        if let Err(err) = res.speech.announce(&config.alert_message) {
                            counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                            log::warn!("speech announce failed: {:#}", err);
                        }
                        res.alert = decision.state;
                        counters.alerts_fired.fetch_add(1, Ordering::Relaxed);
                    }
                    counters.frames_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.detector_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("inference failed on frame #{}: {:#}", frame.sequence, err);
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            let remaining = config.min_iteration_spacing.saturating_sub(elapsed);
            if self.clock.wait(remaining, &self.cancel) {
                return SessionExit::Stopped;
            }
        }
    }
}
