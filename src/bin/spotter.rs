//! spotter - watch a camera for a target object and announce it
//!
//! The foreground thread:
//! 1. Owns the `SessionController` (start/stop/status from stdin)
//! 2. Receives annotated frames from the worker and writes snapshots
//! 3. Reports a session that ended by itself (camera lost) as soon as it ends
//! 4. Shuts the session down cleanly on `quit`, Ctrl-C or `--run-for`

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, Receiver};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use spotter::annotate::Annotator;
use spotter::sink::{ChannelDisplay, CommandSpeech, LogSpeech, SnapshotDisplay, SpeechSink};
use spotter::{
    open_detector, open_source, DisplaySink, SceneChangeDetector, SessionController,
    SessionError, SessionState, SpotterConfig,
};

/// Annotated frames buffered between the worker and the foreground.
const DISPLAY_QUEUE_DEPTH: usize = 4;

/// How often the foreground looks for a session that ended without `stop`.
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides SPOTTER_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera source: /dev/videoN, stub://name, or an image directory.
    #[arg(long)]
    source: Option<String>,
    /// ONNX model path, or stub:// for the scene-change detector.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Start a session immediately instead of waiting for `start`.
    #[arg(long)]
    autostart: bool,
    /// Exit after this many seconds.
    #[arg(long)]
    run_for: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "stop" => Some(Command::Stop),
            "status" => Some(Command::Status),
            "quit" | "exit" | "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => SpotterConfig::load_from(Some(path))?,
        None => SpotterConfig::load()?,
    };
    if let Some(source) = &args.source {
        cfg.camera.source = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    cfg.validate()?;

    let source = open_source(&cfg.camera)?;
    let detector = build_detector(&cfg)?;
    let (display, frames) = ChannelDisplay::bounded(DISPLAY_QUEUE_DEPTH);
    let speech = build_speech(&cfg);

    let annotator = match &cfg.display.font_path {
        Some(font) => Annotator::with_font_file(font)?,
        None => Annotator::new(),
    };
    let mut snapshot = cfg.display.snapshot_path.as_ref().map(SnapshotDisplay::new);

    let mut controller = SessionController::new(cfg.session(), source, detector, display, speech)
        .with_annotator(annotator);

    let commands = spawn_stdin_reader();
    let interrupts = install_interrupt_handler()?;
    let deadline = args.run_for.map(|secs| Instant::now() + Duration::from_secs(secs));
    let watchdog = crossbeam_channel::tick(WATCH_INTERVAL);
    let mut watch = SessionWatch::default();

    log::info!(
        "spotter ready: source={} model={} target={}",
        cfg.camera.source,
        cfg.model.path.display(),
        cfg.detection.target_label
    );
    if args.autostart {
        watch.started(controller.start());
    } else {
        log::info!("commands: start | stop | status | quit");
    }

    let mut frames_open = true;
    let mut stdin_open = true;
    loop {
        let frames_rx = if frames_open { frames.clone() } else { never() };
        let commands_rx = if stdin_open { commands.clone() } else { never() };
        let timeout = match deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => never(),
        };
        select! {
            recv(frames_rx) -> frame => {
                let Ok(frame) = frame else {
                    // The worker's display sink is gone (worker panicked).
                    frames_open = false;
                    continue;
                };
                if frame.alerted {
                    log::info!(
                        "frame #{} alerted ({} detections)",
                        frame.sequence,
                        frame.detections.len()
                    );
                }
                if let Some(snapshot) = snapshot.as_mut() {
                    if let Err(err) = snapshot.publish(frame) {
                        log::warn!("snapshot failed: {:#}", err);
                    }
                }
            }
            recv(commands_rx) -> command => match command {
                Ok(Command::Start) => watch.started(controller.start()),
                Ok(Command::Stop) => watch.stopped(controller.stop()),
                Ok(Command::Status) => log_status(&controller),
                Ok(Command::Quit) => break,
                Err(_) => {
                    log::debug!("stdin closed, commands disabled");
                    stdin_open = false;
                }
            },
            recv(watchdog) -> _ => {
                if let Some(err) = watch.check(&mut controller) {
                    log::error!("session ended without stop: {}", err);
                    log_status(&controller);
                }
            }
            recv(interrupts) -> _ => {
                log::info!("interrupt received");
                break;
            }
            recv(timeout) -> _ => {
                log::info!("run time elapsed");
                break;
            }
        }
    }

    controller.shutdown();
    log_status(&controller);
    Ok(())
}

fn build_detector(cfg: &SpotterConfig) -> Result<Box<dyn spotter::Detector>> {
    let synthetic = cfg.camera.source.starts_with("stub://");
    if synthetic && !cfg.model.path.exists() {
        log::warn!(
            "model {} not found, using scene-change detector for {}",
            cfg.model.path.display(),
            cfg.camera.source
        );
        return Ok(Box::new(SceneChangeDetector::new(
            cfg.detection.target_label.clone(),
        )));
    }
    open_detector(cfg).with_context(|| format!("load model {}", cfg.model.path.display()))
}

fn build_speech(cfg: &SpotterConfig) -> Box<dyn SpeechSink> {
    match CommandSpeech::from_settings(&cfg.speech) {
        Some(speech) => Box::new(speech),
        None => {
            log::warn!("no text-to-speech program for this platform, alerts will be logged");
            Box::new(LogSpeech)
        }
    }
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => log::warn!("unknown command: {}", line.trim()),
            }
        }
    });
    rx
}

fn install_interrupt_handler() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .map_err(|e| anyhow!("failed to set ctrl-c handler: {}", e))?;
    Ok(rx)
}

fn report(result: Result<(), SessionError>) {
    if let Err(err) = result {
        log::warn!("{}", err);
    }
}

/// Remembers whether a session should be running, so one that ends by itself
/// is noticed without waiting for a `status` command.
#[derive(Debug, Default)]
struct SessionWatch {
    expect_running: bool,
}

impl SessionWatch {
    fn started(&mut self, result: Result<(), SessionError>) {
        if result.is_ok() {
            self.expect_running = true;
        }
        report(result);
    }

    fn stopped(&mut self, result: Result<(), SessionError>) {
        self.expect_running = false;
        report(result);
    }

    /// Why the expected session is gone, reported once per session.
    ///
    /// Collects the finished worker, so a panic shows up here as well.
    fn check(&mut self, controller: &mut SessionController) -> Option<SessionError> {
        if !self.expect_running || controller.state() != SessionState::Idle {
            return None;
        }
        self.expect_running = false;
        match controller.stop() {
            Err(SessionError::NotRunning) => {
                controller.last_exit().and_then(|exit| exit.as_error())
            }
            Err(err) => Some(err),
            Ok(()) => None,
        }
    }
}

fn log_status(controller: &SessionController) {
    let stats = controller.stats();
    log::info!(
        "state={:?} frames={} alerts={} source_failures={} detector_failures={} sink_failures={}",
        controller.state(),
        stats.frames_processed,
        stats.alerts_fired,
        stats.source_failures,
        stats.detector_failures,
        stats.sink_failures
    );
    if let Some(source) = controller.source_stats() {
        log::info!(
            "source={} captured={} capture_failures={}",
            source.origin,
            source.frames_captured,
            source.failures
        );
    }
    if let Some(exit) = controller.last_exit().and_then(|exit| exit.as_error()) {
        log::info!("last session ended: {}", exit);
    }
}
