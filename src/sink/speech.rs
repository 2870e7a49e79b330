use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use std::process::{Child, Command, Stdio};

use super::SpeechSink;
use crate::config::SpeechSettings;

/// Announcements still playing beyond this count are skipped.
const MAX_PENDING_ANNOUNCEMENTS: usize = 4;

/// Speaks announcements by spawning a text-to-speech program per message.
///
/// The child is not waited on; finished children are reaped on later calls and
/// any still playing are waited for on `release`.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    pending: Vec<Child>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            pending: Vec::new(),
        }
    }

    /// Build from settings: an explicit `command` is split on whitespace,
    /// otherwise the platform default is used. `None` when no TTS program is
    /// known for this platform.
    pub fn from_settings(settings: &SpeechSettings) -> Option<Self> {
        match &settings.command {
            Some(command) => {
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts.next()?;
                Some(Self::new(program, parts.collect()))
            }
            None => platform_speech_command(settings.rate_wpm)
                .map(|(program, args)| Self::new(program, args)),
        }
    }

    fn reap(&mut self) {
        self.pending.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    log::warn!("speech command exited with {}", status);
                }
                false
            }
            Ok(None) => true,
            Err(err) => {
                log::warn!("speech command status unavailable: {}", err);
                false
            }
        });
    }
}

impl SpeechSink for CommandSpeech {
    fn announce(&mut self, text: &str) -> Result<()> {
        self.reap();
        if self.pending.len() >= MAX_PENDING_ANNOUNCEMENTS {
            return Err(anyhow!(
                "{} announcements still playing, skipping '{}'",
                self.pending.len(),
                text
            ));
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn speech command {}", self.program))?;
        self.pending.push(child);
        log::info!("Spoke: {}", text);
        Ok(())
    }

    fn release(&mut self) {
        for mut child in self.pending.drain(..) {
            if let Err(err) = child.wait() {
                log::warn!("speech command wait failed: {}", err);
            }
        }
    }
}

/// Default TTS program and arguments for the current platform.
pub fn platform_speech_command(rate_wpm: u32) -> Option<(String, Vec<String>)> {
    if cfg!(target_os = "macos") {
        Some(("say".to_string(), vec!["-r".to_string(), rate_wpm.to_string()]))
    } else if cfg!(target_os = "linux") {
        Some((
            "espeak".to_string(),
            vec!["-s".to_string(), rate_wpm.to_string()],
        ))
    } else {
        None
    }
}

/// Logs announcements instead of speaking them.
#[derive(Default)]
pub struct LogSpeech;

impl SpeechSink for LogSpeech {
    fn announce(&mut self, text: &str) -> Result<()> {
        log::info!("announce: {}", text);
        Ok(())
    }
}

/// Forwards announcements to another thread.
pub struct ChannelSpeech {
    tx: Sender<String>,
}

impl ChannelSpeech {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl SpeechSink for ChannelSpeech {
    fn announce(&mut self, text: &str) -> Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| anyhow!("speech receiver disconnected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_splits_explicit_command() {
        let settings = SpeechSettings {
            command: Some("espeak -v en".to_string()),
            rate_wpm: 150,
        };
        let speech = CommandSpeech::from_settings(&settings).unwrap();
        assert_eq!(speech.program, "espeak");
        assert_eq!(speech.args, vec!["-v", "en"]);
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut speech = CommandSpeech::new("/nonexistent/tts-program", Vec::new());
        assert!(speech.announce("Wheel detected").is_err());
        speech.release();
    }

    #[cfg(unix)]
    #[test]
    fn announce_spawns_and_release_waits() -> Result<()> {
        let mut speech = CommandSpeech::new("true", Vec::new());
        speech.announce("Wheel detected")?;
        speech.release();
        assert!(speech.pending.is_empty());
        Ok(())
    }

    #[test]
    fn channel_speech_forwards_text() -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut speech = ChannelSpeech::new(tx);
        speech.announce("Wheel detected")?;
        assert_eq!(rx.try_recv()?, "Wheel detected");
        drop(rx);
        assert!(speech.announce("again").is_err());
        Ok(())
    }
}
