//! Output sinks driven by the session worker.
//!
//! Sinks are created on the foreground thread and moved onto the worker when
//! a session starts, so every sink must be `Send`. Sink errors are logged by
//! the session and never end it.

mod display;
mod speech;

use anyhow::Result;

use crate::frame::AnnotatedFrame;

pub use display::{ChannelDisplay, SnapshotDisplay};
pub use speech::{platform_speech_command, ChannelSpeech, CommandSpeech, LogSpeech};

/// Consumer of annotated frames.
pub trait DisplaySink: Send {
    fn publish(&mut self, frame: AnnotatedFrame) -> Result<()>;

    /// Release any held resources. Called once on session shutdown.
    fn release(&mut self) {}
}

/// Consumer of alert announcements. Fire-and-forget: `announce` should not
/// wait for playback to finish.
pub trait SpeechSink: Send {
    fn announce(&mut self, text: &str) -> Result<()>;

    /// Release any held resources. Called once on session shutdown.
    fn release(&mut self) {}
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn publish(&mut self, frame: AnnotatedFrame) -> Result<()> {
        (**self).publish(frame)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

impl<S: SpeechSink + ?Sized> SpeechSink for Box<S> {
    fn announce(&mut self, text: &str) -> Result<()> {
        (**self).announce(text)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
