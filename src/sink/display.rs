use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use std::path::PathBuf;

use super::DisplaySink;
use crate::frame::AnnotatedFrame;

/// Hands annotated frames to the foreground over a bounded channel.
///
/// When the foreground falls behind and the channel is full, the frame is
/// dropped rather than stalling the detection loop.
pub struct ChannelDisplay {
    tx: Sender<AnnotatedFrame>,
    dropped: u64,
}

impl ChannelDisplay {
    pub fn new(tx: Sender<AnnotatedFrame>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Convenience constructor returning the receiving half as well.
    pub fn bounded(capacity: usize) -> (Self, crossbeam_channel::Receiver<AnnotatedFrame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DisplaySink for ChannelDisplay {
    fn publish(&mut self, frame: AnnotatedFrame) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                log::debug!(
                    "display lagging, dropped frame #{} ({} dropped so far)",
                    frame.sequence,
                    self.dropped
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("display receiver disconnected")),
        }
    }
}

/// Writes the latest annotated frame to an image file, replacing it each time.
///
/// The image is written to a sibling temp file and renamed so readers never
/// see a partial write.
pub struct SnapshotDisplay {
    path: PathBuf,
    every: u64,
    published: u64,
}

impl SnapshotDisplay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            every: 1,
            published: 0,
        }
    }

    /// Only write every `n`th frame. Frames that fired an alert are always written.
    pub fn every(mut self, n: u64) -> Self {
        self.every = n.max(1);
        self
    }
}

impl DisplaySink for SnapshotDisplay {
    fn publish(&mut self, frame: AnnotatedFrame) -> Result<()> {
        self.published += 1;
        if !frame.alerted && self.published % self.every != 0 {
            return Ok(());
        }
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("snapshot path {} has no file name", self.path.display()))?;
        let tmp = self
            .path
            .with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        let format = image::ImageFormat::from_path(&self.path)
            .with_context(|| format!("snapshot format for {}", self.path.display()))?;
        frame
            .image
            .save_with_format(&tmp, format)
            .with_context(|| format!("write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Instant;

    fn annotated(sequence: u64, alerted: bool) -> AnnotatedFrame {
        AnnotatedFrame {
            image: RgbImage::new(4, 4),
            sequence,
            captured_at: Instant::now(),
            detections: Vec::new(),
            alerted,
        }
    }

    #[test]
    fn channel_display_drops_when_full() -> Result<()> {
        let (mut display, rx) = ChannelDisplay::bounded(1);
        display.publish(annotated(1, false))?;
        display.publish(annotated(2, false))?;
        assert_eq!(display.dropped(), 1);
        assert_eq!(rx.try_recv()?.sequence, 1);
        Ok(())
    }

    #[test]
    fn channel_display_errors_when_disconnected() {
        let (mut display, rx) = ChannelDisplay::bounded(1);
        drop(rx);
        assert!(display.publish(annotated(1, false)).is_err());
    }

    #[test]
    fn snapshot_display_writes_image() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("latest.png");
        let mut display = SnapshotDisplay::new(&path).every(2);

        display.publish(annotated(1, false))?;
        assert!(!path.exists());
        display.publish(annotated(2, false))?;
        assert!(path.exists());

        let written = image::open(&path)?.to_rgb8();
        assert_eq!(written.dimensions(), (4, 4));
        Ok(())
    }
}
