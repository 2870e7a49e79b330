//! Local image directory source.
//!
//! `ImageDirSource` replays the still images in a local directory (sorted by
//! file name) as if they came from a camera, looping at the end. Images are
//! decoded in-memory and resized to the configured frame size.
//!
//! The source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use std::path::PathBuf;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Configuration for an image directory source.
#[derive(Clone, Debug)]
pub struct ImageDirConfig {
    /// Local directory path (e.g., "/var/lib/spotter/replay").
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

pub struct ImageDirSource {
    config: ImageDirConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    failures: u64,
}

impl ImageDirSource {
    pub fn new(config: ImageDirConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            failures: 0,
        }
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.config.path)
            .with_context(|| format!("open image directory {}", self.config.path.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let files = self.scan()?;
        if files.is_empty() {
            return Err(anyhow!(
                "no images found in {}",
                self.config.path.display()
            ));
        }
        log::info!(
            "ImageDirSource: connected to {} ({} images)",
            self.config.path.display(),
            files.len()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("image directory source not connected"));
        }
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();

        let decoded = match image::open(path) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(err) => {
                self.failures += 1;
                return Err(anyhow!("decode {}: {}", path.display(), err));
            }
        };
        let image = if decoded.dimensions() == (self.config.width, self.config.height) {
            decoded
        } else {
            imageops::resize(
                &decoded,
                self.config.width,
                self.config.height,
                FilterType::Triangle,
            )
        };

        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            origin: self.config.path.display().to_string(),
        }
    }

    fn release(&mut self) {
        self.files.clear();
    }
}
