//! Synthetic frame source (`stub://` URLs).
//!
//! Produces a deterministic moving gradient whose "scene" changes every 50
//! frames, so scene-change detection has something to report.

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const SCENE_PERIOD_FRAMES: u64 = 50;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source name (e.g., "stub://front_camera").
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    connected: bool,
    frame_count: u64,
    /// Simulated "scene" state; bumps occasionally to simulate object entry.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_synthetic_pixels(&mut self) -> RgbImage {
        if self.frame_count % SCENE_PERIOD_FRAMES == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let scene = self.scene_state as u32;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let base = ((x + y + scene * 37) % 256) as u8;
            image::Rgb([base, base.wrapping_add(85), base.wrapping_add(170)])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        self.connected = true;
        log::info!("SyntheticSource: connected to {} (synthetic)", self.config.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.config.name));
        }
        self.frame_count += 1;
        let image = self.generate_synthetic_pixels();
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: 0,
            origin: self.config.name.clone(),
        }
    }

    fn release(&mut self) {
        self.connected = false;
        log::info!("SyntheticSource: released {}", self.config.name);
    }
}
