use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::{CooldownPolicy, RetryPolicy, SessionConfig};

const DEFAULT_TARGET_LABEL: &str = "wheel";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_SPACING_MS: u64 = 100;
const DEFAULT_COOLDOWN_POLL_MS: u64 = 1_000;
const DEFAULT_CAMERA_INDEX: u32 = 1;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_MAX_FAILURES: u32 = 10;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_MODEL_PATH: &str = "wheel.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_SPEECH_RATE_WPM: u32 = 150;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SpotterConfigFile {
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    speech: Option<SpeechConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    target_label: Option<String>,
    confidence_threshold: Option<f32>,
    cooldown_ms: Option<u64>,
    min_iteration_spacing_ms: Option<u64>,
    cooldown_policy: Option<CooldownPolicy>,
    cooldown_poll_ms: Option<u64>,
    alert_message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    index: Option<u32>,
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_consecutive_failures: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SpeechConfigFile {
    command: Option<String>,
    rate_wpm: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SpotterConfig {
    pub detection: DetectionSettings,
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub speech: SpeechSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub target_label: String,
    pub confidence_threshold: f32,
    pub cooldown: Duration,
    pub min_iteration_spacing: Duration,
    pub cooldown_policy: CooldownPolicy,
    pub cooldown_poll: Duration,
    /// Spoken text; `None` means "<Label> detected".
    pub alert_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub index: u32,
    /// `/dev/videoN`, `stub://name`, or a local image directory.
    /// Empty until resolved; `load` derives it from `index` when unset.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_consecutive_failures: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    /// Class names by output index. Empty means a single-class model whose
    /// only class is the target label; see `SpotterConfig::class_labels`.
    pub labels: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    /// TTS program; `None` picks the platform default.
    pub command: Option<String>,
    pub rate_wpm: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DisplaySettings {
    pub snapshot_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE,
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            min_iteration_spacing: Duration::from_millis(DEFAULT_SPACING_MS),
            cooldown_policy: CooldownPolicy::default(),
            cooldown_poll: Duration::from_millis(DEFAULT_COOLDOWN_POLL_MS),
            alert_message: None,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: DEFAULT_CAMERA_INDEX,
            source: device_path(DEFAULT_CAMERA_INDEX),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels: Vec::new(),
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            command: None,
            rate_wpm: DEFAULT_SPEECH_RATE_WPM,
        }
    }
}

impl Default for SpotterConfig {
    fn default() -> Self {
        Self {
            detection: DetectionSettings::default(),
            camera: CameraSettings::default(),
            model: ModelSettings::default(),
            speech: SpeechSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl SpotterConfig {
    /// Load from `$SPOTTER_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPOTTER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path (or defaults), then apply env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SpotterConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let speech = file.speech.unwrap_or_default();
        let display = file.display.unwrap_or_default();

        Self {
            detection: DetectionSettings {
                target_label: detection
                    .target_label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                cooldown: Duration::from_millis(
                    detection.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
                ),
                min_iteration_spacing: Duration::from_millis(
                    detection
                        .min_iteration_spacing_ms
                        .unwrap_or(DEFAULT_SPACING_MS),
                ),
                cooldown_policy: detection.cooldown_policy.unwrap_or_default(),
                cooldown_poll: Duration::from_millis(
                    detection.cooldown_poll_ms.unwrap_or(DEFAULT_COOLDOWN_POLL_MS),
                ),
                alert_message: detection.alert_message,
            },
            camera: CameraSettings {
                index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
                source: camera.source.unwrap_or_default(),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                max_consecutive_failures: camera
                    .max_consecutive_failures
                    .unwrap_or(DEFAULT_MAX_FAILURES),
                retry_backoff: Duration::from_millis(
                    camera.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
                ),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                labels: model.labels.unwrap_or_default(),
                input_width: model.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: model.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
                iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            speech: SpeechSettings {
                command: speech.command,
                rate_wpm: speech.rate_wpm.unwrap_or(DEFAULT_SPEECH_RATE_WPM),
            },
            display: DisplaySettings {
                snapshot_path: display.snapshot_path,
                font_path: display.font_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(label) = std::env::var("SPOTTER_TARGET_LABEL") {
            if !label.trim().is_empty() {
                self.detection.target_label = label.trim().to_string();
            }
        }
        if let Ok(confidence) = std::env::var("SPOTTER_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SPOTTER_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(cooldown) = std::env::var("SPOTTER_COOLDOWN_MS") {
            let millis: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("SPOTTER_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.detection.cooldown = Duration::from_millis(millis);
        }
        if let Ok(index) = std::env::var("SPOTTER_CAMERA_INDEX") {
            self.camera.index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("SPOTTER_CAMERA_INDEX must be a non-negative integer"))?;
        }
        if let Ok(source) = std::env::var("SPOTTER_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("SPOTTER_MODEL") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(command) = std::env::var("SPOTTER_SPEECH_COMMAND") {
            if !command.trim().is_empty() {
                self.speech.command = Some(command);
            }
        }
        if let Ok(path) = std::env::var("SPOTTER_SNAPSHOT") {
            if !path.trim().is_empty() {
                self.display.snapshot_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Check ranges and resolve derived values. Call again after mutating a loaded config.
    pub fn validate(&mut self) -> Result<()> {
        let detection = &self.detection;
        if detection.target_label.trim().is_empty() {
            return Err(anyhow!("target label must not be empty"));
        }
        if !(0.0..=1.0).contains(&detection.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} must be within [0, 1]",
                detection.confidence_threshold
            ));
        }
        if detection.cooldown.is_zero() {
            return Err(anyhow!("cooldown must be greater than zero"));
        }
        if detection.min_iteration_spacing.is_zero() {
            return Err(anyhow!("minimum iteration spacing must be greater than zero"));
        }
        if detection.cooldown_poll.is_zero() {
            return Err(anyhow!("cooldown poll interval must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(anyhow!("iou threshold must be within [0, 1]"));
        }
        if !self.model.labels.is_empty()
            && !self.model.labels.contains(&self.detection.target_label)
        {
            return Err(anyhow!(
                "target label '{}' is not one of the model labels {:?}",
                self.detection.target_label,
                self.model.labels
            ));
        }
        if self.camera.source.trim().is_empty() {
            self.camera.source = device_path(self.camera.index);
        }
        Ok(())
    }

    /// Class names for the detector, falling back to the target label alone.
    pub fn class_labels(&self) -> Vec<String> {
        if self.model.labels.is_empty() {
            vec![self.detection.target_label.clone()]
        } else {
            self.model.labels.clone()
        }
    }

    /// Session parameters derived from this config.
    pub fn session(&self) -> SessionConfig {
        let detection = &self.detection;
        SessionConfig {
            target_label: detection.target_label.clone(),
            confidence_threshold: detection.confidence_threshold,
            cooldown: detection.cooldown,
            min_iteration_spacing: detection.min_iteration_spacing,
            cooldown_policy: detection.cooldown_policy,
            cooldown_poll: detection.cooldown_poll,
            alert_message: detection
                .alert_message
                .clone()
                .unwrap_or_else(|| default_alert_message(&detection.target_label)),
            retry: RetryPolicy {
                max_consecutive_failures: self.camera.max_consecutive_failures,
                backoff: self.camera.retry_backoff,
            },
        }
    }
}

/// "wheel" -> "Wheel detected".
pub fn default_alert_message(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => format!("{}{} detected", first.to_uppercase(), chars.as_str()),
        None => "Object detected".to_string(),
    }
}

fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
}

fn read_config_file(path: &Path) -> Result<SpotterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alert_message_capitalizes_label() {
        assert_eq!(default_alert_message("wheel"), "Wheel detected");
        assert_eq!(default_alert_message(""), "Object detected");
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = SpotterConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_derives_device_from_index() {
        let mut cfg = SpotterConfig::default();
        cfg.camera.source.clear();
        cfg.camera.index = 3;
        cfg.validate().unwrap();
        assert_eq!(cfg.camera.source, "/dev/video3");
    }

    #[test]
    fn class_labels_follow_target_label() {
        let mut cfg = SpotterConfig::default();
        assert_eq!(cfg.class_labels(), vec!["wheel"]);
        cfg.detection.target_label = "person".to_string();
        assert_eq!(cfg.class_labels(), vec!["person"]);

        cfg.model.labels = vec!["car".to_string()];
        assert!(cfg.validate().is_err());
        cfg.model.labels.push("person".to_string());
        cfg.validate().unwrap();
        assert_eq!(cfg.class_labels(), vec!["car", "person"]);
    }

    #[test]
    fn session_config_carries_detection_settings() {
        let cfg = SpotterConfig::default();
        let session = cfg.session();
        assert_eq!(session.target_label, "wheel");
        assert_eq!(session.confidence_threshold, 0.25);
        assert_eq!(session.cooldown, Duration::from_secs(5));
        assert_eq!(session.alert_message, "Wheel detected");
        assert_eq!(session.retry.max_consecutive_failures, 10);
    }
}
