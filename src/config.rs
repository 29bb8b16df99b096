use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::buffer::{DetectionBuffer, DEFAULT_SMOOTHING_ALPHA};
use crate::detect::{ExecutionStrategy, ModelLocation, MAX_STRATEGIES};
use crate::inference::{ChannelConfig, ChannelOrder, TensorSpec, DEFAULT_MAX_DETECTIONS};
use crate::ingest::DeviceRequest;
use crate::layout::{Aspect, BoxPolicy, FitMode, LayoutEngine, RegionMode};
use crate::render::{SessionConfig, DEFAULT_THRESHOLD};

const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_VIEWPORT_WIDTH: u32 = 1080;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 1920;
const DEFAULT_ASPECT: &str = "4:3";
const DEFAULT_LABEL: &str = "object";
/// Detector input sizes must tile the model stride.
const INPUT_SIZE_MULTIPLE: u32 = 32;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<String>,
    input_size: Option<u32>,
    max_detections: Option<usize>,
    channel_order: Option<ChannelOrder>,
    backends: Option<Vec<ExecutionStrategy>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    fit: Option<FitMode>,
    aspect: Option<String>,
    region: Option<RegionMode>,
    box_policy: Option<BoxPolicy>,
    strict_geometry: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    smoothing_alpha: Option<f32>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub model: ModelSettings,
    pub camera: CameraSettings,
    pub display: DisplaySettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: String,
    pub input_size: u32,
    pub max_detections: usize,
    pub channel_order: ChannelOrder,
    pub backends: Vec<ExecutionStrategy>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `None` = environment-facing default device.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub fit: FitMode,
    /// Only consulted by the letterbox fit. `None` keeps the source aspect.
    pub aspect: Option<String>,
    pub region: RegionMode,
    pub box_policy: BoxPolicy,
    pub strict_geometry: bool,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: f32,
    pub smoothing_alpha: f32,
    pub labels: Vec<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self::from_file(OverlayConfigFile::default())
    }
}

impl OverlayConfig {
    /// File (if `OVERLAY_CONFIG` is set), then environment, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file without consulting `OVERLAY_CONFIG`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        Self {
            model: ModelSettings {
                path: model.path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                max_detections: model.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
                channel_order: model.channel_order.unwrap_or(ChannelOrder::Bgr),
                backends: model
                    .backends
                    .unwrap_or_else(|| vec![ExecutionStrategy::Optimized, ExecutionStrategy::Portable]),
            },
            camera: CameraSettings {
                device: camera.device.filter(|d| !d.trim().is_empty()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            display: DisplaySettings {
                viewport_width: display.viewport_width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
                viewport_height: display.viewport_height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
                fit: display.fit.unwrap_or(FitMode::Cover),
                aspect: display.aspect.or_else(|| Some(DEFAULT_ASPECT.to_string())),
                region: display.region.unwrap_or(RegionMode::CenteredSquare),
                box_policy: display.box_policy.unwrap_or_default(),
                strict_geometry: display.strict_geometry.unwrap_or(cfg!(debug_assertions)),
            },
            detection: DetectionSettings {
                threshold: detection.threshold.unwrap_or(DEFAULT_THRESHOLD),
                smoothing_alpha: detection.smoothing_alpha.unwrap_or(DEFAULT_SMOOTHING_ALPHA),
                labels: detection
                    .labels
                    .unwrap_or_else(|| vec![DEFAULT_LABEL.to_string()]),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = std::env::var("OVERLAY_MODEL") {
            if !model.trim().is_empty() {
                self.model.path = model;
            }
        }
        if let Ok(device) = std::env::var("OVERLAY_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = Some(device);
            }
        }
        if let Ok(threshold) = std::env::var("OVERLAY_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Ok(fit) = std::env::var("OVERLAY_FIT") {
            if !fit.trim().is_empty() {
                self.display.fit = fit.parse().context("OVERLAY_FIT")?;
            }
        }
        if let Ok(aspect) = std::env::var("OVERLAY_ASPECT") {
            let aspect = aspect.trim();
            self.display.aspect = match aspect {
                "" | "source" => None,
                other => Some(other.to_string()),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(anyhow!(
                "detection.threshold must be within [0, 1], got {}",
                self.detection.threshold
            ));
        }
        if !(self.detection.smoothing_alpha > 0.0 && self.detection.smoothing_alpha <= 1.0) {
            return Err(anyhow!(
                "detection.smoothing_alpha must be within (0, 1], got {}",
                self.detection.smoothing_alpha
            ));
        }
        if self.model.input_size == 0 || self.model.input_size % INPUT_SIZE_MULTIPLE != 0 {
            return Err(anyhow!(
                "model.input_size must be a positive multiple of {}, got {}",
                INPUT_SIZE_MULTIPLE,
                self.model.input_size
            ));
        }
        if self.model.max_detections == 0 {
            return Err(anyhow!("model.max_detections must be greater than zero"));
        }
        if self.model.backends.is_empty() {
            return Err(anyhow!("model.backends must list at least one strategy"));
        }
        if self.model.backends.len() > MAX_STRATEGIES {
            return Err(anyhow!(
                "model.backends allows one strategy plus one fallback, got {:?}",
                self.model.backends
            ));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution hint must be non-zero"));
        }
        if self.display.viewport_width == 0 || self.display.viewport_height == 0 {
            return Err(anyhow!("display viewport must be non-zero"));
        }
        self.aspect()?;
        Ok(())
    }

    /// Parsed `display.aspect`.
    pub fn aspect(&self) -> Result<Option<Aspect>> {
        self.display
            .aspect
            .as_deref()
            .map(|a| a.parse::<Aspect>().context("display.aspect"))
            .transpose()
    }

    pub fn model_location(&self) -> ModelLocation {
        ModelLocation::new(self.model.path.as_str())
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            input_size: self.model.input_size,
            tensor: TensorSpec {
                order: self.model.channel_order,
                normalize: true,
            },
            max_detections: self.model.max_detections,
        }
    }

    pub fn device_request(&self) -> DeviceRequest {
        DeviceRequest {
            device_id: self.camera.device.clone(),
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            viewport_width: self.display.viewport_width,
            viewport_height: self.display.viewport_height,
            threshold: self.detection.threshold,
            labels: self.detection.labels.clone(),
            strict_geometry: self.display.strict_geometry,
        }
    }

    pub fn layout_engine(&self) -> Result<LayoutEngine> {
        let policy = self.display.fit.policy(self.aspect()?);
        Ok(LayoutEngine::new(
            policy,
            self.display.region,
            self.display.box_policy,
        ))
    }

    pub fn detection_buffer(&self) -> Result<DetectionBuffer> {
        DetectionBuffer::new(self.detection.smoothing_alpha)
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
