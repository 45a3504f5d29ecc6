use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::inference::{Acceleration, CfgType, DiffusionSettings, Precision, PromptSettings};
use crate::transport::TransportKind;

pub const DEFAULT_OUTPUT_NAME: &str = "streamdiffusion-ndi-render";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:7860";
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SYNTHETIC_SOURCE: &str = "SYNTHETIC (Test Pattern)";
const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 360;
const DEFAULT_SYNTHETIC_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    model: Option<ModelConfigFile>,
    prompt: Option<PromptConfigFile>,
    output: Option<OutputConfigFile>,
    backend: Option<BackendConfigFile>,
    transport: Option<TransportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    id: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    t_index_list: Option<Vec<u32>>,
    frame_buffer_size: Option<u32>,
    acceleration: Option<Acceleration>,
    device: Option<String>,
    precision: Option<Precision>,
    cfg_type: Option<CfgType>,
    use_tiny_vae: Option<bool>,
    use_lcm_lora: Option<bool>,
    warmup: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PromptConfigFile {
    prompt: Option<String>,
    negative_prompt: Option<String>,
    num_inference_steps: Option<u32>,
    guidance_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BackendConfigFile {
    name: Option<String>,
    url: Option<String>,
    model_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TransportConfigFile {
    kind: Option<String>,
    sources: Option<Vec<String>>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub model: DiffusionSettings,
    pub prompt: PromptSettings,
    pub output_name: String,
    pub backend: BackendSettings,
    pub transport: TransportSettings,
    precision_pinned: bool,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub name: String,
    pub url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub synthetic: SyntheticSettings,
}

/// Shape of the synthetic test-pattern transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSettings {
    pub sources: Vec<String>,
    pub width: u32,
    pub height: u32,
    /// Capture pacing; 0 returns frames as fast as they are requested.
    pub fps: u32,
    /// Every n-th capture is an audio frame (0 disables).
    pub audio_every: u32,
    /// Every n-th capture times out (0 disables).
    pub timeout_every: u32,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            sources: vec![DEFAULT_SYNTHETIC_SOURCE.to_string()],
            width: DEFAULT_SYNTHETIC_WIDTH,
            height: DEFAULT_SYNTHETIC_HEIGHT,
            fps: DEFAULT_SYNTHETIC_FPS,
            audio_every: 5,
            timeout_every: 7,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        let name = if cfg!(feature = "backend-http") {
            "http"
        } else {
            "passthrough"
        };
        Self {
            name: name.to_string(),
            url: None,
            model_path: None,
            timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: DiffusionSettings::default(),
            prompt: PromptSettings::default(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            backend: BackendSettings::default(),
            transport: TransportSettings {
                kind: TransportKind::default(),
                synthetic: SyntheticSettings::default(),
            },
            precision_pinned: false,
        }
    }
}

impl RelayConfig {
    /// Defaults, then the TOML file (`path` or `RELAY_CONFIG`), then env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("RELAY_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => RelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(model) = file.model {
            let settings = &mut cfg.model;
            if let Some(id) = model.id {
                settings.model_id = id;
            }
            settings.width = model.width.unwrap_or(settings.width);
            settings.height = model.height.unwrap_or(settings.height);
            if let Some(list) = model.t_index_list {
                settings.t_index_list = list;
            }
            settings.frame_buffer_size = model
                .frame_buffer_size
                .unwrap_or(settings.frame_buffer_size);
            settings.acceleration = model.acceleration.unwrap_or(settings.acceleration);
            if let Some(device) = model.device {
                settings.precision = Precision::for_device(&device);
                settings.device = device;
            }
            if let Some(precision) = model.precision {
                settings.precision = precision;
                cfg.precision_pinned = true;
            }
            settings.cfg_type = model.cfg_type.unwrap_or(settings.cfg_type);
            settings.use_tiny_vae = model.use_tiny_vae.unwrap_or(settings.use_tiny_vae);
            settings.use_lcm_lora = model.use_lcm_lora.unwrap_or(settings.use_lcm_lora);
            settings.warmup = model.warmup.unwrap_or(settings.warmup);
        }

        if let Some(prompt) = file.prompt {
            if let Some(text) = prompt.prompt {
                cfg.prompt.prompt = text;
            }
            if let Some(text) = prompt.negative_prompt {
                cfg.prompt.negative_prompt = text;
            }
            cfg.prompt.num_inference_steps = prompt
                .num_inference_steps
                .unwrap_or(cfg.prompt.num_inference_steps);
            cfg.prompt.guidance_scale = prompt.guidance_scale.unwrap_or(cfg.prompt.guidance_scale);
        }

        if let Some(name) = file.output.and_then(|output| output.name) {
            cfg.output_name = name;
        }

        if let Some(backend) = file.backend {
            if let Some(name) = backend.name {
                cfg.backend.name = name;
            }
            cfg.backend.url = backend.url.or(cfg.backend.url);
            cfg.backend.model_path = backend.model_path.or(cfg.backend.model_path);
            if let Some(secs) = backend.timeout_secs {
                cfg.backend.timeout = Duration::from_secs(secs);
            }
        }

        if let Some(transport) = file.transport {
            if let Some(kind) = transport.kind {
                cfg.transport.kind = kind.parse()?;
            }
            let synthetic = &mut cfg.transport.synthetic;
            if let Some(sources) = transport.sources {
                synthetic.sources = sources;
            }
            synthetic.width = transport.width.unwrap_or(synthetic.width);
            synthetic.height = transport.height.unwrap_or(synthetic.height);
            synthetic.fps = transport.fps.unwrap_or(synthetic.fps);
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(prompt) = env_value("RELAY_PROMPT") {
            self.prompt.prompt = prompt;
        }
        // An empty negative prompt is meaningful, so only unset leaves it alone.
        if let Ok(negative) = std::env::var("RELAY_NEGATIVE_PROMPT") {
            self.prompt.negative_prompt = negative;
        }
        if let Some(name) = env_value("RELAY_OUTPUT_NAME") {
            self.output_name = name;
        }
        if let Some(name) = env_value("RELAY_BACKEND") {
            self.backend.name = name;
        }
        if let Some(url) = env_value("RELAY_BACKEND_URL") {
            self.backend.url = Some(url);
        }
        if let Some(path) = env_value("RELAY_MODEL_PATH") {
            self.backend.model_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = env_value("RELAY_BACKEND_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("RELAY_BACKEND_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.backend.timeout = Duration::from_secs(secs);
        }
        if self.backend.name == "http" && self.backend.url.is_none() {
            self.backend.url = Some(DEFAULT_BACKEND_URL.to_string());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.width == 0 || self.model.height == 0 {
            return Err(anyhow!(
                "model resolution must be non-zero (got {}x{})",
                self.model.width,
                self.model.height
            ));
        }
        if self.model.t_index_list.is_empty() {
            return Err(anyhow!("t_index_list must name at least one timestep"));
        }
        let steps = self.prompt.num_inference_steps;
        if let Some(index) = self.model.t_index_list.iter().find(|&&index| index >= steps) {
            return Err(anyhow!(
                "t_index_list entry {} is out of range for {} inference steps",
                index,
                steps
            ));
        }
        if self.model.frame_buffer_size == 0 {
            return Err(anyhow!("frame_buffer_size must be greater than zero"));
        }
        let guidance = self.prompt.guidance_scale;
        if guidance.is_nan() || guidance <= 0.0 {
            return Err(anyhow!(
                "guidance_scale must be positive (got {})",
                guidance
            ));
        }
        if self.output_name.trim().is_empty() {
            return Err(anyhow!("output name must not be empty"));
        }
        if self.backend.name.trim().is_empty() {
            return Err(anyhow!("backend name must not be empty"));
        }
        let synthetic = &self.transport.synthetic;
        if synthetic.width == 0 || synthetic.height == 0 {
            return Err(anyhow!("synthetic transport resolution must be non-zero"));
        }
        Ok(())
    }

    /// Changes the compute device; precision follows unless the file pinned it.
    pub fn set_device(&mut self, device: &str) {
        self.model.device = device.to_string();
        if !self.precision_pinned {
            self.model.precision = Precision::for_device(device);
        }
    }

    pub fn set_acceleration(&mut self, acceleration: Acceleration) {
        self.model.acceleration = acceleration;
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
