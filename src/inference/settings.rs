use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL_ID: &str = "stabilityai/sd-turbo";
pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_T_INDEX_LIST: [u32; 2] = [35, 45];
pub const DEFAULT_FRAME_BUFFER_SIZE: u32 = 1;
pub const DEFAULT_WARMUP: u32 = 10;
pub const DEFAULT_DEVICE: &str = "cuda";

pub const DEFAULT_PROMPT: &str = "cyberpunk, neon lights, dark background, glowing, futuristic";
pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "black and white, blurry, low resolution, pixelated, pixel art, low quality, low fidelity";
pub const DEFAULT_INFERENCE_STEPS: u32 = 50;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 1.2;

/// Attention/engine acceleration requested from the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Acceleration {
    None,
    Xformers,
    Tensorrt,
}

impl fmt::Display for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Acceleration::None => "none",
            Acceleration::Xformers => "xformers",
            Acceleration::Tensorrt => "tensorrt",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp16,
    Fp32,
}

impl Precision {
    /// Half precision on CUDA devices, full precision everywhere else.
    pub fn for_device(device: &str) -> Self {
        if device.trim().to_ascii_lowercase().starts_with("cuda") {
            Precision::Fp16
        } else {
            Precision::Fp32
        }
    }
}

/// Classifier-free guidance mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CfgType {
    None,
    Full,
    #[serde(rename = "self")]
    SelfGuidance,
    Initialize,
}

/// Model-side knobs passed to `DiffusionBackend::prepare`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffusionSettings {
    pub model_id: String,
    pub width: u32,
    pub height: u32,
    /// Denoising timestep indices sampled per frame.
    pub t_index_list: Vec<u32>,
    pub frame_buffer_size: u32,
    pub acceleration: Acceleration,
    pub device: String,
    pub precision: Precision,
    pub cfg_type: CfgType,
    pub use_tiny_vae: bool,
    pub use_lcm_lora: bool,
    pub warmup: u32,
}

impl Default for DiffusionSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            t_index_list: DEFAULT_T_INDEX_LIST.to_vec(),
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
            acceleration: Acceleration::Xformers,
            device: DEFAULT_DEVICE.to_string(),
            precision: Precision::for_device(DEFAULT_DEVICE),
            cfg_type: CfgType::SelfGuidance,
            use_tiny_vae: true,
            use_lcm_lora: true,
            warmup: DEFAULT_WARMUP,
        }
    }
}

/// Prompt conditioning fixed at prepare time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_follows_device() {
        assert_eq!(Precision::for_device("cuda"), Precision::Fp16);
        assert_eq!(Precision::for_device("CUDA:1"), Precision::Fp16);
        assert_eq!(Precision::for_device("cpu"), Precision::Fp32);
        assert_eq!(Precision::for_device("mps"), Precision::Fp32);
    }

    #[test]
    fn settings_serialize_with_wire_names() -> anyhow::Result<()> {
        let json = serde_json::to_value(DiffusionSettings::default())?;
        assert_eq!(json["cfg_type"], "self");
        assert_eq!(json["acceleration"], "xformers");
        assert_eq!(json["precision"], "fp16");
        assert_eq!(json["t_index_list"], serde_json::json!([35, 45]));
        Ok(())
    }
}
