use anyhow::{anyhow, Result};

use crate::frame::CanonicalImage;
use crate::inference::backend::DiffusionBackend;
use crate::inference::settings::{Acceleration, DiffusionSettings, PromptSettings};

/// Returns every frame unchanged. Used for dry runs of the transport path.
#[derive(Default)]
pub struct PassthroughBackend {
    resolution: Option<(u32, u32)>,
    prompt: Option<PromptSettings>,
    frames: u64,
}

impl PassthroughBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared_prompt(&self) -> Option<&PromptSettings> {
        self.prompt.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl DiffusionBackend for PassthroughBackend {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn supports(&self, _acceleration: Acceleration) -> bool {
        true
    }

    fn prepare(&mut self, settings: &DiffusionSettings, prompt: &PromptSettings) -> Result<()> {
        self.resolution = Some((settings.width, settings.height));
        self.prompt = Some(prompt.clone());
        log::info!(
            "passthrough backend prepared at {}x{} (model {} ignored)",
            settings.width,
            settings.height,
            settings.model_id
        );
        Ok(())
    }

    fn transform(&mut self, image: &CanonicalImage, _prompt: &str) -> Result<CanonicalImage> {
        let (width, height) = self
            .resolution
            .ok_or_else(|| anyhow!("passthrough backend used before prepare"))?;
        if image.dimensions() != (width, height) {
            return Err(anyhow!(
                "frame size {}x{} does not match prepared resolution {}x{}",
                image.width(),
                image.height(),
                width,
                height
            ));
        }
        self.frames += 1;
        Ok(image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn returns_input_after_prepare() -> Result<()> {
        let mut backend = PassthroughBackend::new();
        let image = RgbImage::from_pixel(4, 4, Rgb([9, 8, 7]));
        assert!(backend.transform(&image, "p").is_err());

        let settings = DiffusionSettings {
            width: 4,
            height: 4,
            ..DiffusionSettings::default()
        };
        backend.prepare(&settings, &PromptSettings::default())?;
        assert_eq!(backend.transform(&image, "p")?, image);
        assert_eq!(backend.frames(), 1);
        assert_eq!(
            backend.prepared_prompt().map(|p| p.num_inference_steps),
            Some(50)
        );

        let wrong = RgbImage::new(2, 2);
        assert!(backend.transform(&wrong, "p").is_err());
        Ok(())
    }
}
