#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::CanonicalImage;
use crate::inference::backend::DiffusionBackend;
use crate::inference::settings::{Acceleration, DiffusionSettings, PromptSettings};

/// Local ONNX image-to-image model run with tract.
///
/// The model takes and returns a `[1, 3, H, W]` f32 tensor in `0..1`. Prompts
/// are not used; the model's conditioning is baked in at export time.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, image: &CanonicalImage) -> Result<Tensor> {
        if image.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            ));
        }
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn extract_image(&self, outputs: TVec<TValue>) -> Result<CanonicalImage> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let (w, h) = (self.width as usize, self.height as usize);
        if values.shape() != &[1, 3, h, w][..] {
            return Err(anyhow!(
                "model output shape {:?} does not match [1, 3, {}, {}]",
                values.shape(),
                h,
                w
            ));
        }
        Ok(CanonicalImage::from_fn(self.width, self.height, |x, y| {
            let sample = |c: usize| {
                let v = values[[0, c, y as usize, x as usize]];
                (v * 255.0).round().clamp(0.0, 255.0) as u8
            };
            image::Rgb([sample(0), sample(1), sample(2)])
        }))
    }
}

impl DiffusionBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, acceleration: Acceleration) -> bool {
        matches!(acceleration, Acceleration::None)
    }

    fn prepare(&mut self, settings: &DiffusionSettings, _prompt: &PromptSettings) -> Result<()> {
        if (settings.width, settings.height) != (self.width, self.height) {
            return Err(anyhow!(
                "model was loaded for {}x{}, settings ask for {}x{}",
                self.width,
                self.height,
                settings.width,
                settings.height
            ));
        }
        if settings.device != "cpu" {
            log::warn!(
                "tract backend runs on the CPU; device '{}' ignored",
                settings.device
            );
        }
        Ok(())
    }

    fn transform(&mut self, image: &CanonicalImage, _prompt: &str) -> Result<CanonicalImage> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_image(outputs)
    }
}
