use anyhow::Result;

use crate::frame::CanonicalImage;
use crate::inference::settings::{Acceleration, DiffusionSettings, PromptSettings};

/// Image-to-image diffusion backend.
///
/// The relay treats a backend as an opaque, stateful, blocking call: `transform`
/// must return the finished image before the next frame is received. Backends
/// may use a GPU queue or worker process internally; none of that is visible
/// to the stream loop.
pub trait DiffusionBackend: Send {
    /// Backend identifier used for registry lookup.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can honour the acceleration mode.
    fn supports(&self, acceleration: Acceleration) -> bool;

    /// Loads the model and fixes the prompt conditioning for the run.
    fn prepare(&mut self, settings: &DiffusionSettings, prompt: &PromptSettings) -> Result<()>;

    /// Transforms one target-resolution RGB image.
    ///
    /// The returned image must have the same dimensions as the input.
    fn transform(&mut self, image: &CanonicalImage, prompt: &str) -> Result<CanonicalImage>;

    /// Optional warm-up hook, called once after `prepare`.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
