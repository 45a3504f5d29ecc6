mod backend;
mod backends;
mod registry;
mod settings;

pub use backend::DiffusionBackend;
pub use backends::PassthroughBackend;
#[cfg(feature = "backend-http")]
pub use backends::HttpBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use settings::{Acceleration, CfgType, DiffusionSettings, Precision, PromptSettings};
