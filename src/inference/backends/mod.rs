pub mod passthrough;

#[cfg(feature = "backend-http")]
pub mod http;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use passthrough::PassthroughBackend;

#[cfg(feature = "backend-http")]
pub use http::HttpBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
