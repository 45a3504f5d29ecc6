use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::RelayConfig;
use crate::inference::backend::DiffusionBackend;
use crate::inference::backends::PassthroughBackend;
use crate::inference::settings::Acceleration;

/// Named set of diffusion backends available to this build.
///
/// The stream loop owns exactly one backend; `backend_for` hands it out and
/// removes it from the registry.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn DiffusionBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registers every backend compiled in and configured.
    ///
    /// `passthrough` is always present. `http` needs a worker URL and `tract`
    /// needs a model path. The configured backend name becomes the default.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(PassthroughBackend::new());

        #[cfg(feature = "backend-http")]
        if let Some(url) = config.backend.url.as_deref() {
            registry.register(crate::inference::HttpBackend::new(url, config.backend.timeout)?);
        }

        #[cfg(feature = "backend-tract")]
        if let Some(path) = config.backend.model_path.as_deref() {
            registry.register(crate::inference::TractBackend::new(
                path,
                config.model.width,
                config.model.height,
            )?);
        }

        if registry.backends.contains_key(&config.backend.name) {
            registry.set_default(&config.backend.name)?;
        } else {
            log::warn!(
                "configured backend '{}' is not available in this build (have: {})",
                config.backend.name,
                registry.list().join(", ")
            );
            registry.default_name = Some(config.backend.name.clone());
        }
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DiffusionBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Takes the named backend (or the default) out of the registry.
    ///
    /// Fails when the backend is unknown or cannot honour `acceleration`.
    pub fn backend_for(
        &mut self,
        name: Option<&str>,
        acceleration: Acceleration,
    ) -> Result<Box<dyn DiffusionBackend>> {
        let name = name
            .map(str::to_string)
            .or_else(|| self.default_name.clone())
            .ok_or_else(|| anyhow!("no diffusion backend registered"))?;

        let supports = match self.backends.get(&name) {
            Some(backend) => backend.supports(acceleration),
            None => {
                return Err(anyhow!(
                    "backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                ))
            }
        };
        if !supports {
            return Err(anyhow!(
                "backend '{}' does not support acceleration '{}'",
                name,
                acceleration
            ));
        }
        self.backends
            .remove(&name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
