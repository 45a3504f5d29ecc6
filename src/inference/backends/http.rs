//! Out-of-process diffusion worker reached over HTTP.
//!
//! Protocol:
//! - `POST {base}/prepare` with a JSON body `{ "settings": .., "prompt": .. }`
//! - `POST {base}/img2img?prompt=..` with a PNG body, answered with a PNG
//!
//! The worker owns the model, device and acceleration; this backend only moves
//! frames across the process boundary.

use std::io::{Cursor, Read};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use serde::Serialize;
use url::Url;

use crate::frame::CanonicalImage;
use crate::inference::backend::DiffusionBackend;
use crate::inference::settings::{Acceleration, DiffusionSettings, PromptSettings};

const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Serialize)]
struct PrepareRequest<'a> {
    settings: &'a DiffusionSettings,
    prompt: &'a PromptSettings,
}

pub struct HttpBackend {
    agent: ureq::Agent,
    base: Url,
    resolution: Option<(u32, u32)>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).context("parse diffusion worker url")?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported diffusion worker scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            base,
            resolution: None,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base
            .join(name)
            .with_context(|| format!("build worker endpoint {}", name))
    }
}

impl DiffusionBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, _acceleration: Acceleration) -> bool {
        // The worker validates acceleration itself during prepare.
        true
    }

    fn prepare(&mut self, settings: &DiffusionSettings, prompt: &PromptSettings) -> Result<()> {
        let url = self.endpoint("prepare")?;
        let body = serde_json::to_string(&PrepareRequest { settings, prompt })
            .context("encode prepare request")?;
        self.agent
            .post(url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("prepare diffusion worker at {}", url))?;
        self.resolution = Some((settings.width, settings.height));
        log::info!(
            "diffusion worker {} prepared: model={} acceleration={} device={}",
            self.base,
            settings.model_id,
            settings.acceleration,
            settings.device
        );
        Ok(())
    }

    fn transform(&mut self, image: &CanonicalImage, prompt: &str) -> Result<CanonicalImage> {
        let expected = self
            .resolution
            .ok_or_else(|| anyhow!("http backend used before prepare"))?;

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("encode frame as png")?;

        let mut url = self.endpoint("img2img")?;
        url.query_pairs_mut().append_pair("prompt", prompt);
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "image/png")
            .send_bytes(&png)
            .context("diffusion worker img2img request")?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .context("read img2img response")?;
        if body.is_empty() {
            return Err(anyhow!("diffusion worker returned an empty image"));
        }

        let output = image::load_from_memory_with_format(&body, ImageFormat::Png)
            .context("decode img2img response")?
            .into_rgb8();
        if output.dimensions() != expected {
            return Err(anyhow!(
                "diffusion worker returned {}x{}, expected {}x{}",
                output.width(),
                output.height(),
                expected.0,
                expected.1
            ));
        }
        Ok(output)
    }
}
