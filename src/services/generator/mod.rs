use crate::core::error::{ConfigError, GenerateError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod gemini;

use gemini::{GeminiConfig, GeminiImageClient};

/// Remote image-generation capability.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns the encoded image bytes for `prompt`. `aspect_ratio` is a
    /// `W:H` hint the service may or may not honour.
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<u8>, GenerateError>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: GeminiConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

/// Builds the configured generator using `credential` as the API key.
pub fn create_generator(config: &GeneratorConfig, credential: &str) -> Result<Box<dyn ImageGenerator>> {
    if credential.trim().is_empty() {
        return Err(ConfigError::MissingCredential.into());
    }
    info!("Initializing image generator for provider: {}", config.provider);
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiImageClient::new(&config.gemini, credential)?)),
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

/// Turns a credential into a ready generator. Lets the workflow defer client
/// construction until the request has been validated.
pub trait GeneratorFactory: Send + Sync {
    fn create(&self, credential: &str) -> Result<Arc<dyn ImageGenerator>>;
}

/// Factory backed by the `generator` section of `config.yml`.
pub struct ConfiguredGenerators {
    config: GeneratorConfig,
}

impl ConfiguredGenerators {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }
}

impl GeneratorFactory for ConfiguredGenerators {
    fn create(&self, credential: &str) -> Result<Arc<dyn ImageGenerator>> {
        Ok(Arc::from(create_generator(&self.config, credential)?))
    }
}
