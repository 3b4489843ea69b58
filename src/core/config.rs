use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::services::generator::GeneratorConfig;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_work")]
    pub work_folder: String,

    #[serde(default = "default_auto_retry")]
    pub auto_retry: bool,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Keep the per-run directory of generated PNGs after the archive is built.
    #[serde(default)]
    pub keep_work_dir: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_seconds: u64,
    #[serde(default = "default_rate_limit_margin")]
    pub rate_limit_margin_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay(),
            rate_limit_wait_seconds: default_rate_limit_wait(),
            rate_limit_margin_seconds: default_rate_limit_margin(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            work_folder: default_work(),
            auto_retry: default_auto_retry(),
            max_workers: default_max_workers(),
            keep_work_dir: false,
            retry: RetryConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_work() -> String {
    std::env::temp_dir().to_string_lossy().to_string()
}
fn default_auto_retry() -> bool {
    true
}
fn default_max_workers() -> usize {
    3
}
fn default_base_delay() -> u64 {
    2
}
fn default_rate_limit_wait() -> u64 {
    60
}
fn default_rate_limit_margin() -> u64 {
    1
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            log::info!("{} not found, using defaults", path.display());
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.generator.gemini.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml_ng::from_str(content)?;
        config.max_workers = config.max_workers.max(1);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.work_folder)?;
        Ok(())
    }
}

/// Attempts per scene: 3 with auto-retry, otherwise a single attempt.
pub fn max_attempts(auto_retry: bool) -> u32 {
    if auto_retry {
        3
    } else {
        1
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_seconds)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit_margin_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.output_folder, "output");
        assert!(config.auto_retry);
        assert_eq!(config.max_workers, 3);
        assert_eq!(max_attempts(config.auto_retry), 3);
        assert_eq!(config.retry.rate_limit_wait(), Duration::from_secs(60));
        assert_eq!(config.generator.provider, "gemini");
    }

    #[test]
    fn test_overrides_and_worker_clamp() {
        let yaml = "auto_retry: false\nmax_workers: 0\nretry:\n  base_delay_seconds: 5\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(max_attempts(config.auto_retry), 1);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(5));
        assert_eq!(config.retry.rate_limit_margin(), Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        let mut config = Config::default();
        config.max_workers = 7;
        config.save(&path)?;

        let loaded = Config::load(&path)?;
        assert_eq!(loaded.max_workers, 7);
        Ok(())
    }
}
