use crate::controller::AccessConfig;
use crate::stability::DEFAULT_FRAMES_REQUIRED;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static BUNDLED_EMBEDDINGS: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACEGATE_BUNDLED_EMBEDDINGS")
            .unwrap_or("/usr/local/share/facegate/embeddings.json"),
    )
});

fn default_primary_store() -> PathBuf {
    ProjectDirs::from("org", "facegate", "facegate")
        .map(|dirs| dirs.data_dir().join("embeddings.json"))
        .unwrap_or_else(|| PathBuf::from("embeddings.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub recognition: RecognitionConfig,
    pub stability: StabilityConfig,
    pub access: AccessSection,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Fixed matcher threshold; calibrated from the store when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub frames_required: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            frames_required: DEFAULT_FRAMES_REQUIRED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSection {
    pub cooldown_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub countdown_ticks: u32,
    pub countdown_interval_ms: u64,
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            cooldown_ms: 10_000,
            confirmation_timeout_ms: 10_000,
            countdown_ticks: 5,
            countdown_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub primary: PathBuf,
    pub fallback: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_store(),
            fallback: BUNDLED_EMBEDDINGS.to_path_buf(),
        }
    }
}

impl Config {
    pub fn access_config(&self) -> AccessConfig {
        AccessConfig {
            frames_required: self.stability.frames_required,
            cooldown: Duration::from_millis(self.access.cooldown_ms),
            confirmation_timeout: Duration::from_millis(self.access.confirmation_timeout_ms),
            countdown_ticks: self.access.countdown_ticks,
            countdown_interval: Duration::from_millis(self.access.countdown_interval_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stability.frames_required == 0 {
            anyhow::bail!("stability.frames_required must be at least 1");
        }
        if self.access.countdown_ticks > 0 && self.access.countdown_interval_ms == 0 {
            anyhow::bail!("access.countdown_interval_ms must be positive");
        }
        if let Some(threshold) = self.recognition.threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                anyhow::bail!(
                    "recognition.threshold must be a positive number, got {}",
                    threshold
                );
            }
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
