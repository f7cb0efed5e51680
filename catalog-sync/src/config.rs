//! Application configuration
//!
//! Loaded from `config.toml` in the user config directory (or an explicit
//! path), then overridden by `CATALOG_SYNC_*` environment variables. A
//! `.env` file in the working directory is honoured by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::resilience::{PacingConfig, ResilienceConfig, ResilienceConfigBuilder};

pub const DEFAULT_API_VERSION: &str = "2024-10";

pub const SHOP_ENV: &str = "CATALOG_SYNC_SHOP";
pub const ACCESS_TOKEN_ENV: &str = "CATALOG_SYNC_ACCESS_TOKEN";
pub const API_VERSION_ENV: &str = "CATALOG_SYNC_API_VERSION";
pub const PRESET_ENV: &str = "CATALOG_SYNC_PRESET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shop domain (`my-store.myshopify.com`) or a full base URL
    pub shop: Option<String>,
    pub access_token: Option<String>,
    pub api_version: String,
    pub resilience: ResilienceOverrides,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shop: None,
            access_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            resilience: ResilienceOverrides::default(),
        }
    }
}

/// Optional tuning on top of a named preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceOverrides {
    /// `default`, `conservative` or `development`
    pub preset: Option<String>,
    pub max_retries: Option<u32>,
    pub max_throttle_retries: Option<u32>,
    pub bucket_capacity: Option<f64>,
    pub refill_rate: Option<f64>,
    pub initial_concurrent: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_mutations_per_request: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub attribute_namespace: Option<String>,
    pub request_logging: Option<bool>,
    /// Tag run log lines with a run id
    pub correlation_ids: Option<bool>,
    /// Let concurrency adapt to success rates
    pub adaptive_concurrency: Option<bool>,
    /// `false` removes every pacing delay between sub-groups and chunks
    pub pacing: Option<bool>,
}

impl AppConfig {
    /// `<config dir>/catalog-sync/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-sync")
            .join("config.toml")
    }

    /// Load from `path`, or from the default location when it exists, then
    /// apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    log::debug!("No config file at {}, using defaults", default.display());
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config TOML")
    }

    /// Apply overrides from a variable lookup; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(shop) = get(SHOP_ENV) {
            self.shop = Some(shop);
        }
        if let Some(token) = get(ACCESS_TOKEN_ENV) {
            self.access_token = Some(token);
        }
        if let Some(version) = get(API_VERSION_ENV) {
            self.api_version = version;
        }
        if let Some(preset) = get(PRESET_ENV) {
            self.resilience.preset = Some(preset);
        }
    }

    /// Shop and access token, both required to talk to the API
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let shop = self
            .shop
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .with_context(|| format!("No shop configured (set `shop` or {SHOP_ENV})"))?;
        let token = self
            .access_token
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .with_context(|| {
                format!("No access token configured (set `access_token` or {ACCESS_TOKEN_ENV})")
            })?;
        Ok((shop, token))
    }

    /// Resolved resilience settings: preset first, then explicit overrides
    pub fn resilience(&self) -> Result<ResilienceConfig> {
        let o = &self.resilience;
        let base = match o.preset.as_deref().unwrap_or("default") {
            "default" => ResilienceConfig::default(),
            "conservative" => ResilienceConfig::conservative(),
            "development" => ResilienceConfig::development(),
            other => anyhow::bail!(
                "Unknown resilience preset '{}' (expected default, conservative or development)",
                other
            ),
        };

        let capacity = o.bucket_capacity.unwrap_or(base.rate_limit.capacity);
        let refill_rate = o.refill_rate.unwrap_or(base.rate_limit.refill_rate);
        let initial = o
            .initial_concurrent
            .unwrap_or(base.concurrency.initial_concurrent);
        let max = o.max_concurrent.unwrap_or(base.concurrency.max_concurrent);
        if capacity <= 0.0 || refill_rate <= 0.0 {
            anyhow::bail!("bucket_capacity and refill_rate must be positive");
        }
        if initial == 0 || initial > max {
            anyhow::bail!(
                "initial_concurrent must be between 1 and max_concurrent ({})",
                max
            );
        }

        let mut builder = ResilienceConfigBuilder::from_config(base)
            .bucket(capacity, refill_rate)
            .concurrency(initial, max);
        if let Some(retries) = o.max_retries {
            builder = builder.max_retries(retries);
        }
        if let Some(retries) = o.max_throttle_retries {
            builder = builder.max_throttle_retries(retries);
        }
        if let Some(size) = o.batch_size {
            builder = builder.batch_size(size);
        }
        if let Some(max) = o.max_mutations_per_request {
            builder = builder.max_mutations_per_request(max);
        }
        if let Some(secs) = o.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(namespace) = &o.attribute_namespace {
            builder = builder.attribute_namespace(namespace.clone());
        }
        if let Some(enabled) = o.request_logging {
            builder = builder.request_logging(enabled);
        }
        if let Some(enabled) = o.correlation_ids {
            builder = builder.correlation_ids(enabled);
        }
        if let Some(enabled) = o.adaptive_concurrency {
            builder = builder.enable_adaptive_concurrency(enabled);
        }
        if o.pacing == Some(false) {
            builder = builder.pacing_config(PacingConfig::none());
        }
        Ok(builder.build())
    }
}
