//! Persistent configuration model, defaults and loading.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::ConfigError;
use crate::providers::{cover_art_archive, deezer, itunes, registry};

const CONFIG_FILE_NAME: &str = "coverscout.toml";

/// Root configuration persisted to `coverscout.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Throttled metadata registry used to fill in release-group ids.
    pub registry: RegistryConfig,
    #[serde(default)]
    /// Artwork providers and their connection limits.
    pub providers: ProvidersConfig,
    #[serde(default)]
    /// Viewport-driven load timing.
    pub viewport: ViewportConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_registry_base_url")]
    pub base_url: String,
    /// Sent as `User-Agent`; the registry rejects anonymous clients.
    #[serde(default = "default_client_identifier")]
    pub client_identifier: String,
    #[serde(default = "default_registry_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_registry_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_registry_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProvidersConfig {
    /// Default try order; success ratios reorder it at runtime.
    #[serde(default = "default_provider_order")]
    pub order: Vec<String>,
    #[serde(default = "default_provider_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-search budget, excluding time spent queued. 0 disables it.
    #[serde(default = "default_provider_job_timeout_ms")]
    pub job_timeout_ms: u64,
    #[serde(default = "default_provider_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_provider_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_itunes_base_url")]
    pub itunes_base_url: String,
    #[serde(default = "default_deezer_base_url")]
    pub deezer_base_url: String,
    #[serde(default = "default_cover_art_archive_base_url")]
    pub cover_art_archive_base_url: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ViewportConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_background_batch_size")]
    pub background_batch_size: usize,
    #[serde(default = "default_background_batch_pause_ms")]
    pub background_batch_pause_ms: u64,
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_hover_debounce_ms")]
    pub hover_debounce_ms: u64,
    #[serde(default = "default_hover_warm_count")]
    pub hover_warm_count: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_registry_base_url(),
            client_identifier: default_client_identifier(),
            min_interval_ms: default_registry_min_interval_ms(),
            request_timeout_ms: default_registry_request_timeout_ms(),
            max_retries: default_registry_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
            max_concurrent: default_provider_max_concurrent(),
            job_timeout_ms: default_provider_job_timeout_ms(),
            max_retries: default_provider_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            http_timeout_ms: default_provider_http_timeout_ms(),
            itunes_base_url: default_itunes_base_url(),
            deezer_base_url: default_deezer_base_url(),
            cover_art_archive_base_url: default_cover_art_archive_base_url(),
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            background_batch_size: default_background_batch_size(),
            background_batch_pause_ms: default_background_batch_pause_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            hover_debounce_ms: default_hover_debounce_ms(),
            hover_warm_count: default_hover_warm_count(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_registry_base_url() -> String {
    registry::DEFAULT_BASE_URL.to_string()
}

fn default_client_identifier() -> String {
    format!(
        "coverscout/{} ( https://github.com/coverscout/coverscout )",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_registry_min_interval_ms() -> u64 {
    1_000
}

fn default_registry_request_timeout_ms() -> u64 {
    30_000
}

fn default_registry_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_provider_order() -> Vec<String> {
    vec![
        itunes::PROVIDER_NAME.to_string(),
        deezer::PROVIDER_NAME.to_string(),
        cover_art_archive::PROVIDER_NAME.to_string(),
    ]
}

fn default_provider_max_concurrent() -> usize {
    4
}

fn default_provider_job_timeout_ms() -> u64 {
    15_000
}

fn default_provider_max_retries() -> u32 {
    1
}

fn default_provider_http_timeout_ms() -> u64 {
    10_000
}

fn default_itunes_base_url() -> String {
    itunes::DEFAULT_BASE_URL.to_string()
}

fn default_deezer_base_url() -> String {
    deezer::DEFAULT_BASE_URL.to_string()
}

fn default_cover_art_archive_base_url() -> String {
    cover_art_archive::DEFAULT_BASE_URL.to_string()
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_background_batch_size() -> usize {
    3
}

fn default_background_batch_pause_ms() -> u64 {
    250
}

fn default_visibility_timeout_ms() -> u64 {
    2_000
}

fn default_hover_debounce_ms() -> u64 {
    300
}

fn default_hover_warm_count() -> usize {
    3
}

/// Clamps values that would stall or flood the providers.
pub fn sanitize_config(config: Config) -> Config {
    let client_identifier = if config.registry.client_identifier.trim().is_empty() {
        default_client_identifier()
    } else {
        config.registry.client_identifier.trim().to_string()
    };
    let request_timeout_ms = config.registry.request_timeout_ms.clamp(1_000, 120_000);
    // The shared transport must give up before the registry queue does, or a
    // timed-out call could still be on the wire when the next one starts.
    let http_timeout_ms = config
        .providers
        .http_timeout_ms
        .clamp(1_000, 120_000)
        .min(request_timeout_ms);
    let order = if config.providers.order.is_empty() {
        default_provider_order()
    } else {
        config.providers.order
    };

    Config {
        registry: RegistryConfig {
            enabled: config.registry.enabled,
            base_url: config.registry.base_url,
            client_identifier,
            min_interval_ms: config.registry.min_interval_ms.max(100),
            request_timeout_ms,
            max_retries: config.registry.max_retries.min(5),
            backoff_base_ms: config.registry.backoff_base_ms.clamp(50, 30_000),
        },
        providers: ProvidersConfig {
            order,
            max_concurrent: config.providers.max_concurrent.clamp(1, 32),
            job_timeout_ms: config.providers.job_timeout_ms,
            max_retries: config.providers.max_retries.min(5),
            backoff_base_ms: config.providers.backoff_base_ms.clamp(50, 30_000),
            http_timeout_ms,
            itunes_base_url: config.providers.itunes_base_url,
            deezer_base_url: config.providers.deezer_base_url,
            cover_art_archive_base_url: config.providers.cover_art_archive_base_url,
        },
        viewport: ViewportConfig {
            settle_delay_ms: config.viewport.settle_delay_ms,
            background_batch_size: config.viewport.background_batch_size.clamp(1, 64),
            background_batch_pause_ms: config.viewport.background_batch_pause_ms,
            visibility_timeout_ms: config.viewport.visibility_timeout_ms.max(100),
            hover_debounce_ms: config.viewport.hover_debounce_ms,
            hover_warm_count: config.viewport.hover_warm_count.min(50),
        },
    }
}

/// `<config dir>/coverscout/coverscout.toml`, if the platform has a config dir.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("coverscout").join(CONFIG_FILE_NAME))
}

/// Reads `path`, writing the defaults there first if it does not exist.
pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(&Config::default())?)?;
    }
    let content = std::fs::read_to_string(path)?;
    Ok(sanitize_config(toml::from_str::<Config>(&content)?))
}
