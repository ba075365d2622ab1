use crate::engine::{RulePolicy, StreakPolicy};
use crate::model::TrackedSite;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enforcement: EnforcementConfig,

    #[serde(default)]
    pub allowance: AllowanceConfig,

    #[serde(default)]
    pub streak: StreakPolicy,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default = "default_seed_sites")]
    pub seed_sites: Vec<SeedSite>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enable")]
    pub enable: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnforcementConfig {
    #[serde(default = "default_fallback_redirect_url")]
    pub fallback_redirect_url: String,
    #[serde(default = "default_block_priority")]
    pub block_priority: u32,
    #[serde(default = "default_redirect_priority")]
    pub redirect_priority: u32,
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AllowanceConfig {
    #[serde(default = "default_allow_minutes")]
    pub default_minutes: u32,
    /// Alarms never fire sooner than this after being armed.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enable")]
    pub enable: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SeedSite {
    pub id: String,
    pub label: String,
    pub pattern: String,
}

// Defaults
fn default_api_enable() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}
fn default_sqlite_path() -> String {
    "streak-guard.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_fallback_redirect_url() -> String {
    RulePolicy::default().fallback_redirect_url
}
fn default_block_priority() -> u32 {
    1
}
fn default_redirect_priority() -> u32 {
    100
}
fn default_max_rules() -> usize {
    5000
}
fn default_allow_minutes() -> u32 {
    3
}
fn default_min_delay_ms() -> i64 {
    1000
}
fn default_stats_enable() -> bool {
    true
}
fn default_log_interval() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    256
}
fn default_seed_sites() -> Vec<SeedSite> {
    vec![
        SeedSite {
            id: "yt".to_string(),
            label: "YouTube".to_string(),
            pattern: "youtube.com".to_string(),
        },
        SeedSite {
            id: "nf".to_string(),
            label: "Netflix".to_string(),
            pattern: "netflix.com".to_string(),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            enforcement: EnforcementConfig::default(),
            allowance: AllowanceConfig::default(),
            streak: StreakPolicy::default(),
            stats: StatsConfig::default(),
            channels: ChannelConfig::default(),
            seed_sites: default_seed_sites(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable: default_api_enable(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            fallback_redirect_url: default_fallback_redirect_url(),
            block_priority: default_block_priority(),
            redirect_priority: default_redirect_priority(),
            max_rules: default_max_rules(),
        }
    }
}

impl Default for AllowanceConfig {
    fn default() -> Self {
        Self {
            default_minutes: default_allow_minutes(),
            min_delay_ms: default_min_delay_ms(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_stats_enable(),
            log_interval_seconds: default_log_interval(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.enforcement;
        if e.block_priority < 1 {
            bail!("enforcement.block_priority must be at least 1");
        }
        if e.redirect_priority <= e.block_priority {
            bail!(
                "enforcement.redirect_priority ({}) must be greater than block_priority ({})",
                e.redirect_priority,
                e.block_priority
            );
        }
        let fallback = Url::parse(&e.fallback_redirect_url)
            .context("enforcement.fallback_redirect_url is not a valid URL")?;
        if !matches!(fallback.scheme(), "http" | "https") {
            bail!("enforcement.fallback_redirect_url must be http(s)");
        }
        if self.channels.capacity == 0 {
            bail!("channels.capacity must be at least 1");
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            bail!("logging.format must be \"text\" or \"json\"");
        }
        Ok(())
    }

    pub fn rule_policy(&self) -> RulePolicy {
        RulePolicy {
            fallback_redirect_url: self.enforcement.fallback_redirect_url.clone(),
            block_priority: self.enforcement.block_priority,
            redirect_priority: self.enforcement.redirect_priority,
        }
    }

    /// Tracked sites written on first start, all with blocking off.
    pub fn seed_tracked_sites(&self, now: DateTime<Utc>) -> Vec<TrackedSite> {
        self.seed_sites
            .iter()
            .map(|s| TrackedSite::new(s.id.clone(), s.label.clone(), s.pattern.clone(), now))
            .collect()
    }
}
