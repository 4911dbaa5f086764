//! Typed, environment-driven configuration for the orchestrator (A1, §6).
//!
//! Mirrors the teacher's `Config::from_env()` shape: start from `Default`,
//! overlay whatever environment variables are present, then `validate()`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::CadenceBucket;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub fingerprint: FingerprintConfig,
    pub lease: LeaseConfig,
    pub review: ReviewConfig,
    pub collection: CollectionConfig,
    pub cadence: CadenceConfig,
    pub queue: QueueConfig,
    pub capabilities: CapabilityConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintConfig::default(),
            lease: LeaseConfig::default(),
            review: ReviewConfig::default(),
            collection: CollectionConfig::default(),
            cadence: CadenceConfig::default(),
            queue: QueueConfig::default(),
            capabilities: CapabilityConfig::default(),
            store: StoreConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub dedup_enabled: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(259_200),
            dedup_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub reaper_grace: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7_200),
            reaper_interval: Duration::from_secs(300),
            reaper_grace: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub light_conf_threshold: f64,
    pub heavy_conf_threshold: f64,
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub pause_backoff: Duration,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            light_conf_threshold: 0.75,
            heavy_conf_threshold: 0.5,
            concurrency: 4,
            pause_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub min_articles_default: u32,
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            min_articles_default: 3,
            expiry: Duration::from_secs(604_800),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
        }
    }
}

impl CadenceConfig {
    pub fn bucket_interval(&self, bucket: CadenceBucket) -> Option<chrono::Duration> {
        bucket.interval()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub light_reviewer_url: String,
    pub heavy_reviewer_url: String,
    pub writer_url: String,
    pub script_url: String,
    pub editor_url: String,
    pub metadata_url: String,
    pub tts_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub health_probe_ttl_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            light_reviewer_url: "http://localhost:8101".to_string(),
            heavy_reviewer_url: "http://localhost:8102".to_string(),
            writer_url: "http://localhost:8103".to_string(),
            script_url: "http://localhost:8104".to_string(),
            editor_url: "http://localhost:8105".to_string(),
            metadata_url: "http://localhost:8106".to_string(),
            tts_url: "http://localhost:8107".to_string(),
            timeout: Duration::from_secs(180),
            health_probe_ttl_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "./data/orchestrator.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from defaults overlaid with recognized environment
    /// variables (SPEC_FULL.md §6).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("FINGERPRINT_TTL_SECONDS") {
            config.fingerprint.ttl = Duration::from_secs(parse_u64("FINGERPRINT_TTL_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("DEDUP_ENABLED") {
            config.fingerprint.dedup_enabled = parse_bool("DEDUP_ENABLED", &v)?;
        }
        if let Ok(v) = std::env::var("MIN_ARTICLES_PER_COLLECTION") {
            config.collection.min_articles_default = parse_u64("MIN_ARTICLES_PER_COLLECTION", &v)? as u32;
        }
        if let Ok(v) = std::env::var("COLLECTION_EXPIRY_SECONDS") {
            config.collection.expiry = Duration::from_secs(parse_u64("COLLECTION_EXPIRY_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("LEASE_TTL_SECONDS") {
            config.lease.ttl = Duration::from_secs(parse_u64("LEASE_TTL_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("EPISODE_REAPER_INTERVAL_SECONDS") {
            config.lease.reaper_interval = Duration::from_secs(parse_u64("EPISODE_REAPER_INTERVAL_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("EPISODE_REAPER_GRACE_SECONDS") {
            config.lease.reaper_grace = Duration::from_secs(parse_u64("EPISODE_REAPER_GRACE_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("LIGHT_CONF_THRESHOLD") {
            config.review.light_conf_threshold = parse_f64("LIGHT_CONF_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("HEAVY_CONF_THRESHOLD") {
            config.review.heavy_conf_threshold = parse_f64("HEAVY_CONF_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("REVIEW_CONCURRENCY") {
            config.review.concurrency = parse_u64("REVIEW_CONCURRENCY", &v)? as usize;
        }
        if let Ok(v) = std::env::var("PAUSE_BACKOFF_SECONDS") {
            config.review.pause_backoff = Duration::from_secs(parse_u64("PAUSE_BACKOFF_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("CADENCE_TICK_SECONDS") {
            config.cadence.tick_interval = Duration::from_secs(parse_u64("CADENCE_TICK_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("CAPABILITY_TIMEOUT_SECONDS") {
            config.capabilities.timeout = Duration::from_secs(parse_u64("CAPABILITY_TIMEOUT_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("LIGHT_REVIEWER_URL") {
            config.capabilities.light_reviewer_url = v;
        }
        if let Ok(v) = std::env::var("HEAVY_REVIEWER_URL") {
            config.capabilities.heavy_reviewer_url = v;
        }
        if let Ok(v) = std::env::var("WRITER_URL") {
            config.capabilities.writer_url = v;
        }
        if let Ok(v) = std::env::var("SCRIPT_URL") {
            config.capabilities.script_url = v;
        }
        if let Ok(v) = std::env::var("EDITOR_URL") {
            config.capabilities.editor_url = v;
        }
        if let Ok(v) = std::env::var("METADATA_URL") {
            config.capabilities.metadata_url = v;
        }
        if let Ok(v) = std::env::var("TTS_URL") {
            config.capabilities.tts_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            config.store.database_path = v;
        }
        if let Ok(v) = std::env::var("HTTP_BIND_ADDR") {
            config.api.bind_addr = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            config.logging.format = match v.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOG_FORMAT".to_string(),
                        reason: format!("must be 'pretty' or 'json', got '{other}'"),
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.review.light_conf_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "LIGHT_CONF_THRESHOLD".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.review.heavy_conf_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "HEAVY_CONF_THRESHOLD".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.collection.min_articles_default == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MIN_ARTICLES_PER_COLLECTION".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "LOG_LEVEL".to_string(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }
        Ok(())
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{raw}' is not a valid non-negative integer"),
    })
}

fn parse_f64(key: &str, raw: &str) -> Result<f64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{raw}' is not a valid number"),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{raw}' is not a valid boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = OrchestratorConfig::default();
        config.review.light_conf_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_min_articles() {
        let mut config = OrchestratorConfig::default();
        config.collection.min_articles_default = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("X", "true").unwrap(), true);
        assert_eq!(parse_bool("X", "0").unwrap(), false);
        assert!(parse_bool("X", "nah").is_err());
    }
}
