use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::SagaError;
use crate::policy::{TierLimit, TimeframeBounds};
use crate::types::Tier;

/// Environment-backed settings: connection details and secrets.
/// Tunables live in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub anthropic_api_key: Option<String>,
    pub config_path: PathBuf,
    pub spool_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            neo4j_uri: std::env::var("NEO4J_URI").context("NEO4J_URI must be set")?,
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: std::env::var("NEO4J_PASSWORD").context("NEO4J_PASSWORD must be set")?,
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            config_path: std::env::var("SAGA_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/saga.toml")),
            spool_dir: std::env::var("SAGA_SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("spool")),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(5);
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  NEO4J_URI: {}", self.neo4j_uri);
        tracing::info!("  NEO4J_PASSWORD: {}", preview(&self.neo4j_password));
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!("  SAGA_CONFIG: {}", self.config_path.display());
        tracing::info!("  SAGA_SPOOL_DIR: {}", self.spool_dir.display());
    }
}

/// TOML-backed tunables. Every section is optional and falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub scheduler: SchedulerConfig,
    pub capacity: CapacityConfig,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Refresh interval in seconds, indexed by priority 1..=5.
    pub intervals: [i64; 5],
    pub min_sleep_secs: u64,
    pub max_sleep_secs: u64,
    pub idle_sleep_secs: u64,
    pub workers: usize,
    /// Articles fetched per refresh, indexed by priority 1..=5.
    pub articles_per_refresh: [usize; 5],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            intervals: [3600, 7200, 14400, 28800, 86400],
            min_sleep_secs: 60,
            max_sleep_secs: 1800,
            idle_sleep_secs: 300,
            workers: 4,
            articles_per_refresh: [25, 25, 20, 15, 10],
        }
    }
}

impl SchedulerConfig {
    fn slot(priority: u8) -> Result<usize, SagaError> {
        match priority {
            1..=5 => Ok(priority as usize - 1),
            other => Err(SagaError::Validation(format!("unknown priority {other}"))),
        }
    }

    pub fn interval_for_priority(&self, priority: u8) -> Result<i64, SagaError> {
        Self::slot(priority).map(|i| self.intervals[i])
    }

    pub fn articles_for_priority(&self, priority: u8) -> Result<usize, SagaError> {
        Self::slot(priority).map(|i| self.articles_per_refresh[i])
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TierLimits {
    pub tier1: u32,
    pub tier2: u32,
    pub tier3: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self { tier1: 8, tier2: 5, tier3: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CapacityConfig {
    pub tier_limits: TierLimits,
    pub min_per_timeframe: u32,
    pub max_per_timeframe: u32,
    pub max_links_per_type: u32,
    pub max_topics: u32,
    /// Upper bound on articles rendered into one oracle prompt.
    pub max_oracle_items: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            tier_limits: TierLimits::default(),
            min_per_timeframe: 5,
            max_per_timeframe: 10,
            max_links_per_type: 10,
            max_topics: 100,
            max_oracle_items: 50,
        }
    }
}

impl CapacityConfig {
    pub fn tier_limit(&self, tier: Tier) -> TierLimit {
        match tier.value() {
            0 => TierLimit::Unbounded,
            1 => TierLimit::Bounded(self.tier_limits.tier1),
            2 => TierLimit::Bounded(self.tier_limits.tier2),
            _ => TierLimit::Bounded(self.tier_limits.tier3),
        }
    }

    pub fn timeframe_defaults(&self) -> TimeframeBounds {
        TimeframeBounds { min: self.min_per_timeframe, max: self.max_per_timeframe }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OracleConfig {
    pub model: String,
    pub timeout_secs: u64,
    /// Total attempts per decision, including the first.
    pub max_attempts: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_secs: 180,
            max_attempts: 2,
        }
    }
}

impl FileConfig {
    /// Reject configurations the capacity rules cannot work with.
    pub fn validate(&self) -> Result<(), SagaError> {
        let c = &self.capacity;
        if c.min_per_timeframe == 0 || c.min_per_timeframe > c.max_per_timeframe {
            return Err(SagaError::Config(format!(
                "min_per_timeframe ({}) must be between 1 and max_per_timeframe ({})",
                c.min_per_timeframe, c.max_per_timeframe
            )));
        }
        let limits = c.tier_limits;
        if limits.tier1 == 0 || limits.tier2 == 0 || limits.tier3 == 0 {
            return Err(SagaError::Config("tier limits must be at least 1".to_string()));
        }
        let s = &self.scheduler;
        if s.min_sleep_secs > s.max_sleep_secs {
            return Err(SagaError::Config(format!(
                "min_sleep_secs ({}) exceeds max_sleep_secs ({})",
                s.min_sleep_secs, s.max_sleep_secs
            )));
        }
        if s.workers == 0 {
            return Err(SagaError::Config("workers must be at least 1".to_string()));
        }
        if self.oracle.max_attempts == 0 {
            return Err(SagaError::Config("oracle.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load and parse a TOML config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [capacity]
            max_links_per_type = 4

            [capacity.tier_limits]
            tier3 = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity.max_links_per_type, 4);
        assert_eq!(config.capacity.tier_limits.tier3, 2);
        assert_eq!(config.capacity.tier_limits.tier2, 5);
        assert_eq!(config.scheduler.intervals[0], 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let res: Result<FileConfig, _> = toml::from_str("[scheduler]\nworkerz = 3\n");
        assert!(res.is_err());
    }

    #[test]
    fn priority_lookup() {
        let s = SchedulerConfig::default();
        assert_eq!(s.interval_for_priority(1).unwrap(), 3600);
        assert_eq!(s.interval_for_priority(5).unwrap(), 86400);
        assert!(s.interval_for_priority(0).is_err());
        assert!(s.interval_for_priority(6).is_err());
        assert_eq!(s.articles_for_priority(5).unwrap(), 10);
    }

    #[test]
    fn archive_tier_is_unbounded() {
        let c = CapacityConfig::default();
        assert_eq!(c.tier_limit(Tier::ARCHIVE), TierLimit::Unbounded);
        assert_eq!(c.tier_limit(Tier::TOP), TierLimit::Bounded(3));
    }

    #[test]
    fn inverted_bounds_fail_validation() {
        let mut config = FileConfig::default();
        config.capacity.min_per_timeframe = 11;
        assert!(matches!(config.validate(), Err(SagaError::Config(_))));
    }
}
