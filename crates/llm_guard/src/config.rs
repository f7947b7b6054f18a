//! Configuration for the governance layer.
//!
//! Loads settings from a TOML file or uses defaults. Every field has a
//! default so a partial file is fine; a missing file falls back to defaults
//! with a warning rather than failing startup.

use crate::llm_client::LlmBackendConfig;
use crate::quota::{CostModel, QuotaLimits};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default config file path.
pub const CONFIG_PATH: &str = "/etc/cloudsense/llm_guard.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub llm: LlmBackendConfig,
}

/// Per-caller request and spend ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_hourly_request_limit")]
    pub hourly_request_limit: usize,
    #[serde(default = "default_daily_request_limit")]
    pub daily_request_limit: usize,
    #[serde(default = "default_daily_cost_limit_usd")]
    pub daily_cost_limit_usd: f64,
}

fn default_hourly_request_limit() -> usize {
    10
}

fn default_daily_request_limit() -> usize {
    50
}

fn default_daily_cost_limit_usd() -> f64 {
    10.0
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            hourly_request_limit: default_hourly_request_limit(),
            daily_request_limit: default_daily_request_limit(),
            daily_cost_limit_usd: default_daily_cost_limit_usd(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// IPs stay visible by default: infrastructure logs need them for
    /// debugging.
    #[serde(default)]
    pub redact_ips: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self { redact_ips: false }
    }
}

/// Token pricing, dollars per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_input_rate")]
    pub input_token_rate_per_million: f64,
    #[serde(default = "default_output_rate")]
    pub output_token_rate_per_million: f64,
}

fn default_input_rate() -> f64 {
    3.0
}

fn default_output_rate() -> f64 {
    15.0
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            input_token_rate_per_million: default_input_rate(),
            output_token_rate_per_million: default_output_rate(),
        }
    }
}

impl GovernanceConfig {
    /// Load from the given path, falling back to defaults when the file
    /// does not exist. A file that exists but fails to parse is an error:
    /// silently ignoring a bad limits file would mean running ungoverned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        info!(
            "loaded governance config from {}: {}/hour, {}/day, ${:.2}/day",
            path.display(),
            config.quota.hourly_request_limit,
            config.quota.daily_request_limit,
            config.quota.daily_cost_limit_usd
        );
        Ok(config)
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            hourly_requests: self.quota.hourly_request_limit,
            daily_requests: self.quota.daily_request_limit,
            daily_cost_usd: self.quota.daily_cost_limit_usd,
        }
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel {
            input_rate_per_million: self.cost.input_token_rate_per_million,
            output_rate_per_million: self.cost.output_token_rate_per_million,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GovernanceConfig::default();
        assert_eq!(config.quota.hourly_request_limit, 10);
        assert_eq!(config.quota.daily_request_limit, 50);
        assert_eq!(config.quota.daily_cost_limit_usd, 10.0);
        assert!(!config.redaction.redact_ips);
        assert_eq!(config.cost.input_token_rate_per_million, 3.0);
        assert_eq!(config.cost.output_token_rate_per_million, 15.0);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = GovernanceConfig::load("/nonexistent/llm_guard.toml").unwrap();
        assert_eq!(config.quota.hourly_request_limit, 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[quota]\nhourly_request_limit = 3\n\n[redaction]\nredact_ips = true"
        )
        .unwrap();
        let config = GovernanceConfig::load(file.path()).unwrap();
        assert_eq!(config.quota.hourly_request_limit, 3);
        assert_eq!(config.quota.daily_request_limit, 50);
        assert!(config.redaction.redact_ips);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml = = =").unwrap();
        assert!(GovernanceConfig::load(file.path()).is_err());
    }
}
