// src/config.rs
use std::{fs, path::Path};

use serde::Deserialize;

/// Backoff schedule for `retrigger_subpartition_request`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "BackoffConfig::default_initial_ms")]
    pub initial_ms: u32,
    #[serde(default = "BackoffConfig::default_max_ms")]
    pub max_ms: u32,
}

impl BackoffConfig {
    fn default_initial_ms() -> u32 {
        100
    }
    fn default_max_ms() -> u32 {
        10_000
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: Self::default_initial_ms(), max_ms: Self::default_max_ms() }
    }
}

/// Sizing for the demo binary's in-memory buffer pool / exclusive segments.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_segment_size")]
    pub segment_size: usize,
    #[serde(default = "PoolConfig::default_floating_segments")]
    pub floating_segments: usize,
    #[serde(default = "PoolConfig::default_exclusive_per_channel")]
    pub exclusive_per_channel: usize,
}

impl PoolConfig {
    fn default_segment_size() -> usize {
        32 * 1024
    }
    fn default_floating_segments() -> usize {
        8
    }
    fn default_exclusive_per_channel() -> usize {
        2
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            segment_size: Self::default_segment_size(),
            floating_segments: Self::default_floating_segments(),
            exclusive_per_channel: Self::default_exclusive_per_channel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// `host:port` to serve `/metrics` on. Absent disables the HTTP endpoint.
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let cfg: AppConfig = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff.initial_ms == 0 {
            anyhow::bail!("backoff.initial_ms must be positive");
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            anyhow::bail!("backoff.max_ms must be >= backoff.initial_ms");
        }
        if self.pool.segment_size == 0 {
            anyhow::bail!("pool.segment_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let cfg = AppConfig { backoff: BackoffConfig { initial_ms: 500, max_ms: 100 }, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: AppConfig = toml::from_str("[backoff]\ninitial_ms = 50\n").unwrap();
        assert_eq!(cfg.backoff.initial_ms, 50);
        assert_eq!(cfg.backoff.max_ms, BackoffConfig::default_max_ms());
        assert_eq!(cfg.pool.segment_size, PoolConfig::default_segment_size());
    }
}
