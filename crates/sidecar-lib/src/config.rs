//! Sidecar configuration

use crate::duration::{parse_duration, DurationParseError};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Configuration shared by every subsystem of the sidecar.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Maximum number of stats elements retained per container; 0 disables
    /// the depth limit. Evaluated in combination with `stats_span`.
    #[serde(default)]
    pub stats_depth: usize,

    /// Maximum wall-time window of retained stats, as a duration string.
    #[serde(default = "default_stats_span")]
    pub stats_span: String,

    /// Address the stats server binds to; empty means all interfaces.
    #[serde(default)]
    pub server_addr: String,

    /// Port the stats server listens at.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Whitespace-separated logger path prefixes raised to debug.
    #[serde(default)]
    pub verbose_at: String,

    /// Whitespace-separated logger path prefixes lowered to warn.
    #[serde(default)]
    pub silent_at: String,

    /// Whitespace-separated logger path prefixes lowered to error.
    #[serde(default)]
    pub mute_at: String,
}

fn default_stats_span() -> String {
    "10m".to_string()
}

fn default_server_port() -> u16 {
    8777
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            stats_depth: 0,
            stats_span: default_stats_span(),
            server_addr: String::new(),
            server_port: default_server_port(),
            verbose_at: String::new(),
            silent_at: String::new(),
            mute_at: String::new(),
        }
    }
}

impl SystemConfig {
    /// Loads configuration from `SIDECAR_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SIDECAR").try_parsing(true))
            .build()
            .context("failed to build configuration")?;

        Ok(config.try_deserialize().unwrap_or_else(|_| Self::default()))
    }

    /// Parsed stats span; invalid strings surface at initialization.
    pub fn stats_span(&self) -> Result<Duration, DurationParseError> {
        parse_duration(&self.stats_span)
    }

    /// Socket address for the stats server; an empty `server_addr` binds all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        let host = if self.server_addr.is_empty() {
            "0.0.0.0"
        } else {
            self.server_addr.as_str()
        };
        format!("{host}:{}", self.server_port)
    }

    pub fn verbose_at(&self) -> impl Iterator<Item = &str> {
        self.verbose_at.split_whitespace()
    }

    pub fn silent_at(&self) -> impl Iterator<Item = &str> {
        self.silent_at.split_whitespace()
    }

    pub fn mute_at(&self) -> impl Iterator<Item = &str> {
        self.mute_at.split_whitespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = SystemConfig::default();
        assert_eq!(config.stats_depth, 0);
        assert_eq!(config.stats_span, "10m");
        assert_eq!(config.server_addr, "");
        assert_eq!(config.server_port, 8777);
        assert_eq!(config.listen_addr(), "0.0.0.0:8777");
        assert_eq!(
            config.stats_span().unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn invalid_span_is_reported() {
        let config = SystemConfig {
            stats_span: "never".to_string(),
            ..SystemConfig::default()
        };
        assert!(config.stats_span().is_err());
    }

    #[test]
    fn at_lists_split_on_whitespace() {
        let config = SystemConfig {
            verbose_at: "/processor /server".to_string(),
            ..SystemConfig::default()
        };
        let at: Vec<&str> = config.verbose_at().collect();
        assert_eq!(at, vec!["/processor", "/server"]);
    }
}
